//! Prescription record shape shared by extraction and storage.
//!
//! Every scalar is optional and stays `None` when the source text does not
//! mention it; an empty string is kept as-is. `medication` and `dosage` are
//! required objects: a payload without them is rejected at deserialization.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Name used for the response schema sent to the extraction service.
pub const SCHEMA_NAME: &str = "prescription_record";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MedicationDetails {
    /// Name of the medication.
    pub name: Option<String>,
    /// Strength, e.g. "10mg", "500mg".
    pub strength: Option<String>,
    /// Form, e.g. tablet, capsule, liquid.
    pub form: Option<String>,
    /// Total quantity prescribed, as written ("30 tablets").
    pub quantity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DosageInstructions {
    /// How often to take, e.g. "twice daily".
    pub frequency: Option<String>,
    /// Duration of treatment, e.g. "7 days".
    pub duration: Option<String>,
    /// e.g. "take with food".
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrescriptionRecord {
    pub rx_number: Option<String>,
    /// Date as written on the prescription; normalized only when stored.
    pub date_written: Option<String>,

    pub patient_name: Option<String>,
    pub patient_dob: Option<String>,
    pub patient_id: Option<String>,

    pub medication: MedicationDetails,
    pub dosage: DosageInstructions,

    pub prescriber_name: Option<String>,
    /// NPI or similar, stored as opaque text.
    pub prescriber_id: Option<String>,

    pub pharmacy_name: Option<String>,
    pub refills: Option<i32>,
    pub is_controlled_substance: Option<bool>,
    pub notes: Option<String>,
}

impl PrescriptionRecord {
    /// Strict JSON schema for structured output: every key is required and
    /// absence is expressed as `null`, so the service cannot drop fields.
    pub fn json_schema() -> Value {
        let medication = object_schema(&[
            ("name", "string", "Name of the medication"),
            ("strength", "string", "Strength of the medication (e.g., 10mg, 500mg)"),
            ("form", "string", "Form of medication (e.g., tablet, capsule, liquid)"),
            ("quantity", "string", "Total quantity of medication prescribed"),
        ]);
        let dosage = object_schema(&[
            ("frequency", "string", "How often to take (e.g., twice daily, every 8 hours)"),
            ("duration", "string", "Duration of treatment (e.g., 7 days, 2 weeks)"),
            ("special_instructions", "string", "Special instructions (e.g., take with food)"),
        ]);

        let mut schema = object_schema(&[
            ("rx_number", "string", "Prescription number if available"),
            ("date_written", "string", "Date the prescription was written"),
            ("patient_name", "string", "Full name of the patient"),
            ("patient_dob", "string", "Patient's date of birth"),
            ("patient_id", "string", "Patient identifier if available"),
            ("prescriber_name", "string", "Name of the prescribing doctor"),
            ("prescriber_id", "string", "Prescriber identifier (NPI, etc.)"),
            ("pharmacy_name", "string", "Name of the dispensing pharmacy"),
            ("refills", "integer", "Number of refills authorized"),
            ("is_controlled_substance", "boolean", "Whether the medication is a controlled substance"),
            ("notes", "string", "Any additional notes or information"),
        ]);
        schema["properties"]["medication"] = medication;
        schema["properties"]["dosage"] = dosage;
        if let Some(required) = schema["required"].as_array_mut() {
            required.push(json!("medication"));
            required.push(json!("dosage"));
        }
        schema
    }
}

/// Object whose fields are all nullable scalars.
fn object_schema(fields: &[(&str, &str, &str)]) -> Value {
    let mut properties = serde_json::Map::new();
    for (name, ty, description) in fields {
        properties.insert(
            name.to_string(),
            json!({ "type": [ty, "null"], "description": description }),
        );
    }
    let required: Vec<&str> = fields.iter().map(|(name, _, _)| *name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}
