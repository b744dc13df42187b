pub mod openai;

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::{PrescriptionRecord, SCHEMA_NAME};

pub use openai::OpenAiClient;

pub const SYSTEM_PROMPT: &str = "\
You are a medical data extraction expert. Extract the following information from the prescription text:
- Patient name and date of birth
- Medication name, strength, form, and quantity
- Dosage instructions (frequency, duration, special instructions)
- Prescriber name and ID
- Date written
- Refill information
- Whether it's a controlled substance
- Any other relevant prescription details

Use null for anything the text does not state. Do not guess.
Format the response as a JSON object following the prescription_record schema.";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("input text is empty")]
    EmptyInput,
    #[error("extraction service credential is not configured")]
    MissingCredential,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("extraction service returned error (status {status}): {body}")]
    Service { status: u16, body: String },
    #[error("extraction service refused: {0}")]
    Refused(String),
    #[error("extraction service returned no content")]
    EmptyResponse,
    #[error("output does not match the prescription schema: {0}")]
    MalformedOutput(#[from] serde_json::Error),
}

/// One structured-output request: a fixed instruction, the user's text, and
/// the JSON schema the reply must satisfy.
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub schema_name: &'a str,
    pub schema: &'a Value,
}

/// Anything that can answer a `CompletionRequest` with raw JSON text.
pub trait CompletionBackend {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ExtractionError>;
}

/// Turns free text into a `PrescriptionRecord`. Makes exactly one call to
/// the backend; nothing is retried here.
pub struct Extractor<B> {
    backend: B,
    schema: Value,
}

impl<B: CompletionBackend> Extractor<B> {
    pub fn new(backend: B) -> Self {
        Extractor {
            backend,
            schema: PrescriptionRecord::json_schema(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn extract(&self, text: &str) -> Result<PrescriptionRecord, ExtractionError> {
        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyInput);
        }

        let request = CompletionRequest {
            system: SYSTEM_PROMPT,
            user: text,
            schema_name: SCHEMA_NAME,
            schema: &self.schema,
        };
        let raw = self.backend.complete(&request)?;
        debug!("Extraction output: {}", raw);

        let record = parse_record(&raw)?;
        info!(
            medication = record.medication.name.as_deref().unwrap_or("-"),
            "Extracted prescription"
        );
        Ok(record)
    }
}

/// Parse service output into a record. Accepts a bare JSON object or one
/// wrapped in a ```json fence; anything else is malformed.
pub fn parse_record(raw: &str) -> Result<PrescriptionRecord, ExtractionError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }
    Ok(serde_json::from_str(strip_fence(body))?)
}

fn strip_fence(s: &str) -> &str {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").unwrap());
    match re.captures(s).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => s,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    const LISINOPRIL: &str = r#"{
        "rx_number": null, "date_written": "2023-10-15",
        "patient_name": null, "patient_dob": null, "patient_id": null,
        "medication": {"name": "Lisinopril", "strength": "10mg", "form": "Tablet", "quantity": "30 tablets"},
        "dosage": {"frequency": "once daily", "duration": null, "special_instructions": null},
        "prescriber_name": null, "prescriber_id": null, "pharmacy_name": null,
        "refills": 3, "is_controlled_substance": false, "notes": null
    }"#;

    #[test]
    fn extracts_record() {
        let ex = Extractor::new(ScriptedBackend::replying(LISINOPRIL));
        let rec = ex.extract("Lisinopril 10mg Tablet, Sig: once daily").unwrap();
        assert_eq!(rec.medication.name.as_deref(), Some("Lisinopril"));
        assert_eq!(rec.refills, Some(3));
        assert_eq!(ex.backend().calls.get(), 1);
        assert_eq!(
            ex.backend().last_user.borrow().as_deref(),
            Some("Lisinopril 10mg Tablet, Sig: once daily")
        );
    }

    #[test]
    fn fenced_output_accepted() {
        let fenced = format!("```json\n{}\n```", LISINOPRIL);
        let rec = parse_record(&fenced).unwrap();
        assert_eq!(rec.medication.strength.as_deref(), Some("10mg"));
    }

    #[test]
    fn empty_input_skips_service() {
        let ex = Extractor::new(ScriptedBackend::replying(LISINOPRIL));
        assert!(matches!(ex.extract("   \n"), Err(ExtractionError::EmptyInput)));
        assert_eq!(ex.backend().calls.get(), 0);
    }

    #[test]
    fn nonconforming_output_is_failure() {
        let ex = Extractor::new(ScriptedBackend::replying(r#"{"medication": "Lisinopril"}"#));
        assert!(matches!(
            ex.extract("Lisinopril"),
            Err(ExtractionError::MalformedOutput(_))
        ));

        let ex = Extractor::new(ScriptedBackend::replying("Sure! Here is the data."));
        assert!(matches!(
            ex.extract("Lisinopril"),
            Err(ExtractionError::MalformedOutput(_))
        ));
    }

    #[test]
    fn wrong_scalar_type_is_failure() {
        let out = r#"{"medication": {}, "dosage": {}, "refills": "three"}"#;
        assert!(matches!(
            parse_record(out),
            Err(ExtractionError::MalformedOutput(_))
        ));
    }

    #[test]
    fn service_error_propagates_once() {
        let ex = Extractor::new(ScriptedBackend::failing(ExtractionError::Service {
            status: 503,
            body: "overloaded".into(),
        }));
        let err = ex.extract("Lisinopril").unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(ex.backend().calls.get(), 1);
    }

    #[test]
    fn blank_output_is_empty_response() {
        assert!(matches!(parse_record("  "), Err(ExtractionError::EmptyResponse)));
    }
}
