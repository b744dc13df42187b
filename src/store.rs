//! Transactional write of one prescription across its three tables.

use rusqlite::{params, Transaction};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::{self, ConnectionError, ConnectionManager, HistoryRow, StoredRow, TableCounts};
use crate::dates;
use crate::schema::PrescriptionRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Generated identifiers of the three rows written by one `store` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredPrescription {
    pub prescription_id: i64,
    pub medication_id: i64,
    pub dosage_id: i64,
}

pub struct PrescriptionStore {
    connections: ConnectionManager,
}

impl PrescriptionStore {
    pub fn new(connections: ConnectionManager) -> Self {
        PrescriptionStore { connections }
    }

    /// Create the tables if they do not exist. Run once before `store`.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.connections.acquire()?;
        db::init_schema(&conn)?;
        info!("Database tables initialized at {:?}", self.connections.path());
        Ok(())
    }

    /// Write medication, dosage and prescription rows in one transaction.
    /// Either all three rows are committed or none are. The connection is
    /// closed before returning on every path.
    pub fn store(&self, record: &PrescriptionRecord) -> Result<StoredPrescription, StoreError> {
        let mut conn = self.connections.acquire()?;
        let tx = conn.transaction()?;

        match write_rows(&tx, record) {
            Ok(ids) => {
                tx.commit()?;
                info!(
                    prescription_id = ids.prescription_id,
                    medication_id = ids.medication_id,
                    dosage_id = ids.dosage_id,
                    "Stored prescription"
                );
                Ok(ids)
            }
            Err(e) => {
                error!("Storing prescription failed, rolling back: {}", e);
                if let Err(rb) = tx.rollback() {
                    warn!("Rollback failed: {}", rb);
                }
                Err(e.into())
            }
        }
    }

    pub fn table_counts(&self) -> Result<TableCounts, StoreError> {
        let conn = self.connections.acquire()?;
        Ok(db::get_counts(&conn)?)
    }

    pub fn fetch(&self, prescription_id: i64) -> Result<Option<StoredRow>, StoreError> {
        let conn = self.connections.acquire()?;
        Ok(db::fetch_prescription(&conn, prescription_id)?)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRow>, StoreError> {
        let conn = self.connections.acquire()?;
        Ok(db::fetch_recent(&conn, limit)?)
    }
}

fn write_rows(tx: &Transaction, record: &PrescriptionRecord) -> rusqlite::Result<StoredPrescription> {
    let med = &record.medication;
    let medication_id: i64 = tx.query_row(
        "INSERT INTO medication_details (name, strength, form, quantity)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING id",
        params![med.name, med.strength, med.form, med.quantity],
        |r| r.get(0),
    )?;

    let dose = &record.dosage;
    let dosage_id: i64 = tx.query_row(
        "INSERT INTO dosage_instructions (frequency, duration, special_instructions)
         VALUES (?1, ?2, ?3)
         RETURNING id",
        params![dose.frequency, dose.duration, dose.special_instructions],
        |r| r.get(0),
    )?;

    let date_written = dates::normalize(record.date_written.as_deref());
    if date_written.is_none() && record.date_written.is_some() {
        warn!("Unrecognized date_written {:?}, storing NULL", record.date_written);
    }
    let patient_dob = match record.patient_dob.as_deref() {
        Some(raw) => dates::normalize(Some(raw)),
        None => None,
    };

    let prescription_id: i64 = tx.query_row(
        "INSERT INTO prescriptions (
             rx_number, date_written, patient_name, patient_dob, patient_id,
             medication_id, dosage_id, prescriber_name, prescriber_id,
             pharmacy_name, refills, is_controlled_substance, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         RETURNING id",
        params![
            record.rx_number,
            date_written,
            record.patient_name,
            patient_dob,
            record.patient_id,
            medication_id,
            dosage_id,
            record.prescriber_name,
            record.prescriber_id,
            record.pharmacy_name,
            record.refills,
            record.is_controlled_substance,
            record.notes,
        ],
        |r| r.get(0),
    )?;

    Ok(StoredPrescription {
        prescription_id,
        medication_id,
        dosage_id,
    })
}
