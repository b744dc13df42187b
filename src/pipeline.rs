//! Extract, then persist. The first failing stage ends the call.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::extract::{CompletionBackend, ExtractionError, Extractor};
use crate::schema::PrescriptionRecord;
use crate::store::{PrescriptionStore, StoreError, StoredPrescription};

pub trait Extract {
    fn extract(&self, text: &str) -> Result<PrescriptionRecord, ExtractionError>;
}

pub trait Persist {
    fn store(&self, record: &PrescriptionRecord) -> Result<StoredPrescription, StoreError>;
}

impl<B: CompletionBackend> Extract for Extractor<B> {
    fn extract(&self, text: &str) -> Result<PrescriptionRecord, ExtractionError> {
        Extractor::extract(self, text)
    }
}

impl Persist for PrescriptionStore {
    fn store(&self, record: &PrescriptionRecord) -> Result<StoredPrescription, StoreError> {
        PrescriptionStore::store(self, record)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Error extracting prescription data: {0}")]
    Extraction(#[source] ExtractionError),
    /// Extraction worked but the write did not; the record is kept so the
    /// caller can still show it.
    #[error("Error storing prescription: {source}")]
    Storage {
        record: Box<PrescriptionRecord>,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    pub fn extracted(&self) -> Option<&PrescriptionRecord> {
        match self {
            PipelineError::Extraction(_) => None,
            PipelineError::Storage { record, .. } => Some(&**record),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: &'static str,
}

/// Liveness only; does not touch the extraction service or the database.
pub fn health() -> Health {
    Health { status: "healthy" }
}

pub struct Pipeline<X, P> {
    extractor: X,
    store: P,
}

impl<X: Extract, P: Persist> Pipeline<X, P> {
    pub fn new(extractor: X, store: P) -> Self {
        Pipeline { extractor, store }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn process(&self, text: &str) -> Result<PrescriptionRecord, PipelineError> {
        let record = self.extractor.extract(text).map_err(|e| {
            error!("Extraction failed: {}", e);
            PipelineError::Extraction(e)
        })?;

        match self.store.store(&record) {
            Ok(ids) => {
                info!(prescription_id = ids.prescription_id, "Processed prescription");
                Ok(record)
            }
            Err(source) => {
                error!("Storage failed after extraction: {}", source);
                Err(PipelineError::Storage {
                    record: Box::new(record),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::db::ConnectionError;
    use crate::schema::MedicationDetails;

    /// Returns the record, or `EmptyResponse` when there is none.
    struct FixedExtract(Option<PrescriptionRecord>);

    impl Extract for FixedExtract {
        fn extract(&self, _text: &str) -> Result<PrescriptionRecord, ExtractionError> {
            self.0.clone().ok_or(ExtractionError::EmptyResponse)
        }
    }

    struct CountingStore {
        calls: Cell<usize>,
        fail: bool,
    }

    impl Persist for CountingStore {
        fn store(&self, _record: &PrescriptionRecord) -> Result<StoredPrescription, StoreError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(StoreError::Connection(ConnectionError::Exhausted {
                    attempts: 5,
                    source: rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                        None,
                    ),
                }));
            }
            Ok(StoredPrescription {
                prescription_id: 1,
                medication_id: 1,
                dosage_id: 1,
            })
        }
    }

    fn record() -> PrescriptionRecord {
        PrescriptionRecord {
            medication: MedicationDetails {
                name: Some("Metformin".into()),
                strength: Some("500mg".into()),
                ..Default::default()
            },
            refills: Some(2),
            ..Default::default()
        }
    }

    fn store(fail: bool) -> CountingStore {
        CountingStore {
            calls: Cell::new(0),
            fail,
        }
    }

    #[test]
    fn success_returns_record() {
        let p = Pipeline::new(FixedExtract(Some(record())), store(false));
        assert_eq!(p.process("Metformin 500mg").unwrap(), record());
        assert_eq!(p.store().calls.get(), 1);
    }

    #[test]
    fn extraction_failure_skips_storage() {
        let p = Pipeline::new(FixedExtract(None), store(false));
        let err = p.process("Metformin").unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ExtractionError::EmptyResponse)));
        assert!(err.extracted().is_none());
        assert_eq!(p.store().calls.get(), 0);
    }

    #[test]
    fn storage_failure_keeps_extracted_record() {
        let p = Pipeline::new(FixedExtract(Some(record())), store(true));
        let err = p.process("Metformin").unwrap_err();
        let rec = err.extracted().expect("record carried on storage failure");
        assert_eq!(rec.medication.name.as_deref(), Some("Metformin"));
        assert_eq!(rec.refills, Some(2));
        assert!(matches!(
            err,
            PipelineError::Storage {
                source: StoreError::Connection(ConnectionError::Exhausted { .. }),
                ..
            }
        ));
    }

    #[test]
    fn health_is_static() {
        assert_eq!(
            serde_json::to_string(&health()).unwrap(),
            r#"{"status":"healthy"}"#
        );
    }
}
