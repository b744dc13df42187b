//! Prescription text extraction and storage.
//!
//! Free text goes to a structured-extraction service, comes back as a
//! [`PrescriptionRecord`], and is written to three linked SQLite tables in a
//! single transaction.

pub mod config;
pub mod dates;
pub mod db;
pub mod extract;
pub mod pipeline;
pub mod schema;
pub mod store;

pub use crate::config::Settings;
pub use crate::db::{ConnectionError, ConnectionManager, RetryPolicy};
pub use crate::extract::{ExtractionError, Extractor, OpenAiClient};
pub use crate::pipeline::{health, Pipeline, PipelineError};
pub use crate::schema::{DosageInstructions, MedicationDetails, PrescriptionRecord};
pub use crate::store::{PrescriptionStore, StoreError, StoredPrescription};
