use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::DatabaseSettings;
use crate::schema::{DosageInstructions, MedicationDetails, PrescriptionRecord};

// ── Connection manager ──

/// Linear backoff: the wait after failed attempt `k` is `base_delay * k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("database unreachable after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
    #[error("database connection rejected: {source}")]
    Rejected {
        #[source]
        source: rusqlite::Error,
    },
}

impl ConnectionError {
    /// The last underlying failure.
    pub fn cause(&self) -> &rusqlite::Error {
        match self {
            ConnectionError::Exhausted { source, .. } | ConnectionError::Rejected { source } => {
                source
            }
        }
    }
}

/// Busy/locked databases and I/O hiccups are worth another attempt.
/// Everything else (bad path, not a database, permissions, corrupt file)
/// fails on the first attempt.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
        ),
        _ => false,
    }
}

/// Run `connect` until it succeeds, a non-transient error occurs, or the
/// policy's attempts are used up. Blocks the calling thread while backing off.
pub fn retry_connect<T, F>(policy: &RetryPolicy, mut connect: F) -> Result<T, ConnectionError>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        info!("Attempting to connect to database (attempt {}/{})", attempt, max_attempts);
        let err = match connect() {
            Ok(conn) => return Ok(conn),
            Err(e) => e,
        };

        if !is_transient(&err) {
            error!("Database connection rejected: {}", err);
            return Err(ConnectionError::Rejected { source: err });
        }
        if attempt >= max_attempts {
            error!("Failed to connect to database after {} attempts", max_attempts);
            return Err(ConnectionError::Exhausted {
                attempts: attempt,
                source: err,
            });
        }

        let wait = policy.delay_after(attempt);
        warn!(
            "Database connection failed ({}). Retrying in {:.1}s",
            err,
            wait.as_secs_f64()
        );
        thread::sleep(wait);
    }
}

/// Opens connections to the prescription database. Each `acquire` returns a
/// fresh connection owned by the caller; dropping it closes it.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    path: PathBuf,
    policy: RetryPolicy,
    busy_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(settings: &DatabaseSettings) -> Self {
        ConnectionManager {
            path: settings.path.clone(),
            policy: settings.retry_policy(),
            busy_timeout: settings.busy_timeout(),
        }
    }

    pub fn with_policy(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        ConnectionManager {
            path: path.into(),
            policy,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn acquire(&self) -> Result<Connection, ConnectionError> {
        retry_connect(&self.policy, || self.open())
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        // Opening is lazy; touch the header so a bad file fails here.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))?;
        Ok(conn)
    }
}

// ── Schema ──

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS medication_details (
            id        INTEGER PRIMARY KEY,
            name      TEXT,
            strength  TEXT,
            form      TEXT,
            quantity  TEXT
        );

        CREATE TABLE IF NOT EXISTS dosage_instructions (
            id                   INTEGER PRIMARY KEY,
            frequency            TEXT,
            duration             TEXT,
            special_instructions TEXT
        );

        CREATE TABLE IF NOT EXISTS prescriptions (
            id                      INTEGER PRIMARY KEY,
            rx_number               TEXT,
            date_written            DATE,
            patient_name            TEXT,
            patient_dob             DATE,
            patient_id              TEXT,
            medication_id           INTEGER REFERENCES medication_details(id),
            dosage_id               INTEGER REFERENCES dosage_instructions(id),
            prescriber_name         TEXT,
            prescriber_id           TEXT,
            pharmacy_name           TEXT,
            refills                 INTEGER,
            is_controlled_substance BOOLEAN,
            notes                   TEXT,
            created_at              TIMESTAMP NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_prescriptions_medication ON prescriptions(medication_id);
        CREATE INDEX IF NOT EXISTS idx_prescriptions_dosage ON prescriptions(dosage_id);
        ",
    )?;
    Ok(())
}

// ── Stats ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    pub medications: usize,
    pub dosages: usize,
    pub prescriptions: usize,
}

pub fn get_counts(conn: &Connection) -> rusqlite::Result<TableCounts> {
    let medications: usize =
        conn.query_row("SELECT COUNT(*) FROM medication_details", [], |r| r.get(0))?;
    let dosages: usize =
        conn.query_row("SELECT COUNT(*) FROM dosage_instructions", [], |r| r.get(0))?;
    let prescriptions: usize =
        conn.query_row("SELECT COUNT(*) FROM prescriptions", [], |r| r.get(0))?;
    Ok(TableCounts {
        medications,
        dosages,
        prescriptions,
    })
}

// ── Reads ──

/// A stored prescription joined back together. Dates in `record` are in
/// canonical `YYYY-MM-DD` form (or `None` if they did not normalize).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub medication_id: i64,
    pub dosage_id: i64,
    pub record: PrescriptionRecord,
    pub created_at: String,
}

pub fn fetch_prescription(conn: &Connection, id: i64) -> rusqlite::Result<Option<StoredRow>> {
    conn.query_row(
        "SELECT p.id, p.medication_id, p.dosage_id, p.rx_number, p.date_written,
                p.patient_name, p.patient_dob, p.patient_id, p.prescriber_name,
                p.prescriber_id, p.pharmacy_name, p.refills, p.is_controlled_substance,
                p.notes, p.created_at,
                m.name, m.strength, m.form, m.quantity,
                d.frequency, d.duration, d.special_instructions
         FROM prescriptions p
         JOIN medication_details m ON m.id = p.medication_id
         JOIN dosage_instructions d ON d.id = p.dosage_id
         WHERE p.id = ?1",
        params![id],
        |row| {
            let date_written: Option<NaiveDate> = row.get(4)?;
            let patient_dob: Option<NaiveDate> = row.get(6)?;
            Ok(StoredRow {
                id: row.get(0)?,
                medication_id: row.get(1)?,
                dosage_id: row.get(2)?,
                record: PrescriptionRecord {
                    rx_number: row.get(3)?,
                    date_written: date_written.map(|d| d.to_string()),
                    patient_name: row.get(5)?,
                    patient_dob: patient_dob.map(|d| d.to_string()),
                    patient_id: row.get(7)?,
                    prescriber_name: row.get(8)?,
                    prescriber_id: row.get(9)?,
                    pharmacy_name: row.get(10)?,
                    refills: row.get(11)?,
                    is_controlled_substance: row.get(12)?,
                    notes: row.get(13)?,
                    medication: MedicationDetails {
                        name: row.get(15)?,
                        strength: row.get(16)?,
                        form: row.get(17)?,
                        quantity: row.get(18)?,
                    },
                    dosage: DosageInstructions {
                        frequency: row.get(19)?,
                        duration: row.get(20)?,
                        special_instructions: row.get(21)?,
                    },
                },
                created_at: row.get(14)?,
            })
        },
    )
    .optional()
}

pub struct HistoryRow {
    pub id: i64,
    pub rx_number: String,
    pub patient_name: String,
    pub medication: String,
    pub date_written: Option<NaiveDate>,
    pub created_at: String,
}

/// Newest prescriptions first.
pub fn fetch_recent(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, COALESCE(p.rx_number,''), COALESCE(p.patient_name,''),
                TRIM(COALESCE(m.name,'') || ' ' || COALESCE(m.strength,'')),
                p.date_written, p.created_at
         FROM prescriptions p
         LEFT JOIN medication_details m ON m.id = p.medication_id
         ORDER BY p.id DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
            Ok(HistoryRow {
                id: row.get(0)?,
                rx_number: row.get(1)?,
                patient_name: row.get(2)?,
                medication: row.get(3)?,
                date_written: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
