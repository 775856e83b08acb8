//! placecard-core - Core library for placecard
//!
//! This crate contains the record model, field validators, the per-operator
//! editing state machine, and the optimistic sync protocol that keeps edits
//! consistent with the shared spreadsheet.

pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod photo;
pub mod retry;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;
pub mod util;
pub mod validate;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use models::{CompanyRecord, FieldKind, FieldValue, RecordId, RecordVersion, Snapshot};
pub use session::{SessionError, SessionManager};
pub use sync::{CommitOutcome, Conflict, SyncEngine};
