pub mod schema;
pub mod sqlite;

use crate::model::{ProcessingStatus, Proposal, ProposalOption};
use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("proposal not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Transient(String),
    #[error("corrupt document: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure => StoreError::Transient(format!("database busy: {err}")),
                _ => StoreError::Transient(format!("sqlite failure: {err}")),
            },
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => StoreError::Corrupt(err.to_string()),
            _ => StoreError::Transient(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    Appended,
    /// An option with the same id was already in the collection.
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    Written,
    AlreadyTerminal(ProcessingStatus),
}

/// Document operations the promotion pipeline depends on.
///
/// `append_option` is an insert-if-absent on a single element of the
/// proposal's option collection; implementations must never rewrite the
/// collection as a whole. `set_comment_status` only writes when the comment
/// has no terminal status yet.
pub trait DocumentStore {
    fn get_proposal(&self, proposal_id: &str) -> Result<Proposal, StoreError>;

    fn append_option(
        &self,
        proposal_id: &str,
        option: &ProposalOption,
    ) -> Result<AppendResult, StoreError>;

    fn set_comment_status(
        &self,
        proposal_id: &str,
        comment_id: &str,
        status: ProcessingStatus,
        reason: Option<&str>,
    ) -> Result<StatusWrite, StoreError>;

    fn comment_status(
        &self,
        proposal_id: &str,
        comment_id: &str,
    ) -> Result<Option<ProcessingStatus>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRow {
    pub seq: i64,
    pub ts: String,
    pub proposal_id: String,
    pub comment_id: String,
    pub outcome: String,
    pub option_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewInvocation {
    pub proposal_id: String,
    pub comment_id: String,
    pub outcome: String,
    pub option_id: Option<String>,
    pub reason: Option<String>,
}
