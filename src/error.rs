use std::fmt;
use std::io;
use std::os::raw::c_int;
use std::result;

use crate::constants::{
    DB_BUFFER_SMALL, DB_KEYEMPTY, DB_KEYEXIST, DB_LOCK_DEADLOCK, DB_LOCK_NOTGRANTED, DB_NOTFOUND,
    DB_OLD_VERSION, DB_RUNRECOVERY, DB_TIMEOUT, DB_VERSION_MISMATCH,
};

/// Result type for store operations
pub type Result<T> = result::Result<T, Error>;

/// Outcome of a failed operation.
///
/// Every native status code passes through `From<c_int>`; contract
/// violations detected locally are reported as [`Error::Misuse`] and never
/// reach the native layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No matching key/data pair found
    #[error("No matching key/data pair found")]
    NotFound,
    /// Key/data pair already exists
    #[error("Key/data pair already exists")]
    KeyExist,
    /// Lock conflict; the enclosing transaction should be aborted and retried
    #[error("Deadlock detected, transaction must be aborted")]
    Deadlock,
    /// The environment must be recovered before it can be used again
    #[error("Fatal error, run database recovery")]
    RunRecovery,
    /// Any other native status
    #[error("Store error {code}: {message}")]
    Store { code: c_int, message: String },
    /// Local contract violation
    #[error("Misuse: {0}")]
    Misuse(#[from] Misuse),
}

/// Handle kinds, for misuse reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Environment,
    Transaction,
    Database,
    Cursor,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Handle::Environment => "environment",
            Handle::Transaction => "transaction",
            Handle::Database => "database",
            Handle::Cursor => "cursor",
        };
        f.write_str(name)
    }
}

/// Contract violations caught before any native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Misuse {
    #[error("{0} handle is already closed")]
    AlreadyClosed(Handle),
    #[error("transaction is already committed or aborted")]
    AlreadyFinalized,
    #[error("transaction still has {0} active child transaction(s)")]
    ActiveChildren(usize),
    #[error("keys and values must not be empty")]
    EmptyBuffer,
    #[error("buffer does not fit in a 32-bit length")]
    BufferTooLarge,
    #[error("cursor operation requires a key")]
    MissingKey,
    #[error("flags {given:#x} are not accepted by {op}")]
    InvalidFlags { op: &'static str, given: u32 },
    #[error("environment still has {txns} transaction(s) and {dbs} database(s) open")]
    DependentsOpen { txns: usize, dbs: usize },
    #[error("handle belongs to a different environment or backend")]
    EnvironmentMismatch,
    #[error("a transaction requires a database opened in an environment")]
    TransactionWithoutEnvironment,
    #[error("access method type must be given explicitly")]
    UnknownType,
}

impl Error {
    /// Native status code behind this error, if it came from the store.
    pub fn code(&self) -> Option<c_int> {
        match self {
            Error::NotFound => Some(DB_NOTFOUND),
            Error::KeyExist => Some(DB_KEYEXIST),
            Error::Deadlock => Some(DB_LOCK_DEADLOCK),
            Error::RunRecovery => Some(DB_RUNRECOVERY),
            Error::Store { code, .. } => Some(*code),
            Error::Misuse(_) => None,
        }
    }

    /// Errors after which the calling workflow should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::RunRecovery | Error::Misuse(_))
    }

    /// Errors where retrying the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Deadlock)
    }
}

impl From<c_int> for Error {
    fn from(code: c_int) -> Error {
        match code {
            DB_NOTFOUND => Error::NotFound,
            DB_KEYEXIST => Error::KeyExist,
            DB_LOCK_DEADLOCK => Error::Deadlock,
            DB_RUNRECOVERY => Error::RunRecovery,
            code => Error::Store {
                code,
                message: describe(code),
            },
        }
    }
}

/// Textual description of a native status code.
pub fn describe(code: c_int) -> String {
    let text = match code {
        0 => "Successful return: 0",
        DB_BUFFER_SMALL => "DB_BUFFER_SMALL: User memory too small for return value",
        DB_KEYEMPTY => "DB_KEYEMPTY: Non-existent key/data pair",
        DB_KEYEXIST => "DB_KEYEXIST: Key/data pair already exists",
        DB_LOCK_DEADLOCK => "DB_LOCK_DEADLOCK: Locker killed to resolve a deadlock",
        DB_LOCK_NOTGRANTED => "DB_LOCK_NOTGRANTED: Lock not granted",
        DB_NOTFOUND => "DB_NOTFOUND: No matching key/data pair found",
        DB_OLD_VERSION => "DB_OLDVERSION: Database requires a version upgrade",
        DB_RUNRECOVERY => "DB_RUNRECOVERY: Fatal error, run database recovery",
        DB_TIMEOUT => "DB_TIMEOUT: Operation timed out",
        DB_VERSION_MISMATCH => "DB_VERSION_MISMATCH: Unexpected version of the library",
        code if code > 0 => return io::Error::from_raw_os_error(code).to_string(),
        code => return format!("Unknown error: {}", code),
    };
    text.to_string()
}

/// Helper trait for converting native status codes to Results
pub(crate) trait IntoResult {
    fn into_result(self) -> Result<()>;
}

impl IntoResult for c_int {
    fn into_result(self) -> Result<()> {
        if self == 0 {
            Ok(())
        } else {
            Err(Error::from(self))
        }
    }
}
