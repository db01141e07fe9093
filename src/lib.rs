//! Owned, retire-once handles over a transactional key/value store.
//!
//! An [`Environment`] hosts [`Transaction`]s and [`Database`]s; a
//! [`Database`] hands out [`Cursor`]s. Each handle is closed, committed or
//! aborted exactly once; later calls are rejected locally (or are no-ops for
//! close) and never reach the store with a stale handle. Keys and values go
//! in as borrowed slices and come back as owned `Vec<u8>`s; store-allocated
//! buffers never escape.
//!
//! ```
//! use bdbwrap::{Backend, Database, DbFlags, DbType, WriteFlags, DEFAULT_MODE};
//!
//! let backend = Backend::memory();
//! let mut db = Database::open(
//!     &backend,
//!     None,
//!     None,
//!     "doc.db",
//!     None,
//!     DbType::BTree,
//!     DbFlags::CREATE,
//!     DEFAULT_MODE,
//! )?;
//! db.put(None, b"hello", b"world", WriteFlags::empty())?;
//! assert_eq!(db.get(None, b"hello", DbFlags::empty())?, b"world");
//! db.close(DbFlags::empty())?;
//! # Ok::<(), bdbwrap::Error>(())
//! ```

mod alloc;
pub mod constants;
mod cursor;
mod database;
mod env;
mod error;
mod memstore;
mod native;
mod transaction;
mod types;
mod value;

pub use alloc::TrackingAllocator;
pub use constants::{DbFlags, DbtFlags, WriteFlags, DEFAULT_MODE};
pub use cursor::Cursor;
pub use database::Database;
pub use env::Environment;
pub use error::{describe, Error, Handle, Misuse, Result};
pub use memstore::{MemStats, MemStore, NativeOp};
pub use native::{
    Backend, Dbt, Native, NativeAllocator, RawCursor, RawDb, RawEnv, RawTxn,
};
pub use transaction::{Transaction, TxnState};
pub use types::{CursorOp, DbType, Record};
pub use value::{InputValue, OutputValue};
