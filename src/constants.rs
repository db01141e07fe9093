use bitflags::bitflags;
use lazy_static::lazy_static;
use std::os::raw::c_int;

use crate::error::{Misuse, Result};

// Open, begin and commit flags
bitflags! {
    /// Options accepted by environment, database, transaction and cursor calls.
    ///
    /// Every operation accepts only a subset of these; anything outside that
    /// subset is rejected before the native layer is reached.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DbFlags: u32 {
        const AUTO_COMMIT = 0x0000_0001;
        const CREATE = 0x0000_0002;
        const EXCL = 0x0000_0004;
        const MULTIVERSION = 0x0000_0008;
        const NOMMAP = 0x0000_0010;
        const RDONLY = 0x0000_0020;
        const READ_UNCOMMITTED = 0x0000_0040;
        const THREAD = 0x0000_0080;
        const TRUNCATE = 0x0000_0100;

        // Environment subsystems
        const INIT_LOCK = 0x0001_0000;
        const INIT_LOG = 0x0002_0000;
        const INIT_MPOOL = 0x0004_0000;
        const INIT_TXN = 0x0008_0000;
        const RECOVER = 0x0010_0000;

        // Transaction begin and commit
        const READ_COMMITTED = 0x0100_0000;
        const TXN_NOWAIT = 0x0200_0000;
        const TXN_NOSYNC = 0x0400_0000;
        const TXN_SYNC = 0x0800_0000;
    }
}

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: u32 {
        /// Fail with `KeyExist` instead of overwriting.
        const NO_OVERWRITE = 0x01;
    }
}

// Buffer descriptor flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DbtFlags: u32 {
        /// The region is borrowed from the caller and must not be written.
        const READONLY = 0x01;
        /// The store may allocate or reallocate the region through the
        /// native allocator; the caller frees it afterwards.
        const REALLOC = 0x02;
    }
}

lazy_static! {
    pub(crate) static ref ENV_OPEN_FLAGS: DbFlags = DbFlags::CREATE
        | DbFlags::INIT_LOCK
        | DbFlags::INIT_LOG
        | DbFlags::INIT_MPOOL
        | DbFlags::INIT_TXN
        | DbFlags::RECOVER
        | DbFlags::THREAD;
    pub(crate) static ref TXN_BEGIN_FLAGS: DbFlags = DbFlags::READ_COMMITTED
        | DbFlags::READ_UNCOMMITTED
        | DbFlags::TXN_NOWAIT
        | DbFlags::TXN_NOSYNC
        | DbFlags::TXN_SYNC;
    pub(crate) static ref TXN_COMMIT_FLAGS: DbFlags = DbFlags::TXN_NOSYNC | DbFlags::TXN_SYNC;
    pub(crate) static ref DB_OPEN_FLAGS: DbFlags = DbFlags::AUTO_COMMIT
        | DbFlags::CREATE
        | DbFlags::EXCL
        | DbFlags::MULTIVERSION
        | DbFlags::NOMMAP
        | DbFlags::RDONLY
        | DbFlags::READ_UNCOMMITTED
        | DbFlags::THREAD
        | DbFlags::TRUNCATE;
    pub(crate) static ref READ_FLAGS: DbFlags = DbFlags::READ_COMMITTED | DbFlags::READ_UNCOMMITTED;
}

/// Rejects `given` unless every bit is in `allowed`.
pub(crate) fn check_flags(op: &'static str, given: DbFlags, allowed: DbFlags) -> Result<()> {
    let extra = given - allowed;
    if extra.is_empty() {
        Ok(())
    } else {
        Err(Misuse::InvalidFlags {
            op,
            given: extra.bits(),
        }
        .into())
    }
}

/// Default file creation mode.
pub const DEFAULT_MODE: u32 = 0o644;

// Store status codes
pub const DB_BUFFER_SMALL: c_int = -30999;
pub const DB_KEYEMPTY: c_int = -30995;
pub const DB_KEYEXIST: c_int = -30994;
pub const DB_LOCK_DEADLOCK: c_int = -30993;
pub const DB_LOCK_NOTGRANTED: c_int = -30992;
pub const DB_NOTFOUND: c_int = -30988;
pub const DB_OLD_VERSION: c_int = -30987;
pub const DB_RUNRECOVERY: c_int = -30973;
pub const DB_TIMEOUT: c_int = -30971;
pub const DB_VERSION_MISMATCH: c_int = -30969;

// errno values the store reports
pub const ENOENT: c_int = 2;
pub const ENOMEM: c_int = 12;
pub const EACCES: c_int = 13;
pub const EEXIST: c_int = 17;
pub const ENOTDIR: c_int = 20;
pub const EINVAL: c_int = 22;
