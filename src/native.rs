//! The boundary consumed from the underlying store.
//!
//! A [`Native`] implementation exposes one primitive per store call. Each
//! primitive returns a status code (`0` on success), reports new handles
//! through `&mut Option<_>` out-parameters, and exchanges keys and values
//! through [`Dbt`] descriptors. The safe handle types in this crate are the
//! only intended callers.

use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroU64;
use std::os::raw::c_int;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::constants::{DbFlags, DbtFlags, WriteFlags};
use crate::memstore::MemStore;
use crate::types::{CursorOp, DbType};

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NonZeroU64);

        impl $name {
            pub fn from_raw(id: NonZeroU64) -> Self {
                $name(id)
            }

            pub fn as_raw(self) -> NonZeroU64 {
                self.0
            }
        }
    };
}

raw_handle!(
    /// Native environment handle
    RawEnv
);
raw_handle!(
    /// Native transaction handle
    RawTxn
);
raw_handle!(
    /// Native database handle
    RawDb
);
raw_handle!(
    /// Native cursor handle
    RawCursor
);

/// Buffer descriptor exchanged with the store for a single call.
///
/// With [`DbtFlags::READONLY`] the region belongs to the caller. With
/// [`DbtFlags::REALLOC`] the store places its output in memory obtained from
/// [`Native::allocator`] (reallocating `data` when it is non-null) and the
/// caller releases it.
#[repr(C)]
#[derive(Debug)]
pub struct Dbt {
    pub data: *mut c_void,
    pub size: u32,
    pub flags: DbtFlags,
}

impl Dbt {
    pub fn empty(flags: DbtFlags) -> Self {
        Dbt {
            data: std::ptr::null_mut(),
            size: 0,
            flags,
        }
    }

    /// Views the described region.
    ///
    /// # Safety
    ///
    /// `data` must be null or point to `size` readable bytes that stay valid
    /// for the returned lifetime.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.data.is_null() || self.size == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.data as *const u8, self.size as usize)
        }
    }
}

/// Allocator/free pair for store-owned output buffers.
pub trait NativeAllocator: Send + Sync {
    /// Resizes `ptr` to `size` bytes, or allocates when `ptr` is null.
    /// Returns null on failure, leaving `ptr` untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator.
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void;

    /// Releases a region. Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator, and
    /// must not be used afterwards.
    unsafe fn free(&self, ptr: *mut c_void);
}

/// Primitives of the underlying store.
///
/// Handles are only valid between their creation and the matching
/// close/commit/abort, which destroys them whatever status it returns.
pub trait Native: Send + Sync {
    fn env_create(&self, envp: &mut Option<RawEnv>) -> c_int;
    fn env_open(&self, env: RawEnv, home: &Path, flags: DbFlags, mode: u32) -> c_int;
    fn env_close(&self, env: RawEnv, flags: DbFlags) -> c_int;

    fn txn_begin(
        &self,
        env: RawEnv,
        parent: Option<RawTxn>,
        txnp: &mut Option<RawTxn>,
        flags: DbFlags,
    ) -> c_int;
    fn txn_commit(&self, txn: RawTxn, flags: DbFlags) -> c_int;
    fn txn_abort(&self, txn: RawTxn) -> c_int;

    fn db_create(&self, dbp: &mut Option<RawDb>, env: Option<RawEnv>) -> c_int;
    #[allow(clippy::too_many_arguments)]
    fn db_open(
        &self,
        db: RawDb,
        txn: Option<RawTxn>,
        file: &Path,
        name: Option<&str>,
        db_type: DbType,
        flags: DbFlags,
        mode: u32,
    ) -> c_int;
    fn db_close(&self, db: RawDb, flags: DbFlags) -> c_int;
    fn db_get_type(&self, db: RawDb, db_type: &mut DbType) -> c_int;

    /// # Safety
    ///
    /// `key` and `data` must describe readable regions for the whole call.
    unsafe fn db_put(
        &self,
        db: RawDb,
        txn: Option<RawTxn>,
        key: &Dbt,
        data: &Dbt,
        flags: WriteFlags,
    ) -> c_int;

    /// # Safety
    ///
    /// `key` must describe a readable region; `data` must be null or hold
    /// memory from [`Native::allocator`].
    unsafe fn db_get(
        &self,
        db: RawDb,
        txn: Option<RawTxn>,
        key: &Dbt,
        data: &mut Dbt,
        flags: DbFlags,
    ) -> c_int;

    /// # Safety
    ///
    /// `key` must describe a readable region for the whole call.
    unsafe fn db_del(&self, db: RawDb, txn: Option<RawTxn>, key: &Dbt, flags: DbFlags) -> c_int;

    fn db_cursor(
        &self,
        db: RawDb,
        txn: Option<RawTxn>,
        cursorp: &mut Option<RawCursor>,
        flags: DbFlags,
    ) -> c_int;
    fn cursor_close(&self, cursor: RawCursor) -> c_int;

    /// # Safety
    ///
    /// `key` and `data` must be null or hold memory from
    /// [`Native::allocator`]; for keyed operations `key` holds the search key.
    unsafe fn cursor_get(
        &self,
        cursor: RawCursor,
        key: &mut Dbt,
        data: &mut Dbt,
        op: CursorOp,
    ) -> c_int;

    fn allocator(&self) -> &dyn NativeAllocator;
}

static SHARED: Lazy<Backend> = Lazy::new(Backend::memory);

/// Cloneable handle to a [`Native`] implementation.
#[derive(Clone)]
pub struct Backend {
    native: Arc<dyn Native>,
}

impl Backend {
    pub fn new<N: Native + 'static>(native: Arc<N>) -> Self {
        Backend { native }
    }

    /// A fresh in-process store.
    pub fn memory() -> Self {
        Backend::new(Arc::new(MemStore::new()))
    }

    /// The process-wide in-process store.
    pub fn shared() -> Self {
        SHARED.clone()
    }

    pub(crate) fn native(&self) -> &dyn Native {
        self.native.as_ref()
    }

    /// True when both handles reach the same store instance.
    pub fn same_as(&self, other: &Backend) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.native) as *const u8,
            Arc::as_ptr(&other.native) as *const u8,
        )
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Backend")
            .field("native", &Arc::as_ptr(&self.native))
            .finish()
    }
}
