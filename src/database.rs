use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::constants::{check_flags, DbFlags, WriteFlags, DB_OPEN_FLAGS, EINVAL, READ_FLAGS};
use crate::cursor::Cursor;
use crate::env::{EnvShared, Environment};
use crate::error::{Error, Handle, IntoResult, Misuse, Result};
use crate::native::{Backend, RawDb, RawTxn};
use crate::transaction::{self, Transaction};
use crate::types::DbType;
use crate::value::{InputValue, OutputValue};

/// Database handle
#[derive(Debug)]
pub struct Database {
    backend: Backend,
    raw: Option<RawDb>,
    /// Environment bookkeeping, absent for standalone databases
    env: Option<Arc<EnvShared>>,
    /// Access method asked for at open time
    requested: DbType,
    file: PathBuf,
    name: Option<String>,
}

impl Database {
    /// Open a database file, or a named database inside it.
    ///
    /// `env` and `txn` are optional: without an environment the database is
    /// standalone, without a transaction the open is not transaction
    /// protected (or auto-committed with `AUTO_COMMIT`).
    #[allow(clippy::too_many_arguments)]
    pub fn open<P: AsRef<Path>>(
        backend: &Backend,
        env: Option<&Environment>,
        txn: Option<&Transaction>,
        file: P,
        name: Option<&str>,
        db_type: DbType,
        flags: DbFlags,
        mode: u32,
    ) -> Result<Self> {
        check_flags("database open", flags, *DB_OPEN_FLAGS)?;
        if db_type == DbType::Unknown {
            return Err(Misuse::UnknownType.into());
        }
        if env.is_none() && flags.contains(DbFlags::AUTO_COMMIT) {
            return Err(Misuse::InvalidFlags {
                op: "database open without an environment",
                given: DbFlags::AUTO_COMMIT.bits(),
            }
            .into());
        }
        if txn.is_some() && flags.contains(DbFlags::TRUNCATE) {
            return Err(Misuse::InvalidFlags {
                op: "transactional database open",
                given: DbFlags::TRUNCATE.bits(),
            }
            .into());
        }

        let env_raw = match env {
            Some(env) => {
                if !env.backend().same_as(backend) {
                    return Err(Misuse::EnvironmentMismatch.into());
                }
                Some(env.raw()?)
            }
            None => None,
        };
        let shared = env.map(|env| Arc::clone(env.shared()));
        let txn_raw = transaction::resolve(shared.as_ref(), txn)?;

        let file = file.as_ref();
        let native = backend.native();
        let observe = |result: Result<()>| match &shared {
            Some(shared) => shared.observe(result),
            None => result,
        };

        let mut raw = None;
        observe(native.db_create(&mut raw, env_raw).into_result())?;
        let raw = raw.ok_or_else(|| Error::from(EINVAL))?;

        let opened = native
            .db_open(raw, txn_raw, file, name, db_type, flags, mode)
            .into_result();
        if let Err(err) = observe(opened) {
            // The created handle must not leak.
            let rc = native.db_close(raw, DbFlags::empty());
            if rc != 0 {
                warn!("closing unopened database failed: {}", Error::from(rc));
            }
            return Err(err);
        }

        if let Some(shared) = &shared {
            shared.attach_db();
        }
        debug!(
            "opened {} database {}{}",
            db_type,
            file.display(),
            name.map(|name| format!(":{}", name)).unwrap_or_default()
        );
        Ok(Database {
            backend: backend.clone(),
            raw: Some(raw),
            env: shared,
            requested: db_type,
            file: file.to_path_buf(),
            name: name.map(str::to_string),
        })
    }

    /// Close the database
    ///
    /// The native handle is destroyed whatever the outcome, so closing again
    /// is always a no-op.
    pub fn close(&mut self, flags: DbFlags) -> Result<()> {
        check_flags("database close", flags, DbFlags::empty())?;
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };
        debug!("closing database {}", self.file.display());
        let rc = self.backend.native().db_close(raw, flags);
        if let Some(env) = &self.env {
            env.detach_db();
        }
        self.observe(rc.into_result())
    }

    /// Access method in effect
    pub fn get_type(&self) -> Result<DbType> {
        let raw = self.raw()?;
        let mut db_type = DbType::Unknown;
        self.observe(
            self.backend
                .native()
                .db_get_type(raw, &mut db_type)
                .into_result(),
        )?;
        Ok(db_type)
    }

    /// Store a key/value pair, overwriting unless `NO_OVERWRITE` is given.
    pub fn put(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        value: &[u8],
        flags: WriteFlags,
    ) -> Result<()> {
        let raw = self.raw()?;
        let txn = self.txn(txn)?;
        let key = InputValue::new(key)?;
        let value = InputValue::new(value)?;

        trace!("put {} byte key, {} byte value", key.len(), value.len());
        // SAFETY: both descriptors borrow live slices for the whole call.
        let rc = unsafe {
            self.backend
                .native()
                .db_put(raw, txn, key.as_dbt(), value.as_dbt(), flags)
        };
        self.observe(rc.into_result())
    }

    /// Get an owned copy of the value stored under `key`.
    pub fn get(&self, txn: Option<&Transaction>, key: &[u8], flags: DbFlags) -> Result<Vec<u8>> {
        check_flags("database get", flags, *READ_FLAGS)?;
        let raw = self.raw()?;
        let txn = self.txn(txn)?;
        let key = InputValue::new(key)?;
        let native = self.backend.native();
        let mut data = OutputValue::new(native.allocator());

        trace!("get {} byte key", key.len());
        // SAFETY: `key` borrows a live slice and `data` starts empty.
        let rc = unsafe { native.db_get(raw, txn, key.as_dbt(), data.as_dbt_mut(), flags) };
        self.observe(rc.into_result())?;
        Ok(data.into_owned())
    }

    /// True when `key` is present.
    pub fn exists(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<bool> {
        match self.get(txn, key, DbFlags::empty()) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Delete the record stored under `key`.
    pub fn del(&self, txn: Option<&Transaction>, key: &[u8], flags: DbFlags) -> Result<()> {
        check_flags("database delete", flags, DbFlags::empty())?;
        let raw = self.raw()?;
        let txn = self.txn(txn)?;
        let key = InputValue::new(key)?;

        trace!("delete {} byte key", key.len());
        // SAFETY: `key` borrows a live slice for the whole call.
        let rc = unsafe { self.backend.native().db_del(raw, txn, key.as_dbt(), flags) };
        self.observe(rc.into_result())
    }

    /// Create a cursor over this database.
    pub fn cursor<'db>(
        &'db self,
        txn: Option<&'db Transaction>,
        flags: DbFlags,
    ) -> Result<Cursor<'db>> {
        check_flags("cursor open", flags, *READ_FLAGS)?;
        let raw = self.raw()?;
        let txn_raw = self.txn(txn)?;

        let mut cursor = None;
        self.observe(
            self.backend
                .native()
                .db_cursor(raw, txn_raw, &mut cursor, flags)
                .into_result(),
        )?;
        let cursor = cursor.ok_or_else(|| Error::from(EINVAL))?;
        Ok(Cursor::new(self, txn, cursor))
    }

    pub(crate) fn raw(&self) -> Result<RawDb> {
        let raw = self
            .raw
            .ok_or(Error::Misuse(Misuse::AlreadyClosed(Handle::Database)))?;
        self.ensure_usable()?;
        Ok(raw)
    }

    fn txn(&self, txn: Option<&Transaction>) -> Result<Option<RawTxn>> {
        transaction::resolve(self.env.as_ref(), txn)
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        match &self.env {
            Some(env) => env.ensure_usable(),
            None => Ok(()),
        }
    }

    pub(crate) fn observe<T>(&self, result: Result<T>) -> Result<T> {
        match &self.env {
            Some(env) => env.observe(result),
            None => result,
        }
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Access method asked for at open time; see [`get_type`](Self::get_type)
    /// for the one in effect.
    pub fn requested_type(&self) -> DbType {
        self.requested
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.raw.is_none()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            warn!("database {} dropped without close", self.file.display());
            let rc = self.backend.native().db_close(raw, DbFlags::empty());
            if rc != 0 {
                warn!("closing database failed: {}", Error::from(rc));
            }
            if let Some(env) = &self.env {
                env.detach_db();
            }
        }
    }
}
