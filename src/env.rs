use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::constants::{check_flags, DbFlags, EINVAL, ENV_OPEN_FLAGS};
use crate::database::Database;
use crate::error::{Error, Handle, IntoResult, Misuse, Result};
use crate::native::{Backend, RawEnv};
use crate::transaction::Transaction;
use crate::types::DbType;

/// Handles opened in an environment, and the native environment left
/// behind when it was dropped before them.
#[derive(Debug, Default)]
struct Dependents {
    txns: usize,
    dbs: usize,
    orphan: Option<(Backend, RawEnv)>,
}

/// Bookkeeping shared between an environment and the handles opened in it.
#[derive(Debug, Default)]
pub(crate) struct EnvShared {
    dependents: Mutex<Dependents>,
    closed: AtomicBool,
    needs_recovery: AtomicBool,
}

impl EnvShared {
    /// Fails once the environment is closed or the store has demanded
    /// recovery.
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Misuse::AlreadyClosed(Handle::Environment).into())
        } else if self.needs_recovery.load(Ordering::SeqCst) {
            Err(Error::RunRecovery)
        } else {
            Ok(())
        }
    }

    /// Passes `result` through, remembering a recovery demand.
    pub(crate) fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::RunRecovery) = &result {
            if !self.needs_recovery.swap(true, Ordering::SeqCst) {
                warn!("store requested recovery, refusing further operations on this environment");
            }
        }
        result
    }

    pub(crate) fn attach_txn(&self) {
        self.dependents.lock().txns += 1;
    }

    /// Call after the native transaction is gone.
    pub(crate) fn detach_txn(&self) {
        self.detach(|deps| deps.txns = deps.txns.saturating_sub(1));
    }

    pub(crate) fn attach_db(&self) {
        self.dependents.lock().dbs += 1;
    }

    /// Call after the native database is gone.
    pub(crate) fn detach_db(&self) {
        self.detach(|deps| deps.dbs = deps.dbs.saturating_sub(1));
    }

    fn detach(&self, update: impl FnOnce(&mut Dependents)) {
        let orphan = {
            let mut deps = self.dependents.lock();
            update(&mut deps);
            if deps.txns == 0 && deps.dbs == 0 {
                deps.orphan.take()
            } else {
                None
            }
        };
        // The last dependent of a dropped environment closes it.
        if let Some((backend, raw)) = orphan {
            debug!("closing dropped environment after its last dependent");
            let rc = backend.native().env_close(raw, DbFlags::empty());
            if rc != 0 {
                warn!("closing environment failed: {}", Error::from(rc));
            }
        }
    }
}

/// Shared transactional context for databases and transactions.
#[derive(Debug)]
pub struct Environment {
    backend: Backend,
    raw: Option<RawEnv>,
    home: PathBuf,
    flags: DbFlags,
    shared: Arc<EnvShared>,
}

impl Environment {
    /// Open an environment rooted at `home`.
    ///
    /// Transactions need `INIT_TXN` (usually with `INIT_LOCK`, `INIT_LOG`
    /// and `INIT_MPOOL`).
    pub fn open<P: AsRef<Path>>(
        backend: &Backend,
        home: P,
        flags: DbFlags,
        mode: u32,
    ) -> Result<Self> {
        check_flags("environment open", flags, *ENV_OPEN_FLAGS)?;
        let home = home.as_ref();
        let native = backend.native();

        let mut raw = None;
        native.env_create(&mut raw).into_result()?;
        let raw = raw.ok_or_else(|| Error::from(EINVAL))?;

        if let Err(err) = native.env_open(raw, home, flags, mode).into_result() {
            let rc = native.env_close(raw, DbFlags::empty());
            if rc != 0 {
                warn!("closing unopened environment failed: {}", Error::from(rc));
            }
            return Err(err);
        }

        debug!("opened environment at {}", home.display());
        Ok(Environment {
            backend: backend.clone(),
            raw: Some(raw),
            home: home.to_path_buf(),
            flags,
            shared: Arc::new(EnvShared::default()),
        })
    }

    /// Close the environment.
    ///
    /// Refused while transactions or databases opened in it are still open.
    /// Closing twice is a no-op.
    pub fn close(&mut self, flags: DbFlags) -> Result<()> {
        check_flags("environment close", flags, DbFlags::empty())?;
        let Some(raw) = self.raw else {
            return Ok(());
        };
        {
            // Held so no dependent can attach between the check and the close.
            let deps = self.shared.dependents.lock();
            if deps.txns > 0 || deps.dbs > 0 {
                return Err(Misuse::DependentsOpen {
                    txns: deps.txns,
                    dbs: deps.dbs,
                }
                .into());
            }
            self.shared.closed.store(true, Ordering::SeqCst);
        }

        self.raw = None;
        debug!("closing environment at {}", self.home.display());
        self.backend.native().env_close(raw, flags).into_result()
    }

    /// Begin a transaction, optionally nested in `parent`.
    pub fn begin_transaction(
        &self,
        parent: Option<&Transaction>,
        flags: DbFlags,
    ) -> Result<Transaction> {
        Transaction::begin(self, parent, flags)
    }

    /// Open a database in this environment.
    pub fn open_database<P: AsRef<Path>>(
        &self,
        txn: Option<&Transaction>,
        file: P,
        name: Option<&str>,
        db_type: DbType,
        flags: DbFlags,
        mode: u32,
    ) -> Result<Database> {
        Database::open(
            &self.backend,
            Some(self),
            txn,
            file,
            name,
            db_type,
            flags,
            mode,
        )
    }

    pub(crate) fn raw(&self) -> Result<RawEnv> {
        let raw = self
            .raw
            .ok_or(Error::Misuse(Misuse::AlreadyClosed(Handle::Environment)))?;
        self.shared.ensure_usable()?;
        Ok(raw)
    }

    pub(crate) fn shared(&self) -> &Arc<EnvShared> {
        &self.shared
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn flags(&self) -> DbFlags {
        self.flags
    }

    pub fn is_closed(&self) -> bool {
        self.raw.is_none()
    }

    /// True once the store has reported that recovery is required.
    pub fn needs_recovery(&self) -> bool {
        self.shared.needs_recovery.load(Ordering::SeqCst)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };
        self.shared.closed.store(true, Ordering::SeqCst);
        {
            let mut deps = self.shared.dependents.lock();
            if deps.txns > 0 || deps.dbs > 0 {
                warn!(
                    "environment at {} dropped with {} transaction(s) and {} database(s) open, \
                     deferring close",
                    self.home.display(),
                    deps.txns,
                    deps.dbs
                );
                deps.orphan = Some((self.backend.clone(), raw));
                return;
            }
        }
        warn!("environment at {} dropped without close", self.home.display());
        let rc = self.backend.native().env_close(raw, DbFlags::empty());
        if rc != 0 {
            warn!("closing environment failed: {}", Error::from(rc));
        }
    }
}
