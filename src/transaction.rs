use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::constants::{check_flags, DbFlags, EINVAL, TXN_BEGIN_FLAGS, TXN_COMMIT_FLAGS};
use crate::env::{EnvShared, Environment};
use crate::error::{Error, IntoResult, Misuse, Result};
use crate::native::{Backend, RawTxn};

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// Position of a transaction in its nesting tree.
#[derive(Debug, Default)]
struct TxnTree {
    finalized: AtomicBool,
    /// Children begun and not yet finalized
    children: AtomicUsize,
    parent: Option<Arc<TxnTree>>,
}

impl TxnTree {
    /// True once this transaction or any ancestor has ended. Ending a
    /// parent ends its children with it.
    fn retired(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
            || self.parent.as_ref().map_or(false, |parent| parent.retired())
    }

    fn finish(&self) {
        self.finalized.store(true, Ordering::SeqCst);
        if let Some(parent) = &self.parent {
            parent.children.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Database transaction
///
/// Ends exactly once, by [`commit`](Transaction::commit) or
/// [`abort`](Transaction::abort). Aborting a parent also ends its active
/// children; committing it is refused until they end. Dropping an active
/// transaction aborts it.
#[derive(Debug)]
pub struct Transaction {
    backend: Backend,
    raw: Option<RawTxn>,
    env: Arc<EnvShared>,
    tree: Arc<TxnTree>,
    state: TxnState,
}

impl Transaction {
    pub(crate) fn begin(
        env: &Environment,
        parent: Option<&Transaction>,
        flags: DbFlags,
    ) -> Result<Self> {
        check_flags("transaction begin", flags, *TXN_BEGIN_FLAGS)?;
        let env_raw = env.raw()?;
        let parent_raw = match parent {
            Some(parent) => {
                if !Arc::ptr_eq(&parent.env, env.shared()) {
                    return Err(Misuse::EnvironmentMismatch.into());
                }
                Some(parent.raw()?)
            }
            None => None,
        };

        let native = env.backend().native();
        let mut raw = None;
        env.shared()
            .observe(native.txn_begin(env_raw, parent_raw, &mut raw, flags).into_result())?;
        let raw = raw.ok_or_else(|| Error::from(EINVAL))?;

        env.shared().attach_txn();
        let tree = TxnTree {
            parent: parent.map(|parent| {
                parent.tree.children.fetch_add(1, Ordering::SeqCst);
                Arc::clone(&parent.tree)
            }),
            ..TxnTree::default()
        };
        debug!(
            "began transaction {}{}",
            raw.as_raw(),
            if parent.is_some() { " (nested)" } else { "" }
        );
        Ok(Transaction {
            backend: env.backend().clone(),
            raw: Some(raw),
            env: Arc::clone(env.shared()),
            tree: Arc::new(tree),
            state: TxnState::Active,
        })
    }

    /// Commit the transaction
    ///
    /// Refused while nested transactions begun from this one are active.
    /// Otherwise the handle is retired whatever the outcome.
    pub fn commit(&mut self, flags: DbFlags) -> Result<()> {
        check_flags("transaction commit", flags, *TXN_COMMIT_FLAGS)?;
        if self.raw.is_some() && !self.tree.retired() {
            let children = self.tree.children.load(Ordering::SeqCst);
            if children > 0 {
                return Err(Misuse::ActiveChildren(children).into());
            }
        }
        let raw = self.retire(TxnState::Committed)?;
        let native = self.backend.native();

        if let Err(err) = self.env.ensure_usable() {
            // Still release the native transaction.
            let rc = native.txn_abort(raw);
            if rc != 0 {
                warn!("aborting transaction {} failed: {}", raw.as_raw(), Error::from(rc));
            }
            self.env.detach_txn();
            self.state = TxnState::Aborted;
            return Err(err);
        }

        debug!("committing transaction {}", raw.as_raw());
        let rc = native.txn_commit(raw, flags);
        self.env.detach_txn();
        let result = self.env.observe(rc.into_result());
        if result.is_err() {
            self.state = TxnState::Aborted;
        }
        result
    }

    /// Abort the transaction and any active children
    ///
    /// The handle is retired whatever the outcome.
    pub fn abort(&mut self) -> Result<()> {
        let raw = self.retire(TxnState::Aborted)?;
        debug!("aborting transaction {}", raw.as_raw());
        let rc = self.backend.native().txn_abort(raw);
        self.env.detach_txn();
        self.env.observe(rc.into_result())
    }

    fn retire(&mut self, next: TxnState) -> Result<RawTxn> {
        let raw = self.raw.take().ok_or(Misuse::AlreadyFinalized)?;
        if self.tree.retired() {
            // Ended natively along with an ancestor.
            trace!("transaction {} already ended with its parent", raw.as_raw());
            self.state = TxnState::Aborted;
            self.env.detach_txn();
            return Err(Misuse::AlreadyFinalized.into());
        }
        self.state = next;
        self.tree.finish();
        Ok(raw)
    }

    pub(crate) fn raw(&self) -> Result<RawTxn> {
        let raw = self.raw.ok_or(Misuse::AlreadyFinalized)?;
        if self.tree.retired() {
            return Err(Misuse::AlreadyFinalized.into());
        }
        self.env.ensure_usable()?;
        Ok(raw)
    }

    /// Native id, until the transaction ends.
    pub fn id(&self) -> Option<u64> {
        match self.raw {
            Some(raw) if !self.tree.retired() => Some(raw.as_raw().get()),
            _ => None,
        }
    }

    pub fn state(&self) -> TxnState {
        if self.raw.is_some() && self.tree.retired() {
            TxnState::Aborted
        } else {
            self.state
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == TxnState::Active
    }

    pub fn is_nested(&self) -> bool {
        self.tree.parent.is_some()
    }
}

/// Resolves a transaction argument for a handle bound to `env`.
///
/// `None` means autocommit. A transaction is only meaningful for handles
/// opened in the same environment.
pub(crate) fn resolve(
    env: Option<&Arc<EnvShared>>,
    txn: Option<&Transaction>,
) -> Result<Option<RawTxn>> {
    let Some(txn) = txn else {
        return Ok(None);
    };
    let Some(env) = env else {
        return Err(Misuse::TransactionWithoutEnvironment.into());
    };
    if !Arc::ptr_eq(env, &txn.env) {
        return Err(Misuse::EnvironmentMismatch.into());
    }
    txn.raw().map(Some)
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };
        if !self.tree.retired() {
            warn!("transaction {} dropped while active, aborting", raw.as_raw());
            self.tree.finish();
            let rc = self.backend.native().txn_abort(raw);
            if rc != 0 {
                warn!("aborting transaction failed: {}", Error::from(rc));
            }
        }
        self.env.detach_txn();
    }
}
