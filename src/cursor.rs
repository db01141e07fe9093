use log::{trace, warn};

use crate::database::Database;
use crate::error::{Error, Handle, IntoResult, Misuse, Result};
use crate::native::RawCursor;
use crate::transaction::Transaction;
use crate::types::{CursorOp, Record};
use crate::value::OutputValue;

/// Database cursor
///
/// Borrows its database (and transaction, when opened in one), so neither
/// can be closed or finalized while the cursor is alive. Reaching the end of
/// the data is reported as [`Error::NotFound`].
#[derive(Debug)]
pub struct Cursor<'db> {
    db: &'db Database,
    txn: Option<&'db Transaction>,
    raw: Option<RawCursor>,
}

impl<'db> Cursor<'db> {
    pub(crate) fn new(db: &'db Database, txn: Option<&'db Transaction>, raw: RawCursor) -> Self {
        trace!("opened cursor {}", raw.as_raw());
        Cursor {
            db,
            txn,
            raw: Some(raw),
        }
    }

    /// True when the cursor's transaction ended with an aborted parent,
    /// which takes the native cursor with it.
    fn orphaned(&self) -> bool {
        self.txn.map_or(false, |txn| txn.id().is_none())
    }

    pub fn first(&mut self) -> Result<Record> {
        self.get_raw(CursorOp::First, None)
    }

    pub fn last(&mut self) -> Result<Record> {
        self.get_raw(CursorOp::Last, None)
    }

    /// The record after the current position, or the first one on an
    /// unpositioned cursor.
    pub fn next(&mut self) -> Result<Record> {
        self.get_raw(CursorOp::Next, None)
    }

    pub fn prev(&mut self) -> Result<Record> {
        self.get_raw(CursorOp::Prev, None)
    }

    pub fn current(&mut self) -> Result<Record> {
        self.get_raw(CursorOp::Current, None)
    }

    /// Position on `key` exactly.
    pub fn set(&mut self, key: &[u8]) -> Result<Record> {
        self.get_raw(CursorOp::Set, Some(key))
    }

    /// Position on the smallest key not less than `key`.
    pub fn set_range(&mut self, key: &[u8]) -> Result<Record> {
        self.get_raw(CursorOp::SetRange, Some(key))
    }

    /// Run a positioning operation and return the record it lands on.
    pub fn get_raw(&mut self, op: CursorOp, key: Option<&[u8]>) -> Result<Record> {
        let raw = self
            .raw
            .ok_or(Error::Misuse(Misuse::AlreadyClosed(Handle::Cursor)))?;
        if self.orphaned() {
            self.raw = None;
            return Err(Misuse::AlreadyFinalized.into());
        }
        self.db.ensure_usable()?;

        let native = self.db.backend().native();
        let allocator = native.allocator();
        let mut found_key = match (op.takes_key(), key) {
            (true, Some(key)) => OutputValue::seeded(allocator, key)?,
            (true, None) => return Err(Misuse::MissingKey.into()),
            (false, _) => OutputValue::new(allocator),
        };
        let mut found_value = OutputValue::new(allocator);

        // SAFETY: both descriptors are empty or hold memory from `allocator`.
        let rc = unsafe {
            native.cursor_get(
                raw,
                found_key.as_dbt_mut(),
                found_value.as_dbt_mut(),
                op,
            )
        };
        self.db.observe(rc.into_result())?;
        Ok((found_key.into_owned(), found_value.into_owned()))
    }

    /// Close the cursor
    ///
    /// The native handle is gone after the first call whatever its outcome;
    /// later calls return `Ok(())`.
    pub fn close(&mut self) -> Result<()> {
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };
        if self.orphaned() {
            return Ok(());
        }
        trace!("closing cursor {}", raw.as_raw());
        self.db
            .observe(self.db.backend().native().cursor_close(raw).into_result())
    }

    pub fn is_closed(&self) -> bool {
        self.raw.is_none()
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take().filter(|_| !self.orphaned()) {
            let rc = self.db.backend().native().cursor_close(raw);
            if rc != 0 {
                warn!("closing cursor failed: {}", Error::from(rc));
            }
        }
    }
}
