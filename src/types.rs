use std::fmt;

/// Access method of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DbType {
    /// Ordered tree; cursors return keys in byte order.
    BTree = 1,
    Hash = 2,
    /// Record-numbered; keys are native-endian `u32` record numbers.
    Recno = 3,
    /// Queue of record-numbered entries.
    Queue = 4,
    /// Not yet determined. Only ever a query result.
    Unknown = 5,
}

impl DbType {
    /// True for access methods keyed by record number.
    pub fn is_numbered(self) -> bool {
        matches!(self, DbType::Recno | DbType::Queue)
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DbType::BTree => "btree",
            DbType::Hash => "hash",
            DbType::Recno => "recno",
            DbType::Queue => "queue",
            DbType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Cursor positioning operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    First,
    Last,
    Next,
    Prev,
    Current,
    /// Exact key match.
    Set,
    /// Smallest key greater than or equal to the given one.
    SetRange,
}

impl CursorOp {
    pub fn takes_key(self) -> bool {
        matches!(self, CursorOp::Set | CursorOp::SetRange)
    }
}

/// An owned key/value pair.
pub type Record = (Vec<u8>, Vec<u8>);
