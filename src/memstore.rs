//! In-process implementation of the native boundary.
//!
//! `MemStore` keeps every database file in a process-local catalog keyed by
//! path and sub-database name. Environment home directories are checked
//! against the real filesystem, but no data is written to disk. Output
//! buffers come from a [`TrackingAllocator`] so tests can assert that nothing
//! leaks.
//!
//! Transactions buffer their writes in per-file overlays and take a write
//! lock per key. A write that hits a key locked by an unrelated transaction
//! fails with `DB_LOCK_DEADLOCK` (`DB_LOCK_NOTGRANTED` under `TXN_NOWAIT`)
//! instead of blocking.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::ops::Bound;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::alloc::TrackingAllocator;
use crate::constants::{
    DbFlags, DbtFlags, WriteFlags, DB_BUFFER_SMALL, DB_KEYEMPTY, DB_KEYEXIST, DB_LOCK_DEADLOCK,
    DB_LOCK_NOTGRANTED, DB_NOTFOUND, EACCES, EEXIST, EINVAL, ENOENT, ENOMEM, ENOTDIR,
};
use crate::native::{Dbt, Native, NativeAllocator, RawCursor, RawDb, RawEnv, RawTxn};
use crate::types::{CursorOp, DbType};

/// Native calls that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeOp {
    EnvOpen,
    TxnBegin,
    TxnCommit,
    DbOpen,
    DbClose,
    DbPut,
    /// Fails after the output buffer has been filled.
    DbGet,
    DbDel,
    CursorOpen,
    CursorClose,
    /// Fails after the output buffers have been filled.
    CursorGet,
}

/// Live object counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemStats {
    pub environments: usize,
    pub transactions: usize,
    pub databases: usize,
    pub cursors: usize,
    pub files: usize,
    pub live_buffers: usize,
}

type FileKey = (PathBuf, Option<String>);
type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;
type Records = BTreeMap<Vec<u8>, Vec<u8>>;

struct FileEntry {
    db_type: DbType,
    records: Records,
    /// Key -> owning transaction
    locks: HashMap<Vec<u8>, u64>,
}

struct EnvSlot {
    home: Option<PathBuf>,
    flags: DbFlags,
}

struct TxnSlot {
    env: u64,
    parent: Option<u64>,
    nowait: bool,
    writes: HashMap<FileKey, Overlay>,
}

struct DbSlot {
    env: Option<u64>,
    file: Option<FileKey>,
    db_type: DbType,
    flags: DbFlags,
}

struct CursorSlot {
    db: u64,
    txn: Option<u64>,
    position: Option<Vec<u8>>,
}

/// An open database, copied out of its slot.
struct OpenDb {
    file: FileKey,
    db_type: DbType,
    flags: DbFlags,
    env: Option<u64>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    envs: HashMap<u64, EnvSlot>,
    txns: HashMap<u64, TxnSlot>,
    dbs: HashMap<u64, DbSlot>,
    cursors: HashMap<u64, CursorSlot>,
    files: HashMap<FileKey, FileEntry>,
    faults: HashMap<NativeOp, c_int>,
}

fn status(res: Result<(), c_int>) -> c_int {
    match res {
        Ok(()) => 0,
        Err(rc) => rc,
    }
}

fn encode_key(db_type: DbType, key: &[u8]) -> Result<Vec<u8>, c_int> {
    if key.is_empty() {
        return Err(EINVAL);
    }
    if !db_type.is_numbered() {
        return Ok(key.to_vec());
    }
    let bytes: [u8; 4] = key.try_into().map_err(|_| EINVAL)?;
    match u32::from_ne_bytes(bytes) {
        0 => Err(EINVAL),
        // Stored big-endian so byte order matches numeric order.
        recno => Ok(recno.to_be_bytes().to_vec()),
    }
}

fn decode_key(db_type: DbType, key: &[u8]) -> Vec<u8> {
    match <[u8; 4]>::try_from(key) {
        Ok(bytes) if db_type.is_numbered() => u32::from_be_bytes(bytes).to_ne_bytes().to_vec(),
        _ => key.to_vec(),
    }
}

impl State {
    fn next_id(&mut self) -> NonZeroU64 {
        self.next_id += 1;
        NonZeroU64::new(self.next_id).unwrap_or(NonZeroU64::MIN)
    }

    fn fault(&mut self, op: NativeOp) -> Result<(), c_int> {
        match self.faults.remove(&op) {
            Some(rc) => {
                trace!("injected failure {} for {:?}", rc, op);
                Err(rc)
            }
            None => Ok(()),
        }
    }

    /// The transaction followed by its ancestors.
    fn lineage(&self, txn: u64) -> Vec<u64> {
        let mut chain = vec![txn];
        let mut current = txn;
        while let Some(parent) = self.txns.get(&current).and_then(|slot| slot.parent) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    fn children_of(&self, txn: u64) -> Vec<u64> {
        self.txns
            .iter()
            .filter(|(_, slot)| slot.parent == Some(txn))
            .map(|(id, _)| *id)
            .collect()
    }

    fn env_has_txn(&self, env: u64) -> bool {
        self.envs
            .get(&env)
            .map_or(false, |slot| slot.home.is_some() && slot.flags.contains(DbFlags::INIT_TXN))
    }

    /// Validates a transaction argument for an object living in `env`.
    fn check_txn(&self, txn: Option<RawTxn>, env: Option<u64>) -> Result<Option<u64>, c_int> {
        let Some(txn) = txn else {
            return Ok(None);
        };
        let id = txn.as_raw().get();
        let slot = self.txns.get(&id).ok_or(EINVAL)?;
        if env != Some(slot.env) {
            return Err(EINVAL);
        }
        // A parent is suspended while it has an active child.
        if !self.children_of(id).is_empty() {
            return Err(EINVAL);
        }
        Ok(Some(id))
    }

    fn opened(&self, db: u64) -> Result<OpenDb, c_int> {
        let slot = self.dbs.get(&db).ok_or(EINVAL)?;
        let file = slot.file.clone().ok_or(EINVAL)?;
        Ok(OpenDb {
            file,
            db_type: slot.db_type,
            flags: slot.flags,
            env: slot.env,
        })
    }

    fn lookup(&self, file: &FileKey, txn: Option<u64>, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(txn) = txn {
            for id in self.lineage(txn) {
                let write = self
                    .txns
                    .get(&id)
                    .and_then(|slot| slot.writes.get(file))
                    .and_then(|overlay| overlay.get(key));
                if let Some(write) = write {
                    return write.clone();
                }
            }
        }
        self.files
            .get(file)
            .and_then(|entry| entry.records.get(key).cloned())
    }

    /// Records as seen from `txn`.
    fn view(&self, file: &FileKey, txn: Option<u64>) -> Cow<'_, Records> {
        let Some(entry) = self.files.get(file) else {
            return Cow::Owned(Records::new());
        };
        let Some(txn) = txn else {
            return Cow::Borrowed(&entry.records);
        };
        let mut lineage = self.lineage(txn);
        lineage.reverse();
        let overlays: Vec<&Overlay> = lineage
            .iter()
            .filter_map(|id| self.txns.get(id)?.writes.get(file))
            .collect();
        if overlays.is_empty() {
            return Cow::Borrowed(&entry.records);
        }
        let mut merged = entry.records.clone();
        for overlay in overlays {
            for (key, write) in overlay {
                match write {
                    Some(value) => {
                        merged.insert(key.clone(), value.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }
        Cow::Owned(merged)
    }

    fn lock(&mut self, file: &FileKey, txn: Option<u64>, key: &[u8]) -> Result<(), c_int> {
        let lineage = txn.map(|id| self.lineage(id)).unwrap_or_default();
        let nowait = txn
            .and_then(|id| self.txns.get(&id))
            .map_or(false, |slot| slot.nowait);
        let entry = self.files.get_mut(file).ok_or(EINVAL)?;
        match entry.locks.get(key) {
            Some(owner) if lineage.contains(owner) => Ok(()),
            Some(owner) => {
                trace!("key locked by transaction {}", owner);
                Err(if nowait {
                    DB_LOCK_NOTGRANTED
                } else {
                    DB_LOCK_DEADLOCK
                })
            }
            None => {
                if let Some(id) = txn {
                    entry.locks.insert(key.to_vec(), id);
                }
                Ok(())
            }
        }
    }

    fn write(&mut self, file: &FileKey, txn: Option<u64>, key: Vec<u8>, value: Option<Vec<u8>>) {
        if let Some(slot) = txn.and_then(|id| self.txns.get_mut(&id)) {
            slot.writes
                .entry(file.clone())
                .or_default()
                .insert(key, value);
            return;
        }
        if let Some(entry) = self.files.get_mut(file) {
            match value {
                Some(value) => {
                    entry.records.insert(key, value);
                }
                None => {
                    entry.records.remove(&key);
                }
            }
        }
    }

    fn release_locks(&mut self, txn: u64) {
        for entry in self.files.values_mut() {
            entry.locks.retain(|_, owner| *owner != txn);
        }
    }

    fn transfer_locks(&mut self, from: u64, to: u64) {
        for entry in self.files.values_mut() {
            for owner in entry.locks.values_mut() {
                if *owner == from {
                    *owner = to;
                }
            }
        }
    }

    /// Aborts `txn` and every descendant.
    fn discard(&mut self, txn: u64) {
        for child in self.children_of(txn) {
            self.discard(child);
        }
        self.txns.remove(&txn);
        self.release_locks(txn);
        self.cursors.retain(|_, cursor| cursor.txn != Some(txn));
    }

    fn env_create(&mut self) -> RawEnv {
        let id = self.next_id();
        self.envs.insert(
            id.get(),
            EnvSlot {
                home: None,
                flags: DbFlags::empty(),
            },
        );
        RawEnv::from_raw(id)
    }

    fn env_open(&mut self, env: RawEnv, home: &Path, flags: DbFlags) -> Result<(), c_int> {
        let id = env.as_raw().get();
        match self.envs.get(&id) {
            Some(slot) if slot.home.is_none() => {}
            _ => return Err(EINVAL),
        }
        self.fault(NativeOp::EnvOpen)?;
        let meta = std::fs::metadata(home).map_err(|err| err.raw_os_error().unwrap_or(ENOENT))?;
        if !meta.is_dir() {
            return Err(ENOTDIR);
        }
        let slot = self.envs.get_mut(&id).ok_or(EINVAL)?;
        slot.home = Some(home.to_path_buf());
        slot.flags = flags;
        Ok(())
    }

    fn env_close(&mut self, env: RawEnv) -> Result<(), c_int> {
        let id = env.as_raw().get();
        self.envs.remove(&id).ok_or(EINVAL)?;

        let txns: Vec<u64> = self
            .txns
            .iter()
            .filter(|(_, slot)| slot.env == id && slot.parent.is_none())
            .map(|(txn, _)| *txn)
            .collect();
        let dbs: Vec<u64> = self
            .dbs
            .iter()
            .filter(|(_, slot)| slot.env == Some(id))
            .map(|(db, _)| *db)
            .collect();
        let orphans = !txns.is_empty() || !dbs.is_empty();
        for txn in txns {
            self.discard(txn);
        }
        for db in dbs {
            self.dbs.remove(&db);
            self.cursors.retain(|_, cursor| cursor.db != db);
        }
        if orphans {
            Err(EINVAL)
        } else {
            Ok(())
        }
    }

    fn txn_begin(
        &mut self,
        env: RawEnv,
        parent: Option<RawTxn>,
        flags: DbFlags,
    ) -> Result<RawTxn, c_int> {
        let env = env.as_raw().get();
        if !self.env_has_txn(env) {
            return Err(EINVAL);
        }
        let parent = match parent {
            Some(parent) => {
                let id = parent.as_raw().get();
                match self.txns.get(&id) {
                    Some(slot) if slot.env == env => Some(id),
                    _ => return Err(EINVAL),
                }
            }
            None => None,
        };
        self.fault(NativeOp::TxnBegin)?;
        let id = self.next_id();
        self.txns.insert(
            id.get(),
            TxnSlot {
                env,
                parent,
                nowait: flags.contains(DbFlags::TXN_NOWAIT),
                writes: HashMap::new(),
            },
        );
        Ok(RawTxn::from_raw(id))
    }

    fn txn_commit(&mut self, txn: RawTxn) -> Result<(), c_int> {
        let id = txn.as_raw().get();
        if !self.txns.contains_key(&id) {
            return Err(EINVAL);
        }
        if let Err(rc) = self.fault(NativeOp::TxnCommit) {
            self.discard(id);
            return Err(rc);
        }
        if !self.children_of(id).is_empty() {
            self.discard(id);
            return Err(EINVAL);
        }
        let slot = self.txns.remove(&id).ok_or(EINVAL)?;
        self.cursors.retain(|_, cursor| cursor.txn != Some(id));
        match slot.parent {
            Some(parent) => {
                if let Some(parent_slot) = self.txns.get_mut(&parent) {
                    for (file, overlay) in slot.writes {
                        parent_slot.writes.entry(file).or_default().extend(overlay);
                    }
                }
                self.transfer_locks(id, parent);
            }
            None => {
                for (file, overlay) in slot.writes {
                    for (key, write) in overlay {
                        self.write(&file, None, key, write);
                    }
                }
                self.release_locks(id);
            }
        }
        Ok(())
    }

    fn txn_abort(&mut self, txn: RawTxn) -> Result<(), c_int> {
        let id = txn.as_raw().get();
        if !self.txns.contains_key(&id) {
            return Err(EINVAL);
        }
        self.discard(id);
        Ok(())
    }

    fn db_create(&mut self, env: Option<RawEnv>) -> Result<RawDb, c_int> {
        let env = match env {
            Some(env) => {
                let id = env.as_raw().get();
                match self.envs.get(&id) {
                    Some(slot) if slot.home.is_some() => Some(id),
                    _ => return Err(EINVAL),
                }
            }
            None => None,
        };
        let id = self.next_id();
        self.dbs.insert(
            id.get(),
            DbSlot {
                env,
                file: None,
                db_type: DbType::Unknown,
                flags: DbFlags::empty(),
            },
        );
        Ok(RawDb::from_raw(id))
    }

    fn db_open(
        &mut self,
        db: RawDb,
        txn: Option<RawTxn>,
        file: &Path,
        name: Option<&str>,
        db_type: DbType,
        flags: DbFlags,
    ) -> Result<(), c_int> {
        let id = db.as_raw().get();
        let env = match self.dbs.get(&id) {
            Some(slot) if slot.file.is_none() => slot.env,
            _ => return Err(EINVAL),
        };
        self.fault(NativeOp::DbOpen)?;

        let txn = self.check_txn(txn, env)?;
        if txn.is_some() || flags.contains(DbFlags::AUTO_COMMIT) {
            match env {
                Some(env) if self.env_has_txn(env) => {}
                _ => return Err(EINVAL),
            }
        }

        let path = match env.and_then(|env| self.envs.get(&env)?.home.clone()) {
            Some(home) if file.is_relative() => home.join(file),
            _ => file.to_path_buf(),
        };
        let key: FileKey = (path, name.map(str::to_string));

        let resolved = match self.files.get_mut(&key) {
            Some(entry) => {
                if flags.contains(DbFlags::CREATE | DbFlags::EXCL) {
                    return Err(EEXIST);
                }
                if db_type != DbType::Unknown && db_type != entry.db_type {
                    return Err(EINVAL);
                }
                if flags.contains(DbFlags::TRUNCATE) {
                    if flags.contains(DbFlags::RDONLY) || !entry.locks.is_empty() {
                        return Err(EINVAL);
                    }
                    entry.records.clear();
                }
                entry.db_type
            }
            None => {
                if !flags.contains(DbFlags::CREATE) || flags.contains(DbFlags::RDONLY) {
                    return Err(ENOENT);
                }
                if db_type == DbType::Unknown {
                    return Err(EINVAL);
                }
                debug!("creating {} database {:?}", db_type, key);
                self.files.insert(
                    key.clone(),
                    FileEntry {
                        db_type,
                        records: Records::new(),
                        locks: HashMap::new(),
                    },
                );
                db_type
            }
        };

        let slot = self.dbs.get_mut(&id).ok_or(EINVAL)?;
        slot.file = Some(key);
        slot.db_type = resolved;
        slot.flags = flags;
        Ok(())
    }

    fn db_close(&mut self, db: RawDb) -> Result<(), c_int> {
        let id = db.as_raw().get();
        self.dbs.remove(&id).ok_or(EINVAL)?;
        self.cursors.retain(|_, cursor| cursor.db != id);
        self.fault(NativeOp::DbClose)
    }

    fn db_get_type(&self, db: RawDb) -> Result<DbType, c_int> {
        Ok(self.opened(db.as_raw().get())?.db_type)
    }

    fn db_put(
        &mut self,
        db: RawDb,
        txn: Option<RawTxn>,
        key: &[u8],
        data: &[u8],
        flags: WriteFlags,
    ) -> Result<(), c_int> {
        let db = self.opened(db.as_raw().get())?;
        if db.flags.contains(DbFlags::RDONLY) {
            return Err(EACCES);
        }
        if data.is_empty() {
            return Err(EINVAL);
        }
        let txn = self.check_txn(txn, db.env)?;
        let key = encode_key(db.db_type, key)?;
        self.fault(NativeOp::DbPut)?;
        self.lock(&db.file, txn, &key)?;
        if flags.contains(WriteFlags::NO_OVERWRITE) && self.lookup(&db.file, txn, &key).is_some() {
            return Err(DB_KEYEXIST);
        }
        self.write(&db.file, txn, key, Some(data.to_vec()));
        Ok(())
    }

    fn db_get(&self, db: RawDb, txn: Option<RawTxn>, key: &[u8]) -> Result<Vec<u8>, c_int> {
        let db = self.opened(db.as_raw().get())?;
        let txn = self.check_txn(txn, db.env)?;
        let key = encode_key(db.db_type, key)?;
        self.lookup(&db.file, txn, &key).ok_or(DB_NOTFOUND)
    }

    fn db_del(&mut self, db: RawDb, txn: Option<RawTxn>, key: &[u8]) -> Result<(), c_int> {
        let db = self.opened(db.as_raw().get())?;
        if db.flags.contains(DbFlags::RDONLY) {
            return Err(EACCES);
        }
        let txn = self.check_txn(txn, db.env)?;
        let key = encode_key(db.db_type, key)?;
        self.fault(NativeOp::DbDel)?;
        self.lock(&db.file, txn, &key)?;
        if self.lookup(&db.file, txn, &key).is_none() {
            return Err(DB_NOTFOUND);
        }
        self.write(&db.file, txn, key, None);
        Ok(())
    }

    fn db_cursor(&mut self, db: RawDb, txn: Option<RawTxn>) -> Result<RawCursor, c_int> {
        let db_id = db.as_raw().get();
        let db = self.opened(db_id)?;
        let txn = self.check_txn(txn, db.env)?;
        self.fault(NativeOp::CursorOpen)?;
        let id = self.next_id();
        self.cursors.insert(
            id.get(),
            CursorSlot {
                db: db_id,
                txn,
                position: None,
            },
        );
        Ok(RawCursor::from_raw(id))
    }

    fn cursor_close(&mut self, cursor: RawCursor) -> Result<(), c_int> {
        self.cursors
            .remove(&cursor.as_raw().get())
            .ok_or(EINVAL)?;
        self.fault(NativeOp::CursorClose)
    }

    fn cursor_get(
        &mut self,
        cursor: RawCursor,
        search: &[u8],
        op: CursorOp,
    ) -> Result<(Vec<u8>, Vec<u8>), c_int> {
        let id = cursor.as_raw().get();
        let slot = self.cursors.get(&id).ok_or(EINVAL)?;
        let (txn, position) = (slot.txn, slot.position.clone());
        let db = self.opened(slot.db)?;
        if let Some(txn) = txn {
            if !self.txns.contains_key(&txn) {
                return Err(EINVAL);
            }
        }
        let search = if op.takes_key() {
            Some(encode_key(db.db_type, search)?)
        } else {
            None
        };

        let view = self.view(&db.file, txn);
        let found = match op {
            CursorOp::First => view.iter().next(),
            CursorOp::Last => view.iter().next_back(),
            CursorOp::Next => match &position {
                Some(pos) => view
                    .range::<[u8], _>((Bound::Excluded(pos.as_slice()), Bound::Unbounded))
                    .next(),
                None => view.iter().next(),
            },
            CursorOp::Prev => match &position {
                Some(pos) => view
                    .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(pos.as_slice())))
                    .next_back(),
                None => view.iter().next_back(),
            },
            CursorOp::Current => match &position {
                Some(pos) => match view.get_key_value(pos) {
                    Some(record) => Some(record),
                    None => return Err(DB_KEYEMPTY),
                },
                None => return Err(EINVAL),
            },
            CursorOp::Set => search.as_ref().and_then(|key| view.get_key_value(key)),
            CursorOp::SetRange => search.as_ref().and_then(|key| {
                view.range::<[u8], _>((Bound::Included(key.as_slice()), Bound::Unbounded))
                    .next()
            }),
        }
        .map(|(key, value)| (key.clone(), value.clone()));
        drop(view);

        let (key, value) = found.ok_or(DB_NOTFOUND)?;
        let decoded = decode_key(db.db_type, &key);
        if let Some(slot) = self.cursors.get_mut(&id) {
            slot.position = Some(key);
        }
        Ok((decoded, value))
    }
}

/// In-process store, see the module docs.
pub struct MemStore {
    state: Mutex<State>,
    allocator: TrackingAllocator,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        MemStore {
            state: Mutex::new(State::default()),
            allocator: TrackingAllocator::new(),
        }
    }

    /// Makes the next call of `op` return `code`.
    pub fn fail_next(&self, op: NativeOp, code: c_int) {
        self.state.lock().faults.insert(op, code);
    }

    pub fn stats(&self) -> MemStats {
        let state = self.state.lock();
        MemStats {
            environments: state.envs.len(),
            transactions: state.txns.len(),
            databases: state.dbs.len(),
            cursors: state.cursors.len(),
            files: state.files.len(),
            live_buffers: self.allocator.live_allocations(),
        }
    }

    pub fn tracking_allocator(&self) -> &TrackingAllocator {
        &self.allocator
    }

    /// Copies `bytes` into the store-allocated region of `dbt`.
    ///
    /// # Safety
    ///
    /// `dbt.data` must be null or memory from `self.allocator`.
    unsafe fn fill(&self, dbt: &mut Dbt, bytes: &[u8]) -> Result<(), c_int> {
        if !dbt.flags.contains(DbtFlags::REALLOC) {
            return Err(EINVAL);
        }
        let size = u32::try_from(bytes.len()).map_err(|_| DB_BUFFER_SMALL)?;
        let ptr = self.allocator.realloc(dbt.data, bytes.len());
        if ptr.is_null() {
            return Err(ENOMEM);
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        dbt.data = ptr;
        dbt.size = size;
        Ok(())
    }
}

impl Native for MemStore {
    fn env_create(&self, envp: &mut Option<RawEnv>) -> c_int {
        *envp = Some(self.state.lock().env_create());
        0
    }

    fn env_open(&self, env: RawEnv, home: &Path, flags: DbFlags, _mode: u32) -> c_int {
        status(self.state.lock().env_open(env, home, flags))
    }

    fn env_close(&self, env: RawEnv, _flags: DbFlags) -> c_int {
        status(self.state.lock().env_close(env))
    }

    fn txn_begin(
        &self,
        env: RawEnv,
        parent: Option<RawTxn>,
        txnp: &mut Option<RawTxn>,
        flags: DbFlags,
    ) -> c_int {
        match self.state.lock().txn_begin(env, parent, flags) {
            Ok(txn) => {
                *txnp = Some(txn);
                0
            }
            Err(rc) => rc,
        }
    }

    fn txn_commit(&self, txn: RawTxn, _flags: DbFlags) -> c_int {
        status(self.state.lock().txn_commit(txn))
    }

    fn txn_abort(&self, txn: RawTxn) -> c_int {
        status(self.state.lock().txn_abort(txn))
    }

    fn db_create(&self, dbp: &mut Option<RawDb>, env: Option<RawEnv>) -> c_int {
        match self.state.lock().db_create(env) {
            Ok(db) => {
                *dbp = Some(db);
                0
            }
            Err(rc) => rc,
        }
    }

    fn db_open(
        &self,
        db: RawDb,
        txn: Option<RawTxn>,
        file: &Path,
        name: Option<&str>,
        db_type: DbType,
        flags: DbFlags,
        _mode: u32,
    ) -> c_int {
        status(
            self.state
                .lock()
                .db_open(db, txn, file, name, db_type, flags),
        )
    }

    fn db_close(&self, db: RawDb, _flags: DbFlags) -> c_int {
        status(self.state.lock().db_close(db))
    }

    fn db_get_type(&self, db: RawDb, db_type: &mut DbType) -> c_int {
        match self.state.lock().db_get_type(db) {
            Ok(found) => {
                *db_type = found;
                0
            }
            Err(rc) => rc,
        }
    }

    unsafe fn db_put(
        &self,
        db: RawDb,
        txn: Option<RawTxn>,
        key: &Dbt,
        data: &Dbt,
        flags: WriteFlags,
    ) -> c_int {
        status(
            self.state
                .lock()
                .db_put(db, txn, key.as_slice(), data.as_slice(), flags),
        )
    }

    unsafe fn db_get(
        &self,
        db: RawDb,
        txn: Option<RawTxn>,
        key: &Dbt,
        data: &mut Dbt,
        _flags: DbFlags,
    ) -> c_int {
        let mut state = self.state.lock();
        let value = match state.db_get(db, txn, key.as_slice()) {
            Ok(value) => value,
            Err(rc) => return rc,
        };
        if let Err(rc) = self.fill(data, &value) {
            return rc;
        }
        status(state.fault(NativeOp::DbGet))
    }

    unsafe fn db_del(&self, db: RawDb, txn: Option<RawTxn>, key: &Dbt, _flags: DbFlags) -> c_int {
        status(self.state.lock().db_del(db, txn, key.as_slice()))
    }

    fn db_cursor(
        &self,
        db: RawDb,
        txn: Option<RawTxn>,
        cursorp: &mut Option<RawCursor>,
        _flags: DbFlags,
    ) -> c_int {
        match self.state.lock().db_cursor(db, txn) {
            Ok(cursor) => {
                *cursorp = Some(cursor);
                0
            }
            Err(rc) => rc,
        }
    }

    fn cursor_close(&self, cursor: RawCursor) -> c_int {
        status(self.state.lock().cursor_close(cursor))
    }

    unsafe fn cursor_get(
        &self,
        cursor: RawCursor,
        key: &mut Dbt,
        data: &mut Dbt,
        op: CursorOp,
    ) -> c_int {
        let search = key.as_slice().to_vec();
        let mut state = self.state.lock();
        let (found_key, found_value) = match state.cursor_get(cursor, &search, op) {
            Ok(record) => record,
            Err(rc) => return rc,
        };
        if let Err(rc) = self.fill(key, &found_key) {
            return rc;
        }
        if let Err(rc) = self.fill(data, &found_value) {
            return rc;
        }
        status(state.fault(NativeOp::CursorGet))
    }

    fn allocator(&self) -> &dyn NativeAllocator {
        &self.allocator
    }
}
