use std::sync::Arc;

use bdbwrap::constants::{DB_LOCK_NOTGRANTED, DB_RUNRECOVERY, EACCES, EINVAL, ENOENT};
use bdbwrap::{
    Backend, Database, DbFlags, DbType, Environment, Error, Handle, MemStats, MemStore, Misuse,
    NativeOp, TxnState, WriteFlags, DEFAULT_MODE,
};
use tempfile::TempDir;

const TXN_ENV: DbFlags = DbFlags::CREATE
    .union(DbFlags::INIT_LOCK)
    .union(DbFlags::INIT_LOG)
    .union(DbFlags::INIT_MPOOL)
    .union(DbFlags::INIT_TXN);

struct Fixture {
    _dir: TempDir,
    store: Arc<MemStore>,
    env: Environment,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemStore::new());
    let backend = Backend::new(Arc::clone(&store));
    let env = Environment::open(&backend, dir.path(), TXN_ENV, DEFAULT_MODE).unwrap();
    Fixture {
        _dir: dir,
        store,
        env,
    }
}

fn open(env: &Environment, file: &str) -> Database {
    env.open_database(None, file, None, DbType::BTree, DbFlags::CREATE, DEFAULT_MODE)
        .unwrap()
}

#[test]
fn transaction_finalizes_once() {
    let fx = fixture();
    let db = open(&fx.env, "once.db");

    let mut txn = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    assert!(txn.id().is_some());
    db.put(Some(&txn), b"k", b"v", WriteFlags::empty()).unwrap();
    txn.commit(DbFlags::empty()).unwrap();
    assert_eq!(txn.state(), TxnState::Committed);
    assert_eq!(txn.id(), None);

    let finalized = Err(Error::Misuse(Misuse::AlreadyFinalized));
    assert_eq!(txn.commit(DbFlags::empty()), finalized);
    assert_eq!(txn.abort(), finalized);
    assert_eq!(txn.state(), TxnState::Committed);

    // A retired transaction is not forwarded to the store
    assert_eq!(
        db.get(Some(&txn), b"k", DbFlags::empty()),
        Err(Error::Misuse(Misuse::AlreadyFinalized))
    );
    assert_eq!(db.get(None, b"k", DbFlags::empty()).unwrap(), b"v");

    let mut aborted = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    aborted.abort().unwrap();
    assert_eq!(aborted.commit(DbFlags::empty()), finalized);
    assert_eq!(aborted.state(), TxnState::Aborted);
    assert_eq!(fx.store.stats().transactions, 0);
}

#[test]
fn cursor_close_is_idempotent() {
    let fx = fixture();
    let db = open(&fx.env, "cursor.db");
    db.put(None, b"k", b"v", WriteFlags::empty()).unwrap();

    let mut cursor = db.cursor(None, DbFlags::empty()).unwrap();
    assert_eq!(fx.store.stats().cursors, 1);
    cursor.close().unwrap();
    assert!(cursor.is_closed());
    cursor.close().unwrap();
    assert_eq!(fx.store.stats().cursors, 0);

    assert_eq!(
        cursor.first(),
        Err(Error::Misuse(Misuse::AlreadyClosed(Handle::Cursor)))
    );
    assert_eq!(
        cursor.set(b"k"),
        Err(Error::Misuse(Misuse::AlreadyClosed(Handle::Cursor)))
    );
}

#[test]
fn dropped_handles_release_native_resources() {
    let fx = fixture();
    {
        let db = open(&fx.env, "drop.db");
        let _txn = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
        let _cursor = db.cursor(None, DbFlags::empty()).unwrap();
        let stats = fx.store.stats();
        assert_eq!((stats.databases, stats.transactions, stats.cursors), (1, 1, 1));
    }
    let stats = fx.store.stats();
    assert_eq!((stats.databases, stats.transactions, stats.cursors), (0, 0, 0));
}

#[test]
fn environment_close_refused_while_dependents_open() {
    let mut fx = fixture();
    let mut db = open(&fx.env, "deps.db");
    let mut txn = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();

    assert_eq!(
        fx.env.close(DbFlags::empty()),
        Err(Error::Misuse(Misuse::DependentsOpen { txns: 1, dbs: 1 }))
    );
    assert!(!fx.env.is_closed());

    txn.abort().unwrap();
    db.close(DbFlags::empty()).unwrap();
    fx.env.close(DbFlags::empty()).unwrap();
    assert!(fx.env.is_closed());
    fx.env.close(DbFlags::empty()).unwrap();

    assert_eq!(
        fx.env.begin_transaction(None, DbFlags::empty()).unwrap_err(),
        Error::Misuse(Misuse::AlreadyClosed(Handle::Environment))
    );
    assert_eq!(fx.store.stats(), MemStats {
        files: 1,
        ..MemStats::default()
    });
}

#[test]
fn flags_are_checked_per_operation() {
    let fx = fixture();
    let backend = fx.env.backend().clone();

    let err = Environment::open(&backend, fx.env.home(), DbFlags::TRUNCATE, DEFAULT_MODE)
        .unwrap_err();
    assert!(matches!(err, Error::Misuse(Misuse::InvalidFlags { .. })));

    // AUTO_COMMIT needs an environment
    let err = Database::open(
        &backend,
        None,
        None,
        "auto.db",
        None,
        DbType::BTree,
        DbFlags::CREATE | DbFlags::AUTO_COMMIT,
        DEFAULT_MODE,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Misuse(Misuse::InvalidFlags { .. })));

    let err = fx
        .env
        .begin_transaction(None, DbFlags::CREATE)
        .unwrap_err();
    assert!(matches!(err, Error::Misuse(Misuse::InvalidFlags { .. })));

    let err = fx
        .env
        .open_database(None, "x.db", None, DbType::Unknown, DbFlags::CREATE, DEFAULT_MODE)
        .unwrap_err();
    assert_eq!(err, Error::Misuse(Misuse::UnknownType));

    let mut txn = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    let err = fx
        .env
        .open_database(
            Some(&txn),
            "x.db",
            None,
            DbType::BTree,
            DbFlags::CREATE | DbFlags::TRUNCATE,
            DEFAULT_MODE,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Misuse(Misuse::InvalidFlags { .. })));

    // Invalid commit flags leave the transaction usable
    assert!(txn.commit(DbFlags::CREATE).is_err());
    assert!(txn.is_active());
    txn.commit(DbFlags::TXN_SYNC).unwrap();
}

#[test]
fn transaction_requires_matching_environment() {
    let fx = fixture();
    let other = fixture();
    let db = open(&fx.env, "mine.db");
    let foreign = other.env.begin_transaction(None, DbFlags::empty()).unwrap();
    assert_eq!(
        db.put(Some(&foreign), b"k", b"v", WriteFlags::empty()),
        Err(Error::Misuse(Misuse::EnvironmentMismatch))
    );

    let standalone = Database::open(
        fx.env.backend(),
        None,
        None,
        "standalone.db",
        None,
        DbType::BTree,
        DbFlags::CREATE,
        DEFAULT_MODE,
    )
    .unwrap();
    let txn = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    assert_eq!(
        standalone.put(Some(&txn), b"k", b"v", WriteFlags::empty()),
        Err(Error::Misuse(Misuse::TransactionWithoutEnvironment))
    );
}

#[test]
fn failed_open_closes_created_handle() {
    let fx = fixture();
    fx.store.fail_next(NativeOp::DbOpen, EACCES);

    let err = fx
        .env
        .open_database(None, "denied.db", None, DbType::BTree, DbFlags::CREATE, DEFAULT_MODE)
        .unwrap_err();
    assert_eq!(err.code(), Some(EACCES));
    assert_eq!(fx.store.stats().databases, 0);

    // Missing file without CREATE fails the same way
    let err = fx
        .env
        .open_database(None, "missing.db", None, DbType::BTree, DbFlags::empty(), DEFAULT_MODE)
        .unwrap_err();
    assert_eq!(err.code(), Some(ENOENT));
    assert_eq!(fx.store.stats().databases, 0);

    // Nothing is left behind that would block closing the environment
    let mut env = fx.env;
    env.close(DbFlags::empty()).unwrap();
}

#[test]
fn failed_get_still_frees_store_buffer() {
    let fx = fixture();
    let db = open(&fx.env, "buffers.db");
    db.put(None, b"k", b"value", WriteFlags::empty()).unwrap();

    fx.store.fail_next(NativeOp::DbGet, EINVAL);
    assert!(db.get(None, b"k", DbFlags::empty()).is_err());
    assert!(fx.store.tracking_allocator().total_allocations() > 0);
    assert_eq!(fx.store.stats().live_buffers, 0);

    let mut cursor = db.cursor(None, DbFlags::empty()).unwrap();
    fx.store.fail_next(NativeOp::CursorGet, EINVAL);
    assert!(cursor.first().is_err());
    assert_eq!(fx.store.stats().live_buffers, 0);

    assert_eq!(cursor.first().unwrap(), (b"k".to_vec(), b"value".to_vec()));
    assert_eq!(fx.store.stats().live_buffers, 0);
}

#[test]
fn run_recovery_poisons_environment() {
    let fx = fixture();
    let mut db = open(&fx.env, "fatal.db");
    db.put(None, b"k", b"v", WriteFlags::empty()).unwrap();
    let mut txn = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();

    fx.store.fail_next(NativeOp::DbPut, DB_RUNRECOVERY);
    let err = db.put(None, b"k2", b"v", WriteFlags::empty()).unwrap_err();
    assert_eq!(err, Error::RunRecovery);
    assert!(err.is_fatal());
    assert!(fx.env.needs_recovery());

    // Refused locally from now on
    assert_eq!(db.get(None, b"k", DbFlags::empty()), Err(Error::RunRecovery));
    assert_eq!(
        fx.env.begin_transaction(None, DbFlags::empty()).unwrap_err(),
        Error::RunRecovery
    );

    // Commit turns into a native abort
    assert_eq!(txn.commit(DbFlags::empty()), Err(Error::RunRecovery));
    assert_eq!(txn.state(), TxnState::Aborted);
    assert_eq!(fx.store.stats().transactions, 0);

    // Handles can still be released
    db.close(DbFlags::empty()).unwrap();
    let mut env = fx.env;
    env.close(DbFlags::empty()).unwrap();
}

#[test]
fn nested_transaction_commits_into_parent() {
    let fx = fixture();
    let db = open(&fx.env, "nested.db");

    let mut parent = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    let mut child = fx
        .env
        .begin_transaction(Some(&parent), DbFlags::empty())
        .unwrap();
    assert!(child.is_nested());
    db.put(Some(&child), b"k", b"v", WriteFlags::empty()).unwrap();

    // The parent is suspended while the child is active
    assert!(db.get(Some(&parent), b"k", DbFlags::empty()).is_err());

    child.commit(DbFlags::empty()).unwrap();
    assert_eq!(db.get(Some(&parent), b"k", DbFlags::empty()).unwrap(), b"v");
    assert_eq!(db.get(None, b"k", DbFlags::empty()), Err(Error::NotFound));

    parent.commit(DbFlags::empty()).unwrap();
    assert_eq!(db.get(None, b"k", DbFlags::empty()).unwrap(), b"v");
}

#[test]
fn nested_abort_leaves_parent_untouched() {
    let fx = fixture();
    let db = open(&fx.env, "nested_abort.db");

    let mut parent = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    db.put(Some(&parent), b"a", b"1", WriteFlags::empty()).unwrap();
    let mut child = fx
        .env
        .begin_transaction(Some(&parent), DbFlags::empty())
        .unwrap();
    db.put(Some(&child), b"b", b"2", WriteFlags::empty()).unwrap();
    assert_eq!(db.get(Some(&child), b"a", DbFlags::empty()).unwrap(), b"1");
    child.abort().unwrap();

    assert_eq!(db.get(Some(&parent), b"b", DbFlags::empty()), Err(Error::NotFound));
    parent.commit(DbFlags::empty()).unwrap();
    assert_eq!(db.get(None, b"a", DbFlags::empty()).unwrap(), b"1");
    assert_eq!(db.get(None, b"b", DbFlags::empty()), Err(Error::NotFound));
}

#[test]
fn parent_commit_waits_for_children() {
    let fx = fixture();
    let db = open(&fx.env, "children.db");

    let mut parent = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    let mut child = fx
        .env
        .begin_transaction(Some(&parent), DbFlags::empty())
        .unwrap();
    db.put(Some(&child), b"k", b"v", WriteFlags::empty()).unwrap();

    assert_eq!(
        parent.commit(DbFlags::empty()),
        Err(Error::Misuse(Misuse::ActiveChildren(1)))
    );
    assert!(parent.is_active());
    assert!(child.is_active());

    child.commit(DbFlags::empty()).unwrap();
    parent.commit(DbFlags::empty()).unwrap();
    assert_eq!(db.get(None, b"k", DbFlags::empty()).unwrap(), b"v");
}

#[test]
fn parent_abort_ends_active_children() {
    let fx = fixture();
    let mut db = open(&fx.env, "orphans.db");
    db.put(None, b"a", b"1", WriteFlags::empty()).unwrap();

    let mut parent = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    let mut child = fx
        .env
        .begin_transaction(Some(&parent), DbFlags::empty())
        .unwrap();
    let grandchild = fx
        .env
        .begin_transaction(Some(&child), DbFlags::empty())
        .unwrap();
    {
        let mut cursor = db.cursor(Some(&grandchild), DbFlags::empty()).unwrap();
        assert_eq!(cursor.first().unwrap().0, b"a");

        parent.abort().unwrap();
        let stats = fx.store.stats();
        assert_eq!((stats.transactions, stats.cursors), (0, 0));

        // The cursor went with its transaction
        assert_eq!(
            cursor.first(),
            Err(Error::Misuse(Misuse::AlreadyFinalized))
        );
        cursor.close().unwrap();
    }

    assert!(!child.is_active());
    assert_eq!(child.state(), TxnState::Aborted);
    assert_eq!(child.id(), None);
    assert_eq!(grandchild.id(), None);

    let finalized = Err(Error::Misuse(Misuse::AlreadyFinalized));
    assert_eq!(
        db.put(Some(&grandchild), b"b", b"2", WriteFlags::empty()),
        finalized
    );
    assert_eq!(child.commit(DbFlags::empty()), finalized);
    assert_eq!(child.abort(), finalized);
    drop(grandchild);

    db.close(DbFlags::empty()).unwrap();
    let mut env = fx.env;
    env.close(DbFlags::empty()).unwrap();
}

#[test]
fn dropped_environment_waits_for_dependents() {
    let Fixture {
        _dir: dir,
        store,
        env,
    } = fixture();
    let mut db = open(&env, "orphan.db");
    let mut txn = env.begin_transaction(None, DbFlags::empty()).unwrap();
    drop(env);

    // The native environment outlives the handle until its dependents end
    assert_eq!(store.stats().environments, 1);

    let closed = Err(Error::Misuse(Misuse::AlreadyClosed(Handle::Environment)));
    assert_eq!(db.put(None, b"k", b"v", WriteFlags::empty()), closed);
    assert_eq!(
        db.get(None, b"k", DbFlags::empty()),
        Err(Error::Misuse(Misuse::AlreadyClosed(Handle::Environment)))
    );
    assert_eq!(txn.commit(DbFlags::empty()), closed);
    assert_eq!(txn.state(), TxnState::Aborted);
    assert_eq!(store.stats().transactions, 0);
    assert_eq!(store.stats().environments, 1);

    db.close(DbFlags::empty()).unwrap();
    assert_eq!(store.stats(), MemStats {
        files: 1,
        ..MemStats::default()
    });
    drop(dir);
}

#[test]
fn conflicting_writers_see_deadlock() {
    let fx = fixture();
    let db = open(&fx.env, "locks.db");

    let mut first = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    let mut second = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    db.put(Some(&first), b"k", b"1", WriteFlags::empty()).unwrap();

    let err = db
        .put(Some(&second), b"k", b"2", WriteFlags::empty())
        .unwrap_err();
    assert_eq!(err, Error::Deadlock);
    assert!(err.is_retryable());
    assert_eq!(
        db.put(None, b"k", b"3", WriteFlags::empty()),
        Err(Error::Deadlock)
    );

    second.abort().unwrap();
    first.commit(DbFlags::empty()).unwrap();

    // Locks are gone after commit
    db.put(None, b"k", b"4", WriteFlags::empty()).unwrap();
    assert_eq!(db.get(None, b"k", DbFlags::empty()).unwrap(), b"4");
}

#[test]
fn nowait_writer_is_not_granted() {
    let fx = fixture();
    let db = open(&fx.env, "nowait.db");

    let mut holder = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    let mut waiter = fx
        .env
        .begin_transaction(None, DbFlags::TXN_NOWAIT)
        .unwrap();
    db.put(Some(&holder), b"k", b"1", WriteFlags::empty()).unwrap();

    let err = db
        .put(Some(&waiter), b"k", b"2", WriteFlags::empty())
        .unwrap_err();
    assert_eq!(err.code(), Some(DB_LOCK_NOTGRANTED));
    assert!(!err.is_retryable());

    waiter.abort().unwrap();
    holder.commit(DbFlags::empty()).unwrap();
    assert_eq!(db.get(None, b"k", DbFlags::empty()).unwrap(), b"1");
}

#[test]
fn cursor_inside_transaction_sees_its_writes() {
    let fx = fixture();
    let db = open(&fx.env, "txn_cursor.db");
    db.put(None, b"a", b"1", WriteFlags::empty()).unwrap();
    db.put(None, b"c", b"3", WriteFlags::empty()).unwrap();

    let mut txn = fx.env.begin_transaction(None, DbFlags::empty()).unwrap();
    db.put(Some(&txn), b"b", b"2", WriteFlags::empty()).unwrap();
    db.del(Some(&txn), b"c", DbFlags::empty()).unwrap();
    {
        let mut cursor = db.cursor(Some(&txn), DbFlags::empty()).unwrap();
        let mut keys = vec![cursor.first().unwrap().0];
        while let Ok((key, _)) = cursor.next() {
            keys.push(key);
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
        cursor.close().unwrap();
    }
    txn.abort().unwrap();

    let mut cursor = db.cursor(None, DbFlags::empty()).unwrap();
    assert_eq!(cursor.last().unwrap().0, b"c");
}

#[test]
fn reopen_with_other_type_is_rejected() {
    let fx = fixture();
    let mut db = open(&fx.env, "typed.db");
    db.close(DbFlags::empty()).unwrap();

    let err = fx
        .env
        .open_database(None, "typed.db", None, DbType::Hash, DbFlags::empty(), DEFAULT_MODE)
        .unwrap_err();
    assert_eq!(err.code(), Some(EINVAL));

    let err = fx
        .env
        .open_database(
            None,
            "typed.db",
            None,
            DbType::BTree,
            DbFlags::CREATE | DbFlags::EXCL,
            DEFAULT_MODE,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Store { .. }));
}

#[test]
fn missing_home_directory_fails_open() {
    let dir = TempDir::new().unwrap();
    let err = Environment::open(
        &Backend::memory(),
        dir.path().join("absent"),
        TXN_ENV,
        DEFAULT_MODE,
    )
    .unwrap_err();
    assert_eq!(err.code(), Some(ENOENT));
}

#[test]
fn open_close_cycles_do_not_leak() {
    let fx = fixture();
    for i in 0..10_000u32 {
        let mut db = open(&fx.env, "cycles.db");
        db.put(None, &i.to_be_bytes(), b"value", WriteFlags::empty())
            .unwrap();
        assert_eq!(db.get(None, &i.to_be_bytes(), DbFlags::empty()).unwrap(), b"value");
        {
            let mut cursor = db.cursor(None, DbFlags::empty()).unwrap();
            cursor.first().unwrap();
            cursor.close().unwrap();
        }
        db.close(DbFlags::empty()).unwrap();
    }

    let stats = fx.store.stats();
    assert_eq!(stats.databases, 0);
    assert_eq!(stats.cursors, 0);
    assert_eq!(stats.live_buffers, 0);
    assert_eq!(fx.store.tracking_allocator().live_bytes(), 0);
}
