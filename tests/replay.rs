mod common;

use std::sync::atomic::Ordering;

use common::{Canned, MockServer};
use marlin::Session;

#[test]
fn transaction_replays_on_transient_failure() {
    let server = MockServer::start(vec![("INSERT INTO t VALUES (2)", Canned::DisconnectOnce)]);
    let mut opts = server.opts();
    opts.transaction_replay = true;

    let mut session = Session::connect(&opts).expect("connect");
    assert_eq!(server.connections.load(Ordering::Acquire), 1);

    session.query_drop("BEGIN").expect("begin");
    session
        .query_drop("INSERT INTO t VALUES (1)")
        .expect("first insert");

    // the server drops the connection at the second insert; the session
    // rebuilds itself and replays BEGIN + both inserts transparently
    session
        .query_drop("INSERT INTO t VALUES (2)")
        .expect("replayed insert");

    assert_eq!(server.connections.load(Ordering::Acquire), 2);
    assert!(!session.is_broken());
    assert!(session.context().in_transaction());

    session.query_drop("COMMIT").expect("commit");
    assert!(!session.context().in_transaction());
    session.close();
}

#[test]
fn failure_surfaces_when_replay_is_disabled() {
    let server = MockServer::start(vec![("INSERT INTO t VALUES (2)", Canned::DisconnectOnce)]);
    let opts = server.opts(); // transaction_replay defaults to off

    let mut session = Session::connect(&opts).expect("connect");
    session.query_drop("BEGIN").expect("begin");

    let err = session
        .query_drop("INSERT INTO t VALUES (2)")
        .unwrap_err();
    assert_eq!(err.sql_state(), "08000");
    assert!(session.is_broken());
    assert_eq!(server.connections.load(Ordering::Acquire), 1);
}

#[test]
fn replay_continues_after_commit_boundary() {
    // the disconnect happens outside any transaction: the redo log is
    // empty, so only the failed command itself is replayed
    let server = MockServer::start(vec![("UPDATE t SET a = 1", Canned::DisconnectOnce)]);
    let mut opts = server.opts();
    opts.transaction_replay = true;

    let mut session = Session::connect(&opts).expect("connect");
    session.query_drop("BEGIN").expect("begin");
    session.query_drop("COMMIT").expect("commit");

    session.query_drop("UPDATE t SET a = 1").expect("replayed update");
    assert_eq!(server.connections.load(Ordering::Acquire), 2);
    session.close();
}
