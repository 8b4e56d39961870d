mod common;

use std::net::TcpListener;
use std::time::{Duration, Instant};

use common::MockServer;
use marlin::{Error, Pool};

#[test]
fn acquire_and_release_cycle() {
    let server = MockServer::start(vec![]);
    let mut opts = server.opts();
    opts.max_pool_size = 4;
    opts.min_pool_size = Some(2);

    let pool = Pool::new(opts);

    let conn = pool.get_connection().expect("first acquire");
    assert!(conn.is_pooled());
    let stats = pool.stats();
    assert!(stats.total >= 1);
    assert!(stats.total <= 4);
    drop(conn);

    // the released connection is reused
    let mut conn = pool.get_connection().expect("second acquire");
    conn.ping().expect("ping through pool");
    drop(conn);

    pool.close();
}

#[test]
fn warmup_reaches_minimum_size() {
    let server = MockServer::start(vec![]);
    let mut opts = server.opts();
    opts.max_pool_size = 5;
    opts.min_pool_size = Some(3);

    let pool = Pool::new(opts);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = pool.stats();
        if stats.total >= 3 {
            assert!(stats.total <= 5);
            break;
        }
        assert!(Instant::now() < deadline, "pool never warmed up: {stats:?}");
        std::thread::sleep(Duration::from_millis(20));
    }

    pool.close();
}

#[test]
fn acquire_times_out_when_server_is_down() {
    // a port with nothing listening: bind, note the port, drop the listener
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let mut opts = marlin::Opts::default();
    opts.host = "127.0.0.1".to_string();
    opts.port = port;
    opts.user = "app".to_string();
    opts.max_pool_size = 5;
    opts.min_pool_size = Some(2);
    opts.connect_timeout = Duration::from_millis(400);

    let pool = Pool::new(opts);

    let started = Instant::now();
    let err = pool.get_connection().unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.sql_state(), "08000");
    assert_eq!(
        err.to_string(),
        "No connection available within the specified time"
    );
    // fails within the configured timeout, give or take scheduling
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    assert_eq!(pool.stats().pending, 0);

    pool.close();
}

#[test]
fn dead_local_socket_yields_repeated_connection_errors() {
    let mut opts = marlin::Opts::default();
    opts.socket = Some("/nonexistent/marlin-pool.sock".to_string());
    opts.user = "app".to_string();
    opts.max_pool_size = 2;
    opts.min_pool_size = Some(1);
    opts.connect_timeout = Duration::from_millis(150);

    let pool = Pool::new(opts);

    for _ in 0..10 {
        let err = pool.get_connection().unwrap_err();
        assert_eq!(err.sql_state(), "08000");
    }
    assert_eq!(pool.stats().pending, 0);
    assert_eq!(pool.stats().total, 0);

    pool.close();
}

#[test]
fn cross_credential_acquire_is_not_pooled() {
    let server = MockServer::start(vec![]);
    let mut opts = server.opts();
    opts.max_pool_size = 2;
    opts.min_pool_size = Some(1);

    let pool = Pool::new(opts);

    let conn = pool
        .get_connection_as("reporting", Some("other-secret"))
        .expect("cross-credential acquire");
    assert!(!conn.is_pooled());

    let total_before = pool.stats().total;
    drop(conn); // closed, not returned
    assert_eq!(pool.stats().total, total_before);

    pool.close();
}

#[test]
fn closed_pool_rejects_acquire() {
    let server = MockServer::start(vec![]);
    let mut opts = server.opts();
    opts.max_pool_size = 2;

    let pool = Pool::new(opts);
    pool.close();

    let err = pool.get_connection().unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(err.sql_state(), "08000");
}

#[test]
fn get_or_create_shares_by_configuration() {
    let server = MockServer::start(vec![]);
    let mut opts = server.opts();
    opts.pool_name = Some("shared".to_string());

    let first = Pool::get_or_create(&opts);
    let second = Pool::get_or_create(&opts);
    assert_eq!(first.tag(), second.tag());

    first.close();
}
