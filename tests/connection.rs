mod common;

use common::{Canned, MockServer};
use marlin::constant::ColumnType;
use marlin::{Error, Session};

#[test]
fn handshake_and_text_query() {
    let server = MockServer::start(vec![(
        "SELECT id, name FROM user",
        Canned::Rows {
            columns: vec![
                ("id", ColumnType::MYSQL_TYPE_LONG),
                ("name", ColumnType::MYSQL_TYPE_VARCHAR),
            ],
            rows: vec![
                vec![Some("1".into()), Some("ada".into())],
                vec![Some("2".into()), None],
            ],
        },
    )]);

    let mut session = Session::connect(&server.opts()).expect("connect");
    assert_eq!(session.context().server_version.major, 11);
    assert!(session.context().server_version.mariadb);
    assert_eq!(session.context().max_allowed_packet, 16_777_216);
    assert_eq!(session.context().wait_timeout, Some(28_800));

    let results = session.query("SELECT id, name FROM user").expect("query");
    assert_eq!(results.len(), 1);
    let mut rs = results.into_iter().next().unwrap().into_result_set().unwrap();
    assert_eq!(rs.len(), 2);

    let row = rs.next_row().unwrap();
    assert_eq!(row.get::<i32>(0).unwrap(), 1);
    assert_eq!(row.get_by_label::<String>("name").unwrap(), "ada");

    let row = rs.next_row().unwrap();
    assert_eq!(row.get::<Option<String>>(1).unwrap(), None);

    session.close();
}

#[test]
fn server_error_leaves_session_usable() {
    let server = MockServer::start(vec![(
        "SELECT boom",
        Canned::Error {
            code: 1064,
            state: "42000",
            message: "You have an error in your SQL syntax",
        },
    )]);

    let mut session = Session::connect(&server.opts()).expect("connect");

    let err = session.query("SELECT boom").unwrap_err();
    match &err {
        Error::Server(e) => {
            assert_eq!(e.error_code, 1064);
            assert_eq!(e.sql_state, "42000");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.sql_state(), "42000");
    assert!(!session.is_broken());

    // the session survives a plain server error
    session.query_drop("SELECT 1").expect("follow-up query");
    session.close();
}

#[test]
fn multi_result_streaming_of_statuses() {
    let server = MockServer::start(vec![(
        "CALL report()",
        Canned::Multi(vec![
            Canned::Rows {
                columns: vec![("total", ColumnType::MYSQL_TYPE_LONGLONG)],
                rows: vec![vec![Some("7".into())]],
            },
            Canned::Ok {
                affected: 3,
                last_insert_id: 0,
            },
        ]),
    )]);

    let mut session = Session::connect(&server.opts()).expect("connect");
    let results = session.query("CALL report()").expect("multi-result query");
    assert_eq!(results.len(), 2);

    let rs = results[0].as_result_set().expect("first result is rows");
    assert_eq!(rs.row(0).unwrap().get::<i64>(0).unwrap(), 7);
    assert_eq!(results[1].as_ok().expect("second result is OK").affected_rows, 3);
    session.close();
}

#[test]
fn prepared_statement_binary_rows_and_cache() {
    let sql = "SELECT id, name FROM user WHERE id = ?";
    let server = MockServer::start(vec![(
        sql,
        Canned::Rows {
            columns: vec![
                ("id", ColumnType::MYSQL_TYPE_LONG),
                ("name", ColumnType::MYSQL_TYPE_VARCHAR),
            ],
            rows: vec![vec![Some("5".into()), Some("grace".into())]],
        },
    )]);

    let mut session = Session::connect(&server.opts()).expect("connect");

    let stmt = session.prepare(sql).expect("prepare");
    assert_eq!(stmt.num_params(), 1);
    assert_eq!(stmt.columns().len(), 2);

    let results = session
        .execute_prepared(&stmt, &[5.into()])
        .expect("execute");
    let rs = results[0].as_result_set().expect("rows");
    let row = rs.row(0).unwrap();
    assert_eq!(row.get::<i32>(0).unwrap(), 5);
    assert_eq!(row.get::<String>(1).unwrap(), "grace");

    // a second prepare of the same SQL is served from the cache
    let again = session.prepare(sql).expect("cached prepare");
    assert_eq!(server.prepares.load(std::sync::atomic::Ordering::Acquire), 1);

    session.close_statement(again).expect("close statement");
    session.close_statement(stmt).expect("close statement");
    session.close();
}

#[test]
fn parameter_count_mismatch_is_rejected() {
    let server = MockServer::start(vec![]);
    let mut session = Session::connect(&server.opts()).expect("connect");

    let stmt = session.prepare("INSERT INTO t VALUES (?, ?)").expect("prepare");
    let err = session.execute_prepared(&stmt, &[1.into()]).unwrap_err();
    assert!(matches!(err, Error::BadUsage(_)));
    session.close();
}

#[test]
fn streaming_query_fetches_in_batches() {
    let rows: Vec<Vec<Option<String>>> =
        (0..10).map(|i| vec![Some(i.to_string())]).collect();
    let server = MockServer::start(vec![(
        "SELECT n FROM seq",
        Canned::Rows {
            columns: vec![("n", ColumnType::MYSQL_TYPE_LONG)],
            rows,
        },
    )]);

    let mut session = Session::connect(&server.opts()).expect("connect");
    let mut stream = session
        .query_streaming("SELECT n FROM seq", 3)
        .expect("streaming query");

    let mut seen = Vec::new();
    while let Some(row) = stream.next_row().expect("next row") {
        seen.push(row.get::<i32>(0).unwrap());
    }
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
    stream.close().expect("close stream");

    // socket is command-ready again
    session.ping().expect("ping after stream");
    session.close();
}

#[test]
fn streaming_drop_drains_socket() {
    let rows: Vec<Vec<Option<String>>> =
        (0..50).map(|i| vec![Some(i.to_string())]).collect();
    let server = MockServer::start(vec![(
        "SELECT n FROM seq",
        Canned::Rows {
            columns: vec![("n", ColumnType::MYSQL_TYPE_LONG)],
            rows,
        },
    )]);

    let mut session = Session::connect(&server.opts()).expect("connect");
    {
        let mut stream = session
            .query_streaming("SELECT n FROM seq", 4)
            .expect("streaming query");
        // read a couple of rows, then abandon the stream
        stream.next_row().expect("row").expect("some row");
        stream.next_row().expect("row").expect("some row");
    }
    session.ping().expect("ping after abandoned stream");
    session.close();
}

#[test]
fn pipelined_queries_read_in_order() {
    let server = MockServer::start(vec![
        (
            "SELECT 1",
            Canned::Rows {
                columns: vec![("1", ColumnType::MYSQL_TYPE_LONGLONG)],
                rows: vec![vec![Some("1".into())]],
            },
        ),
        (
            "SELECT 2",
            Canned::Rows {
                columns: vec![("2", ColumnType::MYSQL_TYPE_LONGLONG)],
                rows: vec![vec![Some("2".into())]],
            },
        ),
    ]);

    let mut session = Session::connect(&server.opts()).expect("connect");
    let all = session
        .pipeline(&["SELECT 1", "DO 0", "SELECT 2"])
        .expect("pipeline");
    assert_eq!(all.len(), 3);

    let first = all[0][0].as_result_set().expect("rows");
    assert_eq!(first.row(0).unwrap().get::<i64>(0).unwrap(), 1);
    assert!(all[1][0].as_ok().is_some());
    let third = all[2][0].as_result_set().expect("rows");
    assert_eq!(third.row(0).unwrap().get::<i64>(0).unwrap(), 2);
    session.close();
}

#[test]
fn ping_reset_and_utility_commands() {
    let server = MockServer::start(vec![]);
    let mut opts = server.opts();
    opts.use_reset_connection = true;

    let mut session = Session::connect(&opts).expect("connect");
    session.ping().expect("ping");
    session.reset().expect("reset");
    session.set_multi_statements(true).expect("set option");
    session.close();
}

#[test]
fn connect_to_dead_socket_is_connection_class() {
    let mut opts = marlin::Opts::default();
    opts.socket = Some("/nonexistent/marlin-test.sock".to_string());
    let err = Session::connect(&opts).unwrap_err();
    assert_eq!(err.sql_state(), "08000");
}

#[test]
fn run_prepared_client_side_substitution() {
    let server = MockServer::start(vec![(
        "SELECT id FROM user WHERE name = 'o\\'hare'",
        Canned::Rows {
            columns: vec![("id", ColumnType::MYSQL_TYPE_LONG)],
            rows: vec![vec![Some("9".into())]],
        },
    )]);

    let mut opts = server.opts();
    opts.use_server_prep_stmts = false;

    let mut session = Session::connect(&opts).expect("connect");
    let results = session
        .run_prepared("SELECT id FROM user WHERE name = ?", &["o'hare".into()])
        .expect("client-side prepared");
    let rs = results[0].as_result_set().expect("rows");
    assert_eq!(rs.row(0).unwrap().get::<i32>(0).unwrap(), 9);
    assert_eq!(server.prepares.load(std::sync::atomic::Ordering::Acquire), 0);
    session.close();
}
