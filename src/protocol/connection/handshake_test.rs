use pretty_assertions::assert_eq;

use super::*;
use crate::constant::CAPABILITIES_DEFAULT;

/// Build an initial handshake packet the way a MariaDB 11 server does.
pub(crate) fn encode_initial_handshake(
    server_version: &str,
    capabilities: CapabilityFlags,
    seed: &[u8; 20],
    plugin: &str,
) -> Vec<u8> {
    let bits = capabilities.bits();
    let mut out = vec![10];
    write_string_null(&mut out, server_version);
    write_int_4(&mut out, 42); // connection id
    out.extend_from_slice(&seed[..8]);
    write_int_1(&mut out, 0);
    write_int_2(&mut out, bits as u16);
    write_int_1(&mut out, 45);
    write_int_2(&mut out, 0x0002); // autocommit
    write_int_2(&mut out, (bits >> 16) as u16);
    write_int_1(&mut out, 21); // seed length + 1
    out.extend_from_slice(&[0_u8; 6]);
    write_int_4(&mut out, (bits >> 32) as u32);
    out.extend_from_slice(&seed[8..]);
    write_int_1(&mut out, 0);
    write_string_null(&mut out, plugin);
    out
}

fn server_caps() -> CapabilityFlags {
    CAPABILITIES_DEFAULT
        | CapabilityFlags::CLIENT_SSL
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB
        | CapabilityFlags::CLIENT_SESSION_TRACK
        | CapabilityFlags::CLIENT_COMPRESS
        | CapabilityFlags::CLIENT_CONNECT_ATTRS
}

#[test]
fn test_parse_initial_handshake() {
    let seed = *b"abcdefghijklmnopqrst";
    let payload = encode_initial_handshake(
        "11.4.2-MariaDB",
        server_caps() | CapabilityFlags::MARIADB_CLIENT_STMT_BULK_OPERATIONS,
        &seed,
        "mysql_native_password",
    );
    let handshake = InitialHandshake::parse(&payload).unwrap();

    assert_eq!(handshake.protocol_version, 10);
    assert_eq!(handshake.server_version, "11.4.2-MariaDB");
    assert_eq!(handshake.connection_id, 42);
    assert_eq!(handshake.seed, seed);
    assert_eq!(handshake.auth_plugin_name, "mysql_native_password");
    assert!(
        handshake
            .capabilities
            .contains(CapabilityFlags::MARIADB_CLIENT_STMT_BULK_OPERATIONS)
    );
    assert!(
        handshake
            .status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
    );
}

#[test]
fn test_parse_extended_caps_ignored_for_mysql() {
    let seed = *b"abcdefghijklmnopqrst";
    let payload = encode_initial_handshake(
        "8.0.33",
        server_caps() | CapabilityFlags::MARIADB_CLIENT_STMT_BULK_OPERATIONS,
        &seed,
        "caching_sha2_password",
    );
    let handshake = InitialHandshake::parse(&payload).unwrap();
    assert!(
        !handshake
            .capabilities
            .contains(CapabilityFlags::MARIADB_CLIENT_STMT_BULK_OPERATIONS)
    );
}

#[test]
fn test_parse_err_packet_instead_of_handshake() {
    let mut payload = vec![0xFF];
    payload.extend_from_slice(&1129_u16.to_le_bytes());
    payload.extend_from_slice(b"#HY000Host blocked");
    let err = InitialHandshake::parse(&payload).unwrap_err();
    match err {
        Error::Server(e) => assert_eq!(e.error_code, 1129),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_parse_rejects_old_protocol() {
    let payload = [9, 0];
    assert!(InitialHandshake::parse(&payload).is_err());
}

#[test]
fn test_negotiate_requires_mandatory_caps() {
    let opts = Opts::default();
    let server = server_caps() - CapabilityFlags::CLIENT_PLUGIN_AUTH;
    assert!(negotiate_capabilities(&opts, server).is_err());
}

#[test]
fn test_negotiate_intersects_with_server() {
    let opts = Opts::default();
    let server = CAPABILITIES_MANDATORY | CapabilityFlags::CLIENT_SESSION_TRACK;
    let caps = negotiate_capabilities(&opts, server).unwrap();
    // DEPRECATE_EOF requested but not advertised
    assert!(!caps.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF));
    assert!(caps.contains(CapabilityFlags::CLIENT_SESSION_TRACK));
    assert!(caps.contains(CAPABILITIES_MANDATORY));
}

#[test]
fn test_negotiate_configured_options() {
    let opts = Opts {
        db: Some("app".into()),
        compress: true,
        ..Opts::default()
    };
    let caps = negotiate_capabilities(&opts, server_caps()).unwrap();
    assert!(caps.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
    assert!(caps.contains(CapabilityFlags::CLIENT_COMPRESS));
    // never requested without configuration
    assert!(!caps.contains(CapabilityFlags::CLIENT_LOCAL_FILES));
}

#[test]
fn test_negotiate_ssl_unsupported_by_server() {
    let opts = Opts {
        ssl_mode: crate::opts::SslMode::Trust,
        ..Opts::default()
    };
    let server = server_caps() - CapabilityFlags::CLIENT_SSL;
    let err = negotiate_capabilities(&opts, server).unwrap_err();
    assert!(matches!(err, Error::Tls(_)));
}

#[test]
fn test_handshake_response_layout() {
    let caps = CAPABILITIES_MANDATORY
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB;
    let response = HandshakeResponse {
        capabilities: caps,
        user: "app",
        auth_response: &[0xAB; 20],
        database: Some("db"),
        auth_plugin_name: "mysql_native_password",
        connection_attributes: &[],
    };
    let mut out = Vec::new();
    response.encode(&mut out);

    assert_eq!(&out[..4], &(caps.bits() as u32).to_le_bytes());
    assert_eq!(&out[4..8], &CLIENT_MAX_PACKET.to_le_bytes());
    assert_eq!(out[8], CLIENT_COLLATION);
    assert_eq!(&out[9..32], &[0_u8; 23]);
    assert_eq!(&out[32..36], b"app\0");
    assert_eq!(out[36], 20); // lenenc auth response length
    assert_eq!(&out[37..57], &[0xAB; 20]);
    assert_eq!(&out[57..60], b"db\0");
    assert_eq!(&out[60..], b"mysql_native_password\0");
}

#[test]
fn test_handshake_response_connect_attrs() {
    let caps = CAPABILITIES_MANDATORY
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_CONNECT_ATTRS;
    let attrs = vec![("_client_name".to_string(), "marlin".to_string())];
    let response = HandshakeResponse {
        capabilities: caps,
        user: "u",
        auth_response: &[],
        database: None,
        auth_plugin_name: "mysql_native_password",
        connection_attributes: &attrs,
    };
    let mut out = Vec::new();
    response.encode(&mut out);

    // the attrs block sits at the tail: lenenc total, then lenenc k/v
    let tail_start = out.len() - (1 + 1 + 12 + 1 + 6);
    let (block, rest) = read_string_lenenc(&out[tail_start..]).unwrap();
    assert!(rest.is_empty());
    let (key, block) = read_string_lenenc(block).unwrap();
    let (value, block) = read_string_lenenc(block).unwrap();
    assert_eq!(key, b"_client_name");
    assert_eq!(value, b"marlin");
    assert!(block.is_empty());
}
