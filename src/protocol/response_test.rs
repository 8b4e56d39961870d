use pretty_assertions::assert_eq;

use super::*;
use crate::constant::CAPABILITIES_DEFAULT;
use crate::protocol::primitive::{write_int_lenenc, write_string_lenenc};

#[test]
fn test_ok_payload_basic() {
    // affected=3, last_insert_id=7, status=autocommit, warnings=2
    let payload = [0x00, 3, 7, 0x02, 0x00, 2, 0];
    let ok = OkPayload::parse(OkPayloadBytes(&payload), CAPABILITIES_DEFAULT).unwrap();
    assert_eq!(ok.affected_rows, 3);
    assert_eq!(ok.last_insert_id, 7);
    assert_eq!(ok.warnings, 2);
    assert!(
        ok.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
    );
    assert_eq!(ok.schema_change, None);
}

#[test]
fn test_ok_payload_rejects_other_headers() {
    let payload = [0x05, 0, 0, 0, 0, 0, 0];
    assert!(OkPayload::parse(OkPayloadBytes(&payload), CAPABILITIES_DEFAULT).is_err());
}

#[test]
fn test_ok_payload_session_track_schema() {
    let caps = CAPABILITIES_DEFAULT | CapabilityFlags::CLIENT_SESSION_TRACK;

    let mut payload = vec![0x00, 0, 0];
    // status: autocommit | session-state-changed
    payload.extend_from_slice(&(0x4002_u16).to_le_bytes());
    payload.extend_from_slice(&[0, 0]); // warnings
    write_string_lenenc(&mut payload, ""); // info

    // state block: one schema-change entry
    let mut entry = Vec::new();
    write_string_lenenc(&mut entry, "newdb");
    let mut state = Vec::new();
    write_int_lenenc(&mut state, 1); // SESSION_TRACK_SCHEMA
    write_int_lenenc(&mut state, entry.len() as u64);
    state.extend_from_slice(&entry);
    write_int_lenenc(&mut payload, state.len() as u64);
    payload.extend_from_slice(&state);

    let ok = OkPayload::parse(OkPayloadBytes(&payload), caps).unwrap();
    assert_eq!(ok.schema_change.as_deref(), Some("newdb"));
}

#[test]
fn test_err_payload_with_sql_state() {
    let mut payload = vec![0xFF];
    payload.extend_from_slice(&1045_u16.to_le_bytes());
    payload.push(b'#');
    payload.extend_from_slice(b"28000");
    payload.extend_from_slice(b"Access denied");

    let err = ErrPayload::try_from(ErrPayloadBytes(&payload)).unwrap();
    assert_eq!(err.error_code, 1045);
    assert_eq!(err.sql_state, "28000");
    assert_eq!(err.message, "Access denied");
}

#[test]
fn test_err_payload_without_marker_defaults_state() {
    let mut payload = vec![0xFF];
    payload.extend_from_slice(&1064_u16.to_le_bytes());
    payload.extend_from_slice(b"You have an error");

    let err = ErrPayload::try_from(ErrPayloadBytes(&payload)).unwrap();
    assert_eq!(err.sql_state, "HY000");
    assert_eq!(err.message, "You have an error");
}

#[test]
fn test_eof_packet() {
    let payload = [0xFE, 1, 0, 0x08, 0x00];
    let eof = read_eof_packet(&payload).unwrap();
    assert_eq!(eof.warnings(), 1);
    assert!(
        eof.status_flags()
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    );
    assert!(is_eof_packet(&payload));
    assert!(!is_eof_packet(&[0x00, 0, 0, 0, 0]));
}
