use pretty_assertions::assert_eq;

use super::*;

fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let len = (payload.len() as u32).to_le_bytes();
    out.extend_from_slice(&len[..3]);
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

#[test]
fn test_read_single_packet() {
    let wire = frame(0, b"hello");
    let mut seq = 0;
    let mut buffer = Vec::new();
    read_payload(&mut wire.as_slice(), &mut buffer, &mut seq).unwrap();
    assert_eq!(buffer, b"hello");
    assert_eq!(seq, 1);
}

#[test]
fn test_read_rejects_sequence_mismatch() {
    let wire = frame(3, b"hello");
    let mut seq = 0;
    let mut buffer = Vec::new();
    let err = read_payload(&mut wire.as_slice(), &mut buffer, &mut seq).unwrap_err();
    assert!(err.to_string().contains("sequence out of order"));
}

#[test]
fn test_read_concatenates_continuation_packets() {
    let first = vec![0xAA_u8; MAX_PACKET_PAYLOAD];
    let mut wire = frame(5, &first);
    wire.extend_from_slice(&frame(6, b"tail"));

    let mut seq = 5;
    let mut buffer = Vec::new();
    read_payload(&mut wire.as_slice(), &mut buffer, &mut seq).unwrap();
    assert_eq!(buffer.len(), MAX_PACKET_PAYLOAD + 4);
    assert_eq!(&buffer[MAX_PACKET_PAYLOAD..], b"tail");
    assert_eq!(seq, 7);
}

#[test]
fn test_read_continuation_sequence_must_increment() {
    let first = vec![0_u8; MAX_PACKET_PAYLOAD];
    let mut wire = frame(0, &first);
    wire.extend_from_slice(&frame(0, b"tail"));

    let mut seq = 0;
    let mut buffer = Vec::new();
    assert!(read_payload(&mut wire.as_slice(), &mut buffer, &mut seq).is_err());
}

#[test]
fn test_write_single_packet() {
    let mut buffer = vec![0, 0, 0, 0];
    buffer.extend_from_slice(b"ping");

    let mut wire = Vec::new();
    let mut seq = 0;
    write_payload(&mut wire, &mut buffer, &mut seq).unwrap();

    assert_eq!(wire, frame(0, b"ping"));
    assert_eq!(seq, 1);
}

#[test]
fn test_write_splits_large_payload() {
    let payload_len = MAX_PACKET_PAYLOAD + 10;
    let mut buffer = vec![0, 0, 0, 0];
    buffer.extend(std::iter::repeat_n(0x7F_u8, payload_len));

    let mut wire = Vec::new();
    let mut seq = 0;
    write_payload(&mut wire, &mut buffer, &mut seq).unwrap();

    // first chunk
    let header = PacketHeader::ref_from_bytes(&wire[..4]).unwrap();
    assert_eq!(header.length(), MAX_PACKET_PAYLOAD);
    assert_eq!(header.sequence_id, 0);
    // second chunk
    let second = &wire[4 + MAX_PACKET_PAYLOAD..];
    let header = PacketHeader::ref_from_bytes(&second[..4]).unwrap();
    assert_eq!(header.length(), 10);
    assert_eq!(header.sequence_id, 1);
    assert_eq!(second.len(), 4 + 10);
    assert_eq!(seq, 2);
}

#[test]
fn test_write_exact_multiple_appends_empty_packet() {
    let mut buffer = vec![0, 0, 0, 0];
    buffer.extend(std::iter::repeat_n(1_u8, MAX_PACKET_PAYLOAD));

    let mut wire = Vec::new();
    let mut seq = 0;
    write_payload(&mut wire, &mut buffer, &mut seq).unwrap();

    // full chunk followed by an empty terminator packet
    assert_eq!(wire.len(), 4 + MAX_PACKET_PAYLOAD + 4);
    let tail = &wire[4 + MAX_PACKET_PAYLOAD..];
    let header = PacketHeader::ref_from_bytes(tail).unwrap();
    assert_eq!(header.length(), 0);
    assert_eq!(header.sequence_id, 1);
    assert_eq!(seq, 2);
}

#[test]
fn test_check_max_packet() {
    assert!(check_max_packet(100, 1000, false).is_ok());
    assert!(check_max_packet(100, 0, false).is_ok());

    let err = check_max_packet(2000, 1000, false).unwrap_err();
    match err {
        crate::error::Error::MaxPacketExceeded { must_reconnect, .. } => {
            assert!(!must_reconnect)
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = check_max_packet(2000, 1000, true).unwrap_err();
    assert!(err.is_conn_broken());
}

#[test]
fn test_read_column_definition_packets() {
    let mut wire = frame(1, b"col-one");
    wire.extend_from_slice(&frame(2, b"second"));

    let mut out = Vec::new();
    let mut seq = 1;
    read_column_definition_packets(&mut wire.as_slice(), &mut out, 2, &mut seq).unwrap();

    let mut expected = Vec::new();
    expected.extend(7_u32.to_ne_bytes());
    expected.extend_from_slice(b"col-one");
    expected.extend(6_u32.to_ne_bytes());
    expected.extend_from_slice(b"second");
    assert_eq!(out, expected);
    assert_eq!(seq, 3);
}
