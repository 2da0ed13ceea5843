//! Little-endian append helpers for app-protocol payloads.

pub fn append_bool(buf: &mut Vec<u8>, val: bool) {
    buf.push(val as u8);
}

pub fn append_u16(buf: &mut Vec<u8>, val: u16) {
    buf.extend_from_slice(&val.to_le_bytes());
}

pub fn append_i32(buf: &mut Vec<u8>, val: i32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

pub fn append_u32(buf: &mut Vec<u8>, val: u32) {
    buf.extend_from_slice(&val.to_le_bytes());
}

/// A string truncated or zero-padded to exactly `length` bytes.
pub fn append_str(buf: &mut Vec<u8>, val: &str, length: usize) {
    let bytes = val.as_bytes();
    let take = bytes.len().min(length);
    buf.extend_from_slice(&bytes[..take]);
    for _ in take..length {
        buf.push(0);
    }
}

pub fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

#[test]
fn test_append_little_endian() {
    let mut buf = Vec::new();
    append_u16(&mut buf, 0x1234);
    append_u32(&mut buf, 0xdeadbeef);
    append_i32(&mut buf, -2);
    assert_eq!(buf[..2], [0x34, 0x12]);
    assert_eq!(buf[2..6], [0xef, 0xbe, 0xad, 0xde]);
    assert_eq!(buf[6..10], [0xfe, 0xff, 0xff, 0xff]);
    assert_eq!(read_u16(&buf), 0x1234);
}

#[test]
fn test_append_str_pads_and_truncates() {
    let mut buf = Vec::new();
    append_str(&mut buf, "ab", 4);
    assert_eq!(buf, [b'a', b'b', 0, 0]);
    let mut buf = Vec::new();
    append_str(&mut buf, "abcdef", 4);
    assert_eq!(buf, [b'a', b'b', b'c', b'd']);
}

#[test]
fn test_append_bool() {
    let mut buf = Vec::new();
    append_bool(&mut buf, true);
    append_bool(&mut buf, false);
    assert_eq!(buf, [1, 0]);
}
