use super::buffer::*;
use crate::prelude::*;

#[test]
fn round_trip1() {
  let mut buffer = WriteBuffer::new();
  buffer.write_u8(7);
  buffer.write_bool(true);
  buffer.write_u32(0xdead_beef);
  buffer.write_u64(0x0123_4567_89ab_cdef);
  buffer.write_string("hello");
  buffer.write_blob(&[1, 2, 3]);
  buffer.write_option_string(Some("there"));
  buffer.write_option_string(None);

  let bytes = buffer.into_bytes();
  let mut reader = ReadBuffer::new(&bytes);
  assert_eq!(reader.read_u8().unwrap(), 7);
  assert!(reader.read_bool().unwrap());
  assert_eq!(reader.read_u32().unwrap(), 0xdead_beef);
  assert_eq!(reader.read_u64().unwrap(), 0x0123_4567_89ab_cdef);
  assert_eq!(reader.read_string().unwrap(), "hello");
  assert_eq!(reader.read_blob().unwrap(), vec![1, 2, 3]);
  assert_eq!(reader.read_option_string().unwrap().as_deref(), Some("there"));
  assert_eq!(reader.read_option_string().unwrap(), None);
  assert_eq!(reader.remaining(), 0);
}

#[test]
fn big_endian_layout1() {
  let mut buffer = WriteBuffer::new();
  buffer.write_u32(1);
  assert_eq!(buffer.as_bytes(), &[0, 0, 0, 1]);

  let mut buffer = WriteBuffer::new();
  buffer.write_string("ab");
  // u64 length prefix, then the raw bytes.
  assert_eq!(buffer.as_bytes(), &[0, 0, 0, 0, 0, 0, 0, 2, b'a', b'b']);
}

#[test]
fn underrun1() {
  let bytes = [0u8, 0];
  let mut reader = ReadBuffer::new(&bytes);
  assert!(matches!(
    reader.read_u64(),
    Err(TheErr::CorruptSnapshot(_))
  ));
}

#[test]
fn bad_option_tag1() {
  let bytes = [9u8];
  let mut reader = ReadBuffer::new(&bytes);
  assert!(matches!(
    reader.read_option_string(),
    Err(TheErr::CorruptSnapshot(_))
  ));
}

#[test]
fn read_rest1() {
  let bytes = [1u8, 2, 3, 4];
  let mut reader = ReadBuffer::new(&bytes);
  reader.read_u8().unwrap();
  assert_eq!(reader.read_rest(), &[2, 3, 4]);
  assert_eq!(reader.remaining(), 0);
}
