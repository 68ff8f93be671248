use super::buffer::{ReadBuffer, WriteBuffer};
use super::named_indexes::*;
use crate::prelude::*;

#[test]
fn add_and_lookup1() {
  let mut indexes = NamedIndexes::default();
  indexes.add_named_index(0, "default").unwrap();
  indexes.add_named_index(5, "worker").unwrap();

  assert_eq!(indexes.count(), 2);
  assert_eq!(indexes.get_name_from_index(0), Some("default"));
  assert_eq!(indexes.get_name_from_index(5), Some("worker"));
  assert_eq!(indexes.get_name_from_index(1), None);
  assert_eq!(indexes.get_index_for_name("worker"), Some(5));
  assert_eq!(indexes.get_index_for_name("missing"), None);

  // Duplicate index or duplicate name both fail.
  assert!(indexes.add_named_index(0, "other").is_err());
  assert!(indexes.add_named_index(9, "default").is_err());
}

#[test]
fn max_bound1() {
  let mut indexes = NamedIndexes::new(2);
  indexes.add_named_index(0, "a").unwrap();
  indexes.add_named_index(1, "b").unwrap();
  assert!(matches!(
    indexes.add_named_index(2, "c"),
    Err(TheErr::InvalidState(_))
  ));
}

#[test]
fn serialize_round_trip1() {
  let mut indexes = NamedIndexes::default();
  indexes.add_named_index(0, "default").unwrap();
  indexes.add_named_index(3, "ui").unwrap();

  let mut buffer = WriteBuffer::new();
  indexes.serialize(&mut buffer);
  let bytes = buffer.into_bytes();

  let mut reader = ReadBuffer::new(&bytes);
  let restored = NamedIndexes::deserialize(&mut reader).unwrap();
  assert_eq!(restored.count(), 2);
  assert_eq!(restored.get_index_for_name("ui"), Some(3));
  // Insertion order is preserved.
  assert_eq!(restored.entries()[0].1, "default");
  assert_eq!(restored.entries()[1].1, "ui");
}

#[test]
fn deserialize_duplicates_fail1() {
  let mut buffer = WriteBuffer::new();
  buffer.write_u64(2);
  buffer.write_u64(1);
  buffer.write_string("dup");
  buffer.write_u64(1);
  buffer.write_string("other");
  let bytes = buffer.into_bytes();

  let mut reader = ReadBuffer::new(&bytes);
  assert!(matches!(
    NamedIndexes::deserialize(&mut reader),
    Err(TheErr::CorruptSnapshot(_))
  ));
}
