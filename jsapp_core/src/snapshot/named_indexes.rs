//! Insertion-ordered name-to-index mapping used to address runtimes and
//! contexts within a snapshot.

use crate::prelude::*;
use crate::snapshot::buffer::{ReadBuffer, WriteBuffer};

pub const DEFAULT_MAX_NAMED_INDEXES: usize = 1024;

/// Maps integer indexes to names. Indexes need not be contiguous, but both
/// indexes and names must be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedIndexes {
  max_indexes: usize,
  entries: Vec<(u64, String)>,
}

impl Default for NamedIndexes {
  fn default() -> Self {
    NamedIndexes::new(DEFAULT_MAX_NAMED_INDEXES)
  }
}

impl NamedIndexes {
  pub fn new(max_indexes: usize) -> NamedIndexes {
    NamedIndexes {
      max_indexes,
      entries: Vec::new(),
    }
  }

  pub fn max_supported_indexes(&self) -> usize {
    self.max_indexes
  }

  pub fn count(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Adds an index for the name. Fails when either side already exists or
  /// the table is full.
  pub fn add_named_index(&mut self, index: u64, name: &str) -> TheResult<()> {
    if self.entries.len() >= self.max_indexes {
      return Err(TheErr::InvalidState(format!(
        "named index table is full ({} entries)",
        self.max_indexes
      )));
    }
    if self.entries.iter().any(|(i, n)| *i == index || n == name) {
      return Err(TheErr::AlreadyExists(format!(
        "named index {index} / {name:?}"
      )));
    }
    self.entries.push((index, name.to_string()));
    Ok(())
  }

  pub fn get_name_from_index(&self, index: u64) -> Option<&str> {
    self
      .entries
      .iter()
      .find(|(i, _)| *i == index)
      .map(|(_, name)| name.as_str())
  }

  pub fn get_index_for_name(&self, name: &str) -> Option<u64> {
    self
      .entries
      .iter()
      .find(|(_, n)| n == name)
      .map(|(index, _)| *index)
  }

  pub fn entries(&self) -> &[(u64, String)] {
    &self.entries
  }

  pub fn serialize(&self, buffer: &mut WriteBuffer) {
    buffer.write_u64(self.entries.len() as u64);
    for (index, name) in &self.entries {
      buffer.write_u64(*index);
      buffer.write_string(name);
    }
  }

  /// Reads a table back, failing with `CorruptSnapshot` on duplicate
  /// indexes or names.
  pub fn deserialize(buffer: &mut ReadBuffer) -> TheResult<NamedIndexes> {
    let count = buffer.read_u64()? as usize;
    let mut indexes = NamedIndexes::default();
    if count > indexes.max_indexes {
      return Err(TheErr::CorruptSnapshot(format!(
        "named index table claims {count} entries"
      )));
    }
    for _ in 0..count {
      let index = buffer.read_u64()?;
      let name = buffer.read_string()?;
      indexes.add_named_index(index, &name).map_err(|_| {
        TheErr::CorruptSnapshot(format!(
          "duplicate named index {index} / {name:?}"
        ))
      })?;
    }
    Ok(indexes)
  }
}
