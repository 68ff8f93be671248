//! Byte buffers for snapshot serialization.
//!
//! Big-endian, length-prefixed layout: strings and byte blobs are a `u64`
//! length followed by raw bytes, vectors are a `u64` count followed by
//! items, optional fields are a `u8` presence tag.

use crate::prelude::*;

/// Serializer over a growable byte vector.
#[derive(Debug, Default)]
pub struct WriteBuffer {
  bytes: Vec<u8>,
}

impl WriteBuffer {
  pub fn new() -> Self {
    WriteBuffer {
      bytes: Vec::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.bytes
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn write_u8(&mut self, value: u8) {
    self.bytes.push(value);
  }

  pub fn write_bool(&mut self, value: bool) {
    self.write_u8(u8::from(value));
  }

  pub fn write_u32(&mut self, value: u32) {
    self.bytes.extend_from_slice(&value.to_be_bytes());
  }

  pub fn write_u64(&mut self, value: u64) {
    self.bytes.extend_from_slice(&value.to_be_bytes());
  }

  pub fn write_string(&mut self, value: &str) {
    self.write_u64(value.len() as u64);
    self.bytes.extend_from_slice(value.as_bytes());
  }

  pub fn write_blob(&mut self, value: &[u8]) {
    self.write_u64(value.len() as u64);
    self.bytes.extend_from_slice(value);
  }

  pub fn write_option_string(&mut self, value: Option<&str>) {
    match value {
      Some(value) => {
        self.write_u8(1);
        self.write_string(value);
      }
      None => self.write_u8(0),
    }
  }
}

/// Deserializer over a byte slice. Every read fails with
/// [`TheErr::CorruptSnapshot`] once the buffer underruns.
#[derive(Debug)]
pub struct ReadBuffer<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> ReadBuffer<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    ReadBuffer {
      bytes,
      pos: 0,
    }
  }

  pub fn remaining(&self) -> usize {
    self.bytes.len() - self.pos
  }

  pub fn position(&self) -> usize {
    self.pos
  }

  fn take(&mut self, n: usize) -> TheResult<&'a [u8]> {
    if self.remaining() < n {
      return Err(TheErr::CorruptSnapshot(format!(
        "buffer underrun: need {n} bytes, {} left",
        self.remaining()
      )));
    }
    let slice = &self.bytes[self.pos..self.pos + n];
    self.pos += n;
    Ok(slice)
  }

  pub fn read_u8(&mut self) -> TheResult<u8> {
    Ok(self.take(1)?[0])
  }

  pub fn read_bool(&mut self) -> TheResult<bool> {
    Ok(self.read_u8()? != 0)
  }

  pub fn read_u32(&mut self) -> TheResult<u32> {
    let bytes = self.take(4)?;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
  }

  pub fn read_u64(&mut self) -> TheResult<u64> {
    let bytes = self.take(8)?;
    Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
  }

  pub fn read_string(&mut self) -> TheResult<String> {
    let len = self.read_u64()? as usize;
    let bytes = self.take(len)?;
    String::from_utf8(bytes.to_vec())
      .map_err(|e| TheErr::CorruptSnapshot(format!("invalid utf-8: {e}")))
  }

  pub fn read_blob(&mut self) -> TheResult<Vec<u8>> {
    let len = self.read_u64()? as usize;
    Ok(self.take(len)?.to_vec())
  }

  pub fn read_option_string(&mut self) -> TheResult<Option<String>> {
    match self.read_u8()? {
      0 => Ok(None),
      1 => Ok(Some(self.read_string()?)),
      tag => Err(TheErr::CorruptSnapshot(format!("bad option tag {tag}"))),
    }
  }

  /// Hands back the rest of the buffer without copying.
  pub fn read_rest(&mut self) -> &'a [u8] {
    let rest = &self.bytes[self.pos..];
    self.pos = self.bytes.len();
    rest
  }
}
