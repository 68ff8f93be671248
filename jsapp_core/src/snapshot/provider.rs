//! Snapshot loading and lookup.

use crate::bridge::registry;
use crate::prelude::*;
use crate::snapshot::buffer::ReadBuffer;
use crate::snapshot::data::AppSnapData;

use std::cell::RefCell;
use std::rc::Rc;

/// Serves a loaded snapshot to a restoring app: per-runtime start-up data,
/// the name-to-index tables and the deserialize hooks for native payloads.
pub trait JsSnapshotProvider {
  /// Loads and parses the snapshot file.
  fn load_snapshot_data(&mut self, path: &Path) -> TheResult<()>;

  /// Has the snapshot data been loaded from the file yet.
  fn snapshot_loaded(&self) -> bool;

  /// The file path that the data was loaded from.
  fn snapshot_path(&self) -> Option<PathBuf>;

  /// The parsed app record.
  fn app_snap_data(&self) -> Option<&AppSnapData>;

  /// The VM start-up data for the runtime at `index`.
  fn get_snapshot_data(&self, index: u64) -> Option<&[u8]> {
    let data = self.app_snap_data()?;
    data
      .runtimes
      .get(index as usize)
      .map(|runtime| runtime.startup_data.as_slice())
  }

  fn get_index_for_runtime_name(&self, name: &str) -> Option<u64> {
    self
      .app_snap_data()?
      .runtime_indexes
      .get_index_for_name(name)
  }

  fn is_runtime_index_valid(&self, index: u64) -> bool {
    self
      .app_snap_data()
      .map(|data| (index as usize) < data.runtimes.len())
      .unwrap_or(false)
  }

  fn get_index_for_context_name(
    &self,
    name: &str,
    runtime_index: u64,
  ) -> Option<u64> {
    let data = self.app_snap_data()?;
    let runtime = data.runtimes.get(runtime_index as usize)?;
    runtime.context_indexes.get_index_for_name(name)
  }

  fn is_context_index_valid(&self, index: u64, runtime_index: u64) -> bool {
    self
      .app_snap_data()
      .and_then(|data| data.runtimes.get(runtime_index as usize))
      .map(|runtime| runtime.context_indexes.get_name_from_index(index).is_some())
      .unwrap_or(false)
  }

  /// Engine context indexes are offset against the named table: index 0 is
  /// the default context the engine materializes itself.
  fn real_context_index(&self, named_index: u64) -> u64 {
    named_index.saturating_sub(1)
  }

  /// Rebuilds a native payload serialized by the matching type's
  /// serializer.
  fn deserialize_native_payload(
    &self,
    type_name: &str,
    payload: &[u8],
  ) -> TheResult<Box<dyn std::any::Any>> {
    let info = registry::lookup_object_info_by_type_name(type_name)
      .ok_or_else(|| {
        TheErr::NotFound(format!("type info for {type_name:?}"))
      })?;
    let mut buffer = ReadBuffer::new(payload);
    (info.deserialize)(&mut buffer)
  }
}

/// The default provider: parses the on-disk format produced by the
/// snapshot creator.
#[derive(Default)]
pub struct V8SnapshotProvider {
  loaded: bool,
  path: Option<PathBuf>,
  data: Option<AppSnapData>,
}

pub type SnapshotProviderRc = Rc<RefCell<dyn JsSnapshotProvider>>;

impl V8SnapshotProvider {
  pub fn new() -> V8SnapshotProvider {
    V8SnapshotProvider::default()
  }
}

impl JsSnapshotProvider for V8SnapshotProvider {
  fn load_snapshot_data(&mut self, path: &Path) -> TheResult<()> {
    if self.loaded && self.path.as_deref() == Some(path) {
      return Ok(());
    }
    let bytes = std::fs::read(path).map_err(|e| {
      TheErr::SnapshotIO(path.to_path_buf(), e.to_string())
    })?;
    let mut buffer = ReadBuffer::new(&bytes);
    let data = AppSnapData::deserialize(&mut buffer)?;
    info!(
      "Loaded snapshot {:?}: app {:?} version {:?}, {} runtime(s)",
      path,
      data.name,
      data.version,
      data.runtimes.len()
    );
    self.data = Some(data);
    self.path = Some(path.to_path_buf());
    self.loaded = true;
    Ok(())
  }

  fn snapshot_loaded(&self) -> bool {
    self.loaded
  }

  fn snapshot_path(&self) -> Option<PathBuf> {
    self.path.clone()
  }

  fn app_snap_data(&self) -> Option<&AppSnapData> {
    self.data.as_ref()
  }
}
