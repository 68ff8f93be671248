//! Snapshot emission.

use crate::app::JsApp;
use crate::bridge::registry;
use crate::bridge::SnapshotHandleCloser;
use crate::platform::AppPlatform;
use crate::prelude::*;
use crate::runtime::JsRuntime;
use crate::snapshot::buffer::WriteBuffer;
use crate::snapshot::data::AppSnapData;
use crate::snapshot::named_indexes::NamedIndexes;

use std::cell::RefCell;
use std::rc::Rc;

/// Emits snapshots for an app or a single runtime.
pub trait JsSnapshotCreator {
  /// Serializes the whole app to `file`. The app must be in the
  /// snapshotter role; worker pools are paused for the duration.
  fn create_snapshot(&self, app: &mut JsApp, file: &Path) -> TheResult<()>;

  /// Serializes a single runtime to `file`, wrapped in a one-runtime app
  /// record.
  fn create_runtime_snapshot(
    &self,
    app_name: &str,
    app_version: &str,
    runtime: &mut JsRuntime,
    file: &Path,
  ) -> TheResult<()>;

  /// Serializes one wrapped native object's payload.
  fn serialize_internal_field(
    &self,
    closer: &Rc<RefCell<dyn SnapshotHandleCloser>>,
  ) -> Vec<u8> {
    let mut buffer = WriteBuffer::new();
    closer.borrow().serialize_payload(&mut buffer);
    buffer.into_bytes()
  }

  /// The external references the snapshot isolates were built with.
  fn external_references(&self) -> Vec<usize> {
    registry::external_references()
  }
}

/// The default creator backed by the VM's blob emission.
#[derive(Default)]
pub struct V8SnapshotCreator;

impl V8SnapshotCreator {
  pub fn new() -> V8SnapshotCreator {
    V8SnapshotCreator::default()
  }
}

impl JsSnapshotCreator for V8SnapshotCreator {
  fn create_snapshot(&self, app: &mut JsApp, file: &Path) -> TheResult<()> {
    if file.as_os_str().is_empty() {
      return Err(TheErr::ConfigError(
        "empty snapshot file path".to_string(),
      ));
    }

    // Stop the world for this app while handles close and blobs emit.
    let platform = AppPlatform::get().ok();
    if let Some(platform) = platform.as_ref() {
      platform.set_workers_paused(true);
    }
    let result = emit_app_snapshot(app, file);
    if let Some(platform) = platform.as_ref() {
      platform.set_workers_paused(false);
    }
    result
  }

  fn create_runtime_snapshot(
    &self,
    app_name: &str,
    app_version: &str,
    runtime: &mut JsRuntime,
    file: &Path,
  ) -> TheResult<()> {
    if file.as_os_str().is_empty() {
      return Err(TheErr::ConfigError(
        "empty snapshot file path".to_string(),
      ));
    }

    let platform = AppPlatform::get().ok();
    if let Some(platform) = platform.as_ref() {
      platform.set_workers_paused(true);
    }

    let result = (|| {
      let runtime_name = runtime.name();
      let snap_data = runtime.make_snapshot()?;
      let mut runtime_indexes = NamedIndexes::default();
      runtime_indexes.add_named_index(0, &runtime_name)?;
      let app_data = AppSnapData {
        name: app_name.to_string(),
        version: app_version.to_string(),
        runtime_indexes,
        runtimes: vec![snap_data],
      };
      write_snapshot_file(&app_data, file)
    })();

    if let Some(platform) = platform.as_ref() {
      platform.set_workers_paused(false);
    }
    result
  }
}

fn emit_app_snapshot(app: &mut JsApp, file: &Path) -> TheResult<()> {
  let app_data = app.make_snap_data()?;
  write_snapshot_file(&app_data, file)
}

pub(crate) fn write_snapshot_file(
  data: &AppSnapData,
  file: &Path,
) -> TheResult<()> {
  let mut buffer = WriteBuffer::new();
  data.serialize(&mut buffer);

  if let Some(dir) = file.parent() {
    if !dir.as_os_str().is_empty() {
      std::fs::create_dir_all(dir).map_err(|e| {
        TheErr::SnapshotIO(dir.to_path_buf(), e.to_string())
      })?;
    }
  }
  std::fs::write(file, buffer.as_bytes()).map_err(|e| {
    TheErr::SnapshotIO(file.to_path_buf(), e.to_string())
  })?;
  info!(
    "Wrote snapshot for app {:?} ({} runtimes) to {:?}",
    data.name,
    data.runtimes.len(),
    file
  );
  Ok(())
}
