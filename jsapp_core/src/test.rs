//! Helpers for unit tests.
//!
//! NOTE: This module should only be used in unit tests, not some where
//! else.

#[cfg(test)]
pub mod helpers {
  use crate::assets::{AppAssetRoots, AppAssetRootsRc};
  use crate::codecache::{CodeCache, CodeCacheRc};
  use crate::platform;
  use crate::runtime::{JsRuntime, JsRuntimeOptions, SnapshotAttribute};
  use std::path::Path;
  use std::sync::Once;

  /// Initialize the logging prints to `stderr`.
  pub fn init_log() {
    static INITIALIZED: Once = Once::new();
    INITIALIZED.call_once(|| {
      crate::log::init_stderr();
    });
  }

  /// Fires up the v8 engine for tests that touch the isolate directly.
  pub fn init_v8() {
    init_log();
    platform::init_v8();
  }

  /// Writes a file under `root`, creating parent directories.
  pub fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, content).unwrap();
  }

  /// Builds asset roots over a temp app root.
  pub fn make_roots(app_root: &Path) -> AppAssetRootsRc {
    AppAssetRoots::to_rc(AppAssetRoots::new(app_root).unwrap())
  }

  /// Builds a code cache over a temp app root.
  pub fn make_code_cache(roots: AppAssetRootsRc) -> CodeCacheRc {
    CodeCache::to_rc(CodeCache::new(roots))
  }

  /// Builds a normal runtime rooted at `app_root`.
  pub fn make_runtime(app_root: &Path) -> JsRuntime {
    init_v8();
    let roots = make_roots(app_root);
    let code_cache = make_code_cache(roots.clone());
    JsRuntime::new(JsRuntimeOptions {
      name: "test-runtime".to_string(),
      snapshot_index: 0,
      snapshot_attribute: SnapshotAttribute::NotSnapshottable,
      idle_enabled: true,
      app_name: "test-app".to_string(),
      app_version: "1.0.0".to_string(),
      asset_roots: roots,
      code_cache,
    })
    .unwrap()
  }

  /// Builds a snapshotter runtime rooted at `app_root`.
  pub fn make_snapshot_runtime(app_root: &Path, name: &str) -> JsRuntime {
    init_v8();
    let roots = make_roots(app_root);
    let code_cache = make_code_cache(roots.clone());
    JsRuntime::new_snapshotter(JsRuntimeOptions {
      name: name.to_string(),
      snapshot_index: 0,
      snapshot_attribute: SnapshotAttribute::SnapshotAndRestore,
      idle_enabled: false,
      app_name: "test-app".to_string(),
      app_version: "1.0.0".to_string(),
      asset_roots: roots,
      code_cache,
    })
    .unwrap()
  }
}
