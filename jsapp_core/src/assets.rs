//! The app asset root hierarchy.
//!
//! Every filesystem input is rooted under the application root, which
//! carries the mandatory `js/`, `modules/` and `resources/` subdirectories.
//! Leading `%TOKEN%`s rewrite to the corresponding directory, and any path
//! that lexically escapes the root is rejected.

use crate::prelude::*;

use path_absolutize::Absolutize;
use std::path::Component;
use std::rc::Rc;

pub const ROOT_JS: &str = "js";
pub const ROOT_MODULES: &str = "modules";
pub const ROOT_RESOURCES: &str = "resources";

pub const TOKEN_APPROOT: &str = "%APPROOT%";
pub const TOKEN_JS: &str = "%JS%";
pub const TOKEN_MODULES: &str = "%MODULES%";
pub const TOKEN_RESOURCES: &str = "%RESOURCES%";

/// The rooted asset hierarchy of one app.
#[derive(Debug)]
pub struct AppAssetRoots {
  app_root: PathBuf,
}

pub type AppAssetRootsRc = Rc<AppAssetRoots>;

impl AppAssetRoots {
  /// Roots the hierarchy at `app_root`, creating the mandatory
  /// subdirectories when missing.
  pub fn new(app_root: &Path) -> TheResult<AppAssetRoots> {
    if app_root.as_os_str().is_empty() {
      return Err(TheErr::ConfigError("empty app root".to_string()));
    }
    let app_root = app_root
      .absolutize()
      .map_err(|e| TheErr::ConfigError(format!("bad app root: {e}")))?
      .to_path_buf();
    let app_root = normalize_lexically(&app_root);
    for sub in [ROOT_JS, ROOT_MODULES, ROOT_RESOURCES] {
      let dir = app_root.join(sub);
      std::fs::create_dir_all(&dir).map_err(|e| {
        TheErr::ConfigError(format!("failed to create {dir:?}: {e}"))
      })?;
    }
    Ok(AppAssetRoots {
      app_root,
    })
  }

  pub fn to_rc(value: AppAssetRoots) -> AppAssetRootsRc {
    Rc::new(value)
  }

  pub fn app_root(&self) -> &Path {
    &self.app_root
  }

  pub fn js_root(&self) -> PathBuf {
    self.app_root.join(ROOT_JS)
  }

  pub fn modules_root(&self) -> PathBuf {
    self.app_root.join(ROOT_MODULES)
  }

  pub fn resources_root(&self) -> PathBuf {
    self.app_root.join(ROOT_RESOURCES)
  }

  /// Rewrites a leading `%TOKEN%` to the configured directory.
  pub fn replace_tokens(&self, input: &str) -> String {
    for (token, dir) in [
      (TOKEN_APPROOT, self.app_root.clone()),
      (TOKEN_JS, self.js_root()),
      (TOKEN_MODULES, self.modules_root()),
      (TOKEN_RESOURCES, self.resources_root()),
    ] {
      if let Some(rest) = input.strip_prefix(token) {
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        return dir.join(rest).to_string_lossy().to_string();
      }
    }
    input.to_string()
  }

  /// Anchors a path under the app root. Absolute inputs are re-anchored at
  /// the root; the result is lexically normalized and must stay inside the
  /// root.
  pub fn make_absolute_to_app_root(&self, input: &Path) -> TheResult<PathBuf> {
    let raw = input.to_string_lossy().to_string();
    let substituted = self.replace_tokens(&raw);
    let path = Path::new(&substituted);

    let anchored = if path.starts_with(&self.app_root) {
      path.to_path_buf()
    } else if path.is_absolute() {
      let mut stripped = path.components();
      stripped.next();
      self.app_root.join(stripped.as_path())
    } else {
      self.app_root.join(path)
    };

    let normalized = normalize_lexically(&anchored);
    if !normalized.starts_with(&self.app_root) {
      return Err(TheErr::ModuleResolution(format!(
        "path {input:?} escapes the app root"
      )));
    }
    Ok(normalized)
  }

  /// The path relative to the app root.
  pub fn make_relative_to_app_root(&self, input: &Path) -> TheResult<PathBuf> {
    let normalized = normalize_lexically(input);
    normalized
      .strip_prefix(&self.app_root)
      .map(|p| p.to_path_buf())
      .map_err(|_| {
        TheErr::ModuleResolution(format!(
          "path {input:?} is not under the app root"
        ))
      })
  }

  /// The root directory of a module at a specific version, when present on
  /// disk.
  pub fn find_module_version_root(
    &self,
    module: &str,
    version: &str,
  ) -> Option<PathBuf> {
    let root = self.modules_root().join(module).join(version);
    root.is_dir().then_some(root)
  }

  /// The highest available version of a module, scanning its version
  /// directories.
  pub fn find_module_latest_version(
    &self,
    module: &str,
  ) -> Option<semver::Version> {
    let dir = self.modules_root().join(module);
    let entries = std::fs::read_dir(&dir).ok()?;
    entries
      .filter_map(|entry| entry.ok())
      .filter(|entry| entry.path().is_dir())
      .filter_map(|entry| {
        semver::Version::parse(&entry.file_name().to_string_lossy()).ok()
      })
      .max()
  }

  /// The root directory of a module's latest version.
  pub fn find_module_latest_version_root(
    &self,
    module: &str,
  ) -> Option<PathBuf> {
    let version = self.find_module_latest_version(module)?;
    self.find_module_version_root(module, &version.to_string())
  }
}

/// Normalizes a path without touching the filesystem: `.` is dropped and
/// `..` pops the previous component (never above the first one).
pub fn normalize_lexically(path: &Path) -> PathBuf {
  let mut result = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !result.pop() {
          // Preserve the escape attempt so root checks can reject it.
          result.push(Component::ParentDir.as_os_str());
        }
      }
      other => result.push(other.as_os_str()),
    }
  }
  result
}
