//! Import specifier resolution against the app asset roots.

use crate::assets::{
  normalize_lexically, AppAssetRoots, ROOT_JS, ROOT_MODULES, ROOT_RESOURCES,
};
use crate::modules::{AttributesInfo, ModuleType};
use crate::prelude::*;

/// The outcome of resolving an import specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
  /// Absolute path of the module file, inside the app root.
  pub path: PathBuf,
  /// Short name: file stem for `js/` and `resources/` files, package name
  /// for `modules/` imports.
  pub name: String,
  /// The package version for `modules/` imports.
  pub version: Option<String>,
}

/// Resolves `import_path` as requested from a module in `referrer_dir`.
///
/// Leading `%TOKEN%`s and absolute specifiers anchor at the app root, a
/// `module` attribute anchors at that module's root, anything else is
/// referrer-relative. The normalized result must stay under the app root
/// and satisfy the per-root rules for `js/`, `modules/` and `resources/`.
pub fn build_module_info(
  roots: &AppAssetRoots,
  attributes: &AttributesInfo,
  import_path: &Path,
  referrer_dir: &Path,
) -> TheResult<ResolvedModule> {
  let raw = import_path.to_string_lossy().to_string();

  let abs_path = if raw.starts_with('%') || raw.starts_with('/') {
    roots.make_absolute_to_app_root(import_path)?
  } else if attributes.module.is_empty() {
    let joined = referrer_dir.join(import_path);
    let normalized = normalize_lexically(&joined);
    if !normalized.starts_with(roots.app_root()) {
      return Err(TheErr::ModuleResolution(format!(
        "import {import_path:?} escapes the app root"
      )));
    }
    normalized
  } else {
    let module_root = roots
      .find_module_latest_version_root(&attributes.module)
      .ok_or_else(|| {
        TheErr::ModuleResolution(format!(
          "failed to find attributed module {:?} for import {import_path:?}",
          attributes.module
        ))
      })?;
    normalize_lexically(&module_root.join(import_path))
  };

  let relative = roots.make_relative_to_app_root(&abs_path)?;
  let mut components = relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy().to_string());
  let root_dir = components.next().unwrap_or_default();

  let extension = abs_path
    .extension()
    .map(|e| format!(".{}", e.to_string_lossy()))
    .unwrap_or_default();

  match root_dir.as_str() {
    ROOT_JS => {
      if !attributes.module.is_empty() {
        return Err(TheErr::ModuleResolution(format!(
          "a module attribute is not allowed under {ROOT_JS}/, import {import_path:?}"
        )));
      }
      if !attributes.extension_matches(&extension) {
        return Err(TheErr::ModuleResolution(format!(
          "file type {extension:?} does not match attributed type {:?}, import {import_path:?}",
          attributes.type_string
        )));
      }
      Ok(ResolvedModule {
        name: file_stem(&abs_path),
        path: abs_path,
        version: None,
      })
    }
    ROOT_MODULES => {
      if !attributes.extension_matches(&extension) {
        return Err(TheErr::ModuleResolution(format!(
          "file type {extension:?} does not match attributed type {:?}, import {import_path:?}",
          attributes.type_string
        )));
      }

      let package = components.next().ok_or_else(|| {
        TheErr::ModuleResolution(format!(
          "import {import_path:?} names no package under {ROOT_MODULES}/"
        ))
      })?;
      if !attributes.module.is_empty() && attributes.module != package {
        return Err(TheErr::ModuleResolution(format!(
          "import {import_path:?} is not inside the attributed module {:?}",
          attributes.module
        )));
      }

      let mut rest: Vec<String> = components.collect();
      let version = match rest
        .first()
        .and_then(|seg| semver::Version::parse(seg).ok())
      {
        Some(version) => {
          rest.remove(0);
          version.to_string()
        }
        None => {
          // No version segment, substitute the highest available one.
          let version =
            roots.find_module_latest_version(&package).ok_or_else(|| {
              TheErr::ModuleResolution(format!(
                "failed to find a version of module {package:?}, import {import_path:?}"
              ))
            })?;
          version.to_string()
        }
      };

      let version_root = roots
        .find_module_version_root(&package, &version)
        .ok_or_else(|| {
          TheErr::ModuleResolution(format!(
            "failed to find module {package:?} version {version:?}, import {import_path:?}"
          ))
        })?;

      let mut path = version_root;
      for segment in rest {
        path.push(segment);
      }
      Ok(ResolvedModule {
        path,
        name: package,
        version: Some(version),
      })
    }
    ROOT_RESOURCES => {
      if !attributes.module.is_empty() {
        return Err(TheErr::ModuleResolution(format!(
          "a module attribute is not allowed under {ROOT_RESOURCES}/, import {import_path:?}"
        )));
      }
      if extension == ".js" || extension == ".mjs" {
        return Err(TheErr::ModuleResolution(format!(
          "files ending in .js or .mjs can not be in {ROOT_RESOURCES}/, import {import_path:?}"
        )));
      }
      if !attributes.extension_matches(&extension) {
        return Err(TheErr::ModuleResolution(format!(
          "file type {extension:?} does not match attributed type {:?}, import {import_path:?}",
          attributes.type_string
        )));
      }
      Ok(ResolvedModule {
        name: file_stem(&abs_path),
        path: abs_path,
        version: None,
      })
    }
    other => Err(TheErr::ModuleResolution(format!(
      "import {import_path:?} resolved to {other:?}, expected one of {ROOT_JS}/, {ROOT_MODULES}/, {ROOT_RESOURCES}/"
    ))),
  }
}

/// Resolution used for entry points given with no import attributes: the
/// type is inferred from the extension.
pub fn attributes_for_path(path: &Path) -> AttributesInfo {
  let is_json = path
    .extension()
    .map(|ext| ext == "json")
    .unwrap_or(false);
  if is_json {
    AttributesInfo {
      mtype: ModuleType::Json,
      type_string: "json".to_string(),
      module: String::new(),
    }
  } else {
    AttributesInfo {
      mtype: ModuleType::Javascript,
      type_string: "js".to_string(),
      module: String::new(),
    }
  }
}

fn file_stem(path: &Path) -> String {
  path
    .file_stem()
    .map(|stem| stem.to_string_lossy().to_string())
    .unwrap_or_default()
}
