//! On-disk cache of compiled module bytecode.
//!
//! One cache file per source, at
//! `<app-root>/.code_cache/<relative-under-js-or-modules>.jscc`, holding the
//! raw bytes the compiler produced. A missing or stale cache is never fatal,
//! it just yields a fresh compile.

use crate::assets::{AppAssetRootsRc, ROOT_JS, ROOT_MODULES};
use crate::prelude::*;

use parking_lot::Mutex;
use std::rc::Rc;
use std::time::SystemTime;

pub const CACHE_DIR: &str = ".code_cache";
pub const CACHE_EXTENSION: &str = "jscc";

/// One cached script.
#[derive(Debug)]
pub struct ScriptCacheInfo {
  pub source: String,
  pub compiled: Option<Vec<u8>>,
  pub last_compiled: Option<SystemTime>,
  pub source_file: PathBuf,
  pub cache_file: PathBuf,
  /// Whether the compiler rejected the cached bytes on the last consume.
  pub last_consume_rejected: Option<bool>,
}

/// The source text and optional cache bytes handed to the compiler.
#[derive(Debug)]
pub struct ScriptSource {
  pub source: String,
  pub cached_data: Option<Vec<u8>>,
}

/// Per-app compiled-code cache. The in-memory map is guarded by a single
/// mutex; file writes are serialized by the OS.
pub struct CodeCache {
  roots: AppAssetRootsRc,
  cache: Mutex<HashMap<PathBuf, ScriptCacheInfo>>,
}

pub type CodeCacheRc = Rc<CodeCache>;

impl CodeCache {
  pub fn new(roots: AppAssetRootsRc) -> CodeCache {
    CodeCache {
      roots,
      cache: Mutex::new(HashMap::new()),
    }
  }

  pub fn to_rc(value: CodeCache) -> CodeCacheRc {
    Rc::new(value)
  }

  /// Loads a script source, consulting the on-disk cache. When a cache file
  /// exists and is at least as fresh as the source, its bytes come back as
  /// a consume hint for the compiler.
  pub fn load_script_source(&self, file_path: &Path) -> TheResult<ScriptSource> {
    let cache_path = self.generate_cache_path(file_path)?;

    if !file_path.is_file() {
      return Err(TheErr::NotFound(format!(
        "script file {file_path:?} does not exist"
      )));
    }
    let source_mtime = file_mtime(file_path);

    let mut cache = self.cache.lock();
    if !cache.contains_key(file_path) {
      let source = std::fs::read_to_string(file_path).map_err(|e| {
        TheErr::NotFound(format!("failed to read {file_path:?}: {e}"))
      })?;
      let mut info = ScriptCacheInfo {
        source,
        compiled: None,
        last_compiled: None,
        source_file: file_path.to_path_buf(),
        cache_file: cache_path.clone(),
        last_consume_rejected: None,
      };
      // Seed from the cache file when it is not older than the source.
      if cache_path.is_file() {
        let cache_mtime = file_mtime(&cache_path);
        if cache_mtime >= source_mtime {
          match std::fs::read(&cache_path) {
            Ok(bytes) if !bytes.is_empty() => {
              info.compiled = Some(bytes);
              info.last_compiled = cache_mtime;
            }
            Ok(_) => {}
            Err(e) => {
              error!("Failed to read cache file {cache_path:?}: {e}");
            }
          }
        }
      }
      cache.insert(file_path.to_path_buf(), info);
    }
    let info = cache.get_mut(file_path).unwrap();

    // Source changed since the bytes were produced, drop them.
    if info.last_compiled < source_mtime {
      info.compiled = None;
      info.source = std::fs::read_to_string(file_path).map_err(|e| {
        TheErr::NotFound(format!("failed to read {file_path:?}: {e}"))
      })?;
    }

    Ok(ScriptSource {
      source: info.source.clone(),
      cached_data: info.compiled.clone(),
    })
  }

  /// Writes compiler-produced bytes back to disk and updates the in-memory
  /// entry.
  pub fn set_code_cache(&self, file_path: &Path, data: &[u8]) -> TheResult<()> {
    if data.is_empty() {
      return Err(TheErr::ConfigError(
        "empty cache data passed to set_code_cache".to_string(),
      ));
    }
    let cache_path = self.generate_cache_path(file_path)?;

    if let Some(dir) = cache_path.parent() {
      if let Err(e) = std::fs::create_dir_all(dir) {
        error!("Failed to create cache directory {dir:?}: {e}");
        return Err(TheErr::SnapshotIO(dir.to_path_buf(), e.to_string()));
      }
    }
    if let Err(e) = std::fs::write(&cache_path, data) {
      error!("Failed to write cache file {cache_path:?}: {e}");
      return Err(TheErr::SnapshotIO(cache_path, e.to_string()));
    }

    let mut cache = self.cache.lock();
    let info = cache.entry(file_path.to_path_buf()).or_insert_with(|| {
      ScriptCacheInfo {
        source: std::fs::read_to_string(file_path).unwrap_or_default(),
        compiled: None,
        last_compiled: None,
        source_file: file_path.to_path_buf(),
        cache_file: cache_path.clone(),
        last_consume_rejected: None,
      }
    });
    info.compiled = Some(data.to_vec());
    info.last_compiled = file_mtime(&info.cache_file);
    Ok(())
  }

  pub fn has_code_cache(&self, file_path: &Path) -> bool {
    self
      .cache
      .lock()
      .get(file_path)
      .map(|info| info.compiled.is_some())
      .unwrap_or(false)
  }

  /// Records whether the compiler accepted the consume hint.
  pub fn note_cache_consume(&self, file_path: &Path, rejected: bool) {
    if let Some(info) = self.cache.lock().get_mut(file_path) {
      info.last_consume_rejected = Some(rejected);
      if rejected {
        warn!("Compiler rejected cached data for {file_path:?}");
      }
    }
  }

  pub fn last_consume_rejected(&self, file_path: &Path) -> Option<bool> {
    self
      .cache
      .lock()
      .get(file_path)
      .and_then(|info| info.last_consume_rejected)
  }

  /// The cache file path for a source file. Inputs outside `js/` or
  /// `modules/`, and unknown extensions, are rejected.
  pub fn generate_cache_path(&self, file_path: &Path) -> TheResult<PathBuf> {
    let ext = file_path
      .extension()
      .map(|e| e.to_string_lossy().to_string())
      .unwrap_or_default();
    if ext != "js" && ext != "mjs" {
      return Err(TheErr::ModuleResolution(format!(
        "unsupported script extension {ext:?}, only .js and .mjs are cached"
      )));
    }

    let relative = self.roots.make_relative_to_app_root(file_path)?;
    let first = relative
      .components()
      .next()
      .map(|c| c.as_os_str().to_string_lossy().to_string())
      .unwrap_or_default();
    if first != ROOT_JS && first != ROOT_MODULES {
      return Err(TheErr::ModuleResolution(format!(
        "script {file_path:?} is not under the js or modules directories"
      )));
    }

    let mut cache_path = self.roots.app_root().join(CACHE_DIR).join(relative);
    cache_path.set_extension(CACHE_EXTENSION);
    Ok(cache_path)
  }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
  std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
