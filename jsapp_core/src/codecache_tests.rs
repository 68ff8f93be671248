use crate::codecache::*;
use crate::test::helpers;

#[test]
fn cache_path1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let roots = helpers::make_roots(temp_dir.path());
  let cache = CodeCache::new(roots.clone());

  let source = roots.js_root().join("app/main.js");
  let cache_path = cache.generate_cache_path(&source).unwrap();
  assert_eq!(
    cache_path,
    roots.app_root().join(".code_cache/js/app/main.jscc")
  );

  let module_source = roots.modules_root().join("pkg/1.0.0/lib.mjs");
  let cache_path = cache.generate_cache_path(&module_source).unwrap();
  assert_eq!(
    cache_path,
    roots
      .app_root()
      .join(".code_cache/modules/pkg/1.0.0/lib.jscc")
  );

  // Inputs outside js/ or modules/ are rejected.
  assert!(cache
    .generate_cache_path(&roots.resources_root().join("x.js"))
    .is_err());
  // Unknown extensions are rejected.
  assert!(cache
    .generate_cache_path(&roots.js_root().join("data.json"))
    .is_err());
}

#[test]
fn missing_source1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let roots = helpers::make_roots(temp_dir.path());
  let cache = CodeCache::new(roots.clone());

  let missing = roots.js_root().join("nope.js");
  assert!(cache.load_script_source(&missing).is_err());
}

#[test]
fn set_then_load_round_trip1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let roots = helpers::make_roots(temp_dir.path());
  let cache = CodeCache::new(roots.clone());

  helpers::write_file(temp_dir.path(), "js/m.js", "export default 1;");
  let source_path = roots.js_root().join("m.js");

  // First load: no cached bytes yet.
  let script = cache.load_script_source(&source_path).unwrap();
  assert_eq!(script.source, "export default 1;");
  assert!(script.cached_data.is_none());
  assert!(!cache.has_code_cache(&source_path));

  // Store compiler bytes; they come back bitwise-equal.
  let bytes = vec![1u8, 2, 3, 4, 5];
  cache.set_code_cache(&source_path, &bytes).unwrap();
  assert!(cache.has_code_cache(&source_path));
  let cache_file = cache.generate_cache_path(&source_path).unwrap();
  assert_eq!(std::fs::read(&cache_file).unwrap(), bytes);

  let script = cache.load_script_source(&source_path).unwrap();
  assert_eq!(script.cached_data.as_deref(), Some(bytes.as_slice()));
}

#[test]
fn stale_cache_dropped1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let roots = helpers::make_roots(temp_dir.path());

  helpers::write_file(temp_dir.path(), "js/m.js", "export default 1;");
  let source_path = roots.js_root().join("m.js");

  {
    let cache = CodeCache::new(roots.clone());
    let _ = cache.load_script_source(&source_path).unwrap();
    cache.set_code_cache(&source_path, &[9, 9, 9]).unwrap();
  }

  // Rewrite the source afterwards; the cache file is now stale.
  std::thread::sleep(std::time::Duration::from_millis(1100));
  helpers::write_file(temp_dir.path(), "js/m.js", "export default 2;");

  let cache = CodeCache::new(roots.clone());
  let script = cache.load_script_source(&source_path).unwrap();
  assert_eq!(script.source, "export default 2;");
  assert!(script.cached_data.is_none());
}

#[test]
fn consume_note1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let roots = helpers::make_roots(temp_dir.path());
  let cache = CodeCache::new(roots.clone());

  helpers::write_file(temp_dir.path(), "js/m.js", "export default 1;");
  let source_path = roots.js_root().join("m.js");
  let _ = cache.load_script_source(&source_path).unwrap();

  assert_eq!(cache.last_consume_rejected(&source_path), None);
  cache.note_cache_consume(&source_path, false);
  assert_eq!(cache.last_consume_rejected(&source_path), Some(false));
}
