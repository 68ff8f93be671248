use crate::bridge::convert::FromV8;
use crate::context::{JsContext, SnapshotMethod};
use crate::modules::ModuleType;
use crate::prelude::*;
use crate::runtime::DEFAULT_CONTEXT_NAME;
use crate::test::helpers;

#[test]
fn load_and_run_module1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  helpers::write_file(
    temp_dir.path(),
    "js/m.js",
    "export default function () { return 42; }",
  );

  let mut runtime = helpers::make_runtime(temp_dir.path());
  let context = runtime
    .create_context(
      "C",
      None,
      "",
      None,
      true,
      SnapshotMethod::NamespaceOnly,
    )
    .unwrap();

  let scope = &mut runtime.handle_scope();
  let namespace =
    JsContext::run_module(&context, scope, Path::new("%JS%/m.js")).unwrap();

  // The namespace's default export is a function returning 42.
  let namespace = v8::Local::new(scope, namespace);
  let namespace = namespace.to_object(scope).unwrap();
  let local_context = context.borrow().local_context(scope);
  let scope = &mut v8::ContextScope::new(scope, local_context);
  let key = v8::String::new(scope, "default").unwrap();
  let default_fn = namespace.get(scope, key.into()).unwrap();
  let default_fn = v8::Local::<v8::Function>::try_from(default_fn).unwrap();
  let receiver = v8::undefined(scope);
  let result = default_fn.call(scope, receiver.into(), &[]).unwrap();
  assert_eq!(i32::from_v8(scope, result), Some(42));

  // The module is registered under its absolute path.
  let roots = context.borrow().asset_roots().clone();
  let abs_path = roots.js_root().join("m.js");
  let info = context
    .borrow()
    .module_map()
    .get_by_specifier(&abs_path.to_string_lossy())
    .unwrap();
  assert_eq!(info.borrow().module_type(), ModuleType::Javascript);
  assert_eq!(info.borrow().name(), "m");
}

#[test]
fn static_import_chain1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  helpers::write_file(
    temp_dir.path(),
    "js/lib.js",
    "export function add(a, b) { return a + b; }",
  );
  helpers::write_file(
    temp_dir.path(),
    "js/main.js",
    "import { add } from './lib.js';\nexport default add(40, 2);",
  );

  let mut runtime = helpers::make_runtime(temp_dir.path());
  let context = runtime.get_context_by_name(DEFAULT_CONTEXT_NAME).unwrap();

  let scope = &mut runtime.handle_scope();
  let namespace =
    JsContext::run_module(&context, scope, Path::new("%JS%/main.js"))
      .unwrap();

  let namespace = v8::Local::new(scope, namespace);
  let namespace = namespace.to_object(scope).unwrap();
  let local_context = context.borrow().local_context(scope);
  let scope = &mut v8::ContextScope::new(scope, local_context);
  let key = v8::String::new(scope, "default").unwrap();
  let value = namespace.get(scope, key.into()).unwrap();
  assert_eq!(i32::from_v8(scope, value), Some(42));

  // Both modules are in the map; reloading hands back the cached one.
  assert_eq!(context.borrow().module_map().len(), 2);
}

#[test]
fn code_cache_hit1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  helpers::write_file(
    temp_dir.path(),
    "js/m.js",
    "export default function () { return 42; }",
  );

  let mut runtime = helpers::make_runtime(temp_dir.path());
  let code_cache = {
    let context = runtime.get_context_by_name(DEFAULT_CONTEXT_NAME).unwrap();
    let cache = context.borrow().code_cache().clone();
    let scope = &mut runtime.handle_scope();
    JsContext::run_module(&context, scope, Path::new("%JS%/m.js")).unwrap();
    cache
  };

  // The first compile wrote the cache file.
  let roots = helpers::make_roots(temp_dir.path());
  let source_path = roots.js_root().join("m.js");
  let cache_file = temp_dir.path().join(".code_cache/js/m.jscc");
  assert!(cache_file.is_file());
  assert!(code_cache.has_code_cache(&source_path));

  // A fresh context consumes the cached bytes without rejection.
  let context2 = runtime
    .create_context(
      "C2",
      None,
      "",
      None,
      true,
      SnapshotMethod::NamespaceOnly,
    )
    .unwrap();
  let scope = &mut runtime.handle_scope();
  JsContext::run_module(&context2, scope, Path::new("%JS%/m.js")).unwrap();
  assert_eq!(code_cache.last_consume_rejected(&source_path), Some(false));
}

#[test]
fn dynamic_import_json1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  helpers::write_file(
    temp_dir.path(),
    "js/a.js",
    "const j = await import(\"./b.json\", { with: { type: \"json\" } });\n\
     globalThis.Result = j.default.k;",
  );
  helpers::write_file(temp_dir.path(), "js/b.json", "{\"k\":7}");

  let mut runtime = helpers::make_runtime(temp_dir.path());
  let context = runtime.get_context_by_name(DEFAULT_CONTEXT_NAME).unwrap();

  {
    let scope = &mut runtime.handle_scope();
    JsContext::run_module(&context, scope, Path::new("%JS%/a.js")).unwrap();
  }

  // The import resolution runs as a posted task.
  runtime.process_tasks().unwrap();

  let scope = &mut runtime.handle_scope();
  let result =
    JsContext::run_script(&context, scope, "globalThis.Result").unwrap();
  let result = v8::Local::new(scope, result);
  assert_eq!(i32::from_v8(scope, result), Some(7));

  // The synthetic json module coexists in the map with its own type.
  let roots = context.borrow().asset_roots().clone();
  let json_path = roots.js_root().join("b.json");
  let info = context
    .borrow()
    .module_map()
    .get_by_specifier_and_type(&json_path.to_string_lossy(), ModuleType::Json);
  assert!(info.is_some());
}

#[test]
fn static_json_import1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  helpers::write_file(
    temp_dir.path(),
    "js/c.js",
    "import data from './d.json' with { type: 'json' };\n\
     export default data.n;",
  );
  helpers::write_file(temp_dir.path(), "js/d.json", "{\"n\":11}");

  let mut runtime = helpers::make_runtime(temp_dir.path());
  let context = runtime.get_context_by_name(DEFAULT_CONTEXT_NAME).unwrap();

  let scope = &mut runtime.handle_scope();
  let namespace =
    JsContext::run_module(&context, scope, Path::new("%JS%/c.js")).unwrap();
  let namespace = v8::Local::new(scope, namespace);
  let namespace = namespace.to_object(scope).unwrap();
  let local_context = context.borrow().local_context(scope);
  let scope = &mut v8::ContextScope::new(scope, local_context);
  let key = v8::String::new(scope, "default").unwrap();
  let value = namespace.get(scope, key.into()).unwrap();
  assert_eq!(i32::from_v8(scope, value), Some(11));
}

#[test]
fn unknown_module_fails1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());
  let context = runtime.get_context_by_name(DEFAULT_CONTEXT_NAME).unwrap();

  let scope = &mut runtime.handle_scope();
  let result =
    JsContext::run_module(&context, scope, Path::new("%JS%/missing.js"));
  assert!(result.is_err());
}
