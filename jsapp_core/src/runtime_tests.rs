use crate::bridge::convert::FromV8;
use crate::context::{JsContext, SnapshotMethod};
use crate::platform::PlatformRuntimeProvider;
use crate::prelude::*;
use crate::runtime::*;
use crate::test::helpers;

use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn default_context1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let runtime = helpers::make_runtime(temp_dir.path());

  let default_ctx = runtime.get_context_by_name(DEFAULT_CONTEXT_NAME);
  assert!(default_ctx.is_some());
  assert_eq!(default_ctx.unwrap().borrow().snap_index(), 0);
  assert!(!runtime.is_snapshotter());
  assert!(!runtime.is_restored());
}

#[test]
fn dispose_context1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());

  runtime
    .create_context("gone", None, "", None, true, SnapshotMethod::NamespaceOnly)
    .unwrap();
  assert!(runtime.get_context_by_name("gone").is_some());

  runtime.dispose_context("gone").unwrap();
  assert!(runtime.get_context_by_name("gone").is_none());
  assert!(matches!(
    runtime.dispose_context("gone"),
    Err(TheErr::NotFound(_))
  ));
}

#[test]
fn process_tasks1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());

  let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(vec![]));
  let runner = runtime.state().borrow().task_runner();
  for label in ["t1", "t2"] {
    let log = log.clone();
    runner
      .borrow_mut()
      .post_task(Box::new(move |_scope: &mut v8::HandleScope| {
        log.borrow_mut().push(label);
      }));
  }

  runtime.process_tasks().unwrap();
  assert_eq!(*log.borrow(), vec!["t1", "t2"]);
  assert_eq!(runner.borrow().nesting_depth(), 0);

  // Draining an empty runner is a no-op.
  runtime.process_tasks().unwrap();
  assert_eq!(log.borrow().len(), 2);
}

#[test]
fn process_idle_tasks1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());

  let log: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(vec![]));
  let runner = runtime.state().borrow().task_runner();
  {
    let log = log.clone();
    runner.borrow_mut().post_idle_task(Box::new(
      move |_scope: &mut v8::HandleScope, deadline: f64| {
        log.borrow_mut().push(deadline);
      },
    ));
  }

  runtime.process_idle_tasks(5.0).unwrap();
  assert_eq!(log.borrow().len(), 1);
  assert!(log.borrow()[0] > 0.0);
}

#[test]
fn snapshotter_gates_tasks1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_snapshot_runtime(temp_dir.path(), "snap");

  assert!(runtime.is_snapshotter());
  assert!(matches!(
    runtime.process_tasks(),
    Err(TheErr::InvalidState(_))
  ));
  assert!(matches!(
    runtime.process_idle_tasks(1.0),
    Err(TheErr::InvalidState(_))
  ));

  runtime.dispose_runtime();
}

#[test]
fn function_templates1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());

  let template = {
    let scope = &mut runtime.handle_scope();
    let address = crate::bridge::dispatch::register_function0::<i32>(
      forty_two,
    );
    let template = crate::bridge::function_template_for(scope, address);
    v8::Global::new(scope, template)
  };

  runtime.set_function_template("", "fortyTwo", "global", template);
  assert!(runtime.get_function_template("fortyTwo").is_some());
  assert!(runtime.get_function_template("missing").is_none());

  let state = runtime.state();
  let state = state.borrow();
  assert_eq!(state.function_templates.len(), 1);
  assert_eq!(state.function_templates[0].data_index, 0);
  assert_eq!(state.function_templates[0].namespace, "global");
}

fn forty_two(_scope: &mut v8::HandleScope) -> TheResult<i32> {
  Ok(42)
}

#[test]
fn isolate_helper1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());

  let helper = JsRuntimeIsolateHelper;
  let isolate = runtime.isolate();
  assert!(helper.foreground_runner(isolate).is_some());
  assert!(helper.idle_tasks_enabled(isolate));
}

#[test]
fn runtime_snapshot_round_trip1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  helpers::write_file(
    temp_dir.path(),
    "js/init.js",
    "globalThis.Baked = 'yes';",
  );

  let snap_data = {
    let mut snapshotter =
      helpers::make_snapshot_runtime(temp_dir.path(), "round-trip");
    snapshotter
      .create_context(
        "baked",
        Some(PathBuf::from("%JS%/init.js")),
        "",
        None,
        true,
        SnapshotMethod::NamespaceAndEntrypoint,
      )
      .unwrap();
    snapshotter.make_snapshot().unwrap()
  };

  assert_eq!(snap_data.name, "round-trip");
  assert!(!snap_data.startup_data.is_empty());
  assert_eq!(
    snap_data.context_indexes.get_index_for_name(DEFAULT_CONTEXT_NAME),
    Some(0)
  );
  assert_eq!(snap_data.context_indexes.get_index_for_name("baked"), Some(1));

  // Restore the runtime and materialize the baked context by name.
  let roots = helpers::make_roots(temp_dir.path());
  let code_cache = helpers::make_code_cache(roots.clone());
  let mut restored = JsRuntime::new_restored(
    JsRuntimeOptions {
      name: "round-trip".to_string(),
      snapshot_index: 0,
      snapshot_attribute: SnapshotAttribute::SnapshotAndRestore,
      idle_enabled: false,
      app_name: "test-app".to_string(),
      app_version: "1.0.0".to_string(),
      asset_roots: roots,
      code_cache,
    },
    snap_data,
  )
  .unwrap();

  let context = restored
    .create_context_from_snapshot("baked", None)
    .unwrap();
  assert_eq!(context.borrow().snap_index(), 1);

  let scope = &mut restored.handle_scope();
  let result =
    JsContext::run_script(&context, scope, "globalThis.Baked").unwrap();
  let result = v8::Local::new(scope, result);
  assert_eq!(String::from_v8(scope, result), Some("yes".to_string()));
}
