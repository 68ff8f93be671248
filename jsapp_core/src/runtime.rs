//! One isolate: contexts, templates, handle closers and the per-isolate
//! task runner.

use crate::assets::AppAssetRootsRc;
use crate::bridge::registry;
use crate::bridge::SnapshotHandleCloser;
use crate::codecache::CodeCacheRc;
use crate::context::{
  create_context_in_scope, host_create_shadow_realm_context_cb,
  ContextCreationSpec, JsContextRc, SnapshotMethod,
};
use crate::modules::hooks;
use crate::platform::{
  self, ForegroundTaskRunner, ForegroundTaskRunnerRc, MonotonicClock,
  PlatformRuntimeProvider, SystemMonotonicClock, TaskRunScope,
};
use crate::prelude::*;
use crate::snapshot::data::{FuncTplSnapData, RuntimeSnapData};
use crate::snapshot::named_indexes::NamedIndexes;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Name of the built-in default context, always at index 0 of the context
/// name table.
pub const DEFAULT_CONTEXT_NAME: &str = "v8-default";
pub const DEFAULT_CONTEXT_INDEX: u64 = 0;

/// Whether a runtime participates in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotAttribute {
  NotSnapshottable,
  SnapshotOnly,
  SnapshotAndRestore,
}

/// A free function template installed on a runtime.
pub struct FunctionTemplateEntry {
  pub template: v8::Global<v8::FunctionTemplate>,
  pub class_name: String,
  pub function_name: String,
  pub namespace: String,
  pub data_index: u64,
}

/// The state of the runtime, stored in the isolate slot.
pub struct JsRuntimeState {
  pub name: String,
  /// Index into the snapshot's runtime table, zero for an ad-hoc runtime.
  pub snapshot_index: u64,
  pub idle_enabled: bool,
  pub snapshot_attribute: SnapshotAttribute,
  pub is_snapshotter: bool,
  pub is_restored: bool,
  pub app_name: String,
  pub app_version: String,
  pub contexts: HashMap<String, JsContextRc>,
  pub object_templates: HashMap<usize, v8::Global<v8::ObjectTemplate>>,
  pub function_templates: Vec<FunctionTemplateEntry>,
  pub shadow_realm_counter: u32,
  pub asset_roots: AppAssetRootsRc,
  pub code_cache: CodeCacheRc,
  /// Snapshot data the runtime was restored from, when in the restored
  /// role.
  pub restored_data: Option<RuntimeSnapData>,
  handle_closers: Vec<std::rc::Weak<RefCell<dyn SnapshotHandleCloser>>>,
  task_runner: ForegroundTaskRunnerRc,
  clock: Arc<dyn MonotonicClock>,
}

rc_refcell_ptr!(JsRuntimeState);

impl JsRuntimeState {
  /// Returns the runtime state stored in the given isolate.
  pub fn from_isolate(isolate: &v8::Isolate) -> JsRuntimeStateRc {
    isolate
      .get_slot::<JsRuntimeStateRc>()
      .unwrap()
      .clone()
  }

  /// Finds the context wrapping the given v8 context.
  pub fn find_context_by_v8(
    &self,
    context: &v8::Global<v8::Context>,
  ) -> Option<JsContextRc> {
    self
      .contexts
      .values()
      .find(|ctx| ctx.borrow().v8_context() == Some(context))
      .cloned()
  }

  pub fn task_runner(&self) -> ForegroundTaskRunnerRc {
    self.task_runner.clone()
  }

  /// Appends a handle closer. Closers are invoked in reverse registration
  /// order before a snapshot.
  pub fn register_snapshot_handle_closer(
    &mut self,
    closer: &Rc<RefCell<dyn SnapshotHandleCloser>>,
  ) {
    self.handle_closers.push(Rc::downgrade(closer));
  }

  pub fn unregister_snapshot_handle_closer(
    &mut self,
    closer: &Rc<RefCell<dyn SnapshotHandleCloser>>,
  ) {
    let target = Rc::downgrade(closer);
    self
      .handle_closers
      .retain(|entry| !entry.ptr_eq(&target));
  }

  pub fn handle_closer_count(&self) -> usize {
    self
      .handle_closers
      .iter()
      .filter(|weak| weak.strong_count() > 0)
      .count()
  }
}

/// Options for creating a [`JsRuntime`].
#[derive(Clone)]
pub struct JsRuntimeOptions {
  pub name: String,
  pub snapshot_index: u64,
  pub snapshot_attribute: SnapshotAttribute,
  pub idle_enabled: bool,
  pub app_name: String,
  pub app_version: String,
  pub asset_roots: AppAssetRootsRc,
  pub code_cache: CodeCacheRc,
}

/// Wraps one v8 isolate.
pub struct JsRuntime {
  isolate: Option<v8::OwnedIsolate>,
  state: JsRuntimeStateRc,
  is_snapshotter: bool,
  disposed: bool,
  /// A custom context provider overriding the app's, when set.
  context_provider: Option<Rc<dyn crate::provider::ContextProvider>>,
}

rc_refcell_ptr!(JsRuntime);

impl JsRuntime {
  /// Creates a normal runtime.
  pub fn new(options: JsRuntimeOptions) -> TheResult<JsRuntime> {
    JsRuntime::create(options, None, false)
  }

  /// Creates a runtime whose isolate restores from a VM start-up blob. The
  /// blob's own contexts are materialized on demand through
  /// [`JsRuntime::create_context_from_snapshot`].
  pub fn new_restored(
    options: JsRuntimeOptions,
    snap_data: RuntimeSnapData,
  ) -> TheResult<JsRuntime> {
    JsRuntime::create(options, Some(snap_data), false)
  }

  /// Creates a runtime in the snapshot-creation role. It may not run user
  /// tasks; every context it creates can be added to the snapshot.
  pub fn new_snapshotter(options: JsRuntimeOptions) -> TheResult<JsRuntime> {
    JsRuntime::create(options, None, true)
  }

  fn create(
    options: JsRuntimeOptions,
    snap_data: Option<RuntimeSnapData>,
    is_snapshotter: bool,
  ) -> TheResult<JsRuntime> {
    platform::init_v8();

    let is_restored = snap_data.is_some();
    let references = registry::v8_external_references();

    let mut isolate = if is_snapshotter {
      v8::Isolate::snapshot_creator(Some(references), None)
    } else {
      let mut params = v8::Isolate::create_params()
        .external_references(references.clone());
      if let Some(snap_data) = snap_data.as_ref() {
        if snap_data.startup_data.is_empty() {
          return Err(TheErr::CorruptSnapshot(format!(
            "runtime {:?} has no start-up data",
            options.name
          )));
        }
        params = params.snapshot_blob(snap_data.startup_data.clone());
      }
      v8::Isolate::new(params)
    };

    isolate.set_capture_stack_trace_for_uncaught_exceptions(true, 10);
    isolate.set_host_import_module_dynamically_callback(
      hooks::host_import_module_dynamically_cb,
    );
    isolate.set_host_initialize_import_meta_object_callback(
      hooks::host_initialize_import_meta_object_cb,
    );
    isolate.set_host_create_shadow_realm_context_callback(
      host_create_shadow_realm_context_cb,
    );

    let clock = platform::AppPlatform::get()
      .map(|platform| platform.clock())
      .unwrap_or_else(|_| Arc::new(SystemMonotonicClock::new()));

    let state = JsRuntimeState::to_rc(JsRuntimeState {
      name: options.name.clone(),
      snapshot_index: options.snapshot_index,
      idle_enabled: options.idle_enabled,
      snapshot_attribute: options.snapshot_attribute,
      is_snapshotter,
      is_restored,
      app_name: options.app_name,
      app_version: options.app_version,
      contexts: HashMap::new(),
      object_templates: HashMap::new(),
      function_templates: Vec::new(),
      shadow_realm_counter: 0,
      asset_roots: options.asset_roots,
      code_cache: options.code_cache,
      restored_data: snap_data,
      handle_closers: Vec::new(),
      task_runner: ForegroundTaskRunner::to_rc(
        ForegroundTaskRunner::with_clock(clock.clone()),
      ),
      clock,
    });
    isolate.set_slot(state.clone());

    let mut runtime = JsRuntime {
      isolate: Some(isolate),
      state,
      is_snapshotter,
      disposed: false,
      context_provider: None,
    };

    // The built-in default context always occupies index 0.
    runtime.create_context_spec(ContextCreationSpec {
      name: DEFAULT_CONTEXT_NAME.to_string(),
      namespace: String::new(),
      entry_point: None,
      snap_entry_point: None,
      supports_snapshots: true,
      snapshot_method: SnapshotMethod::NamespaceOnly,
      snap_index: DEFAULT_CONTEXT_INDEX,
    })?;

    Ok(runtime)
  }

  pub fn name(&self) -> String {
    self.state.borrow().name.clone()
  }

  pub fn snapshot_index(&self) -> u64 {
    self.state.borrow().snapshot_index
  }

  pub fn is_snapshotter(&self) -> bool {
    self.is_snapshotter
  }

  pub fn is_restored(&self) -> bool {
    self.state.borrow().is_restored
  }

  /// Whether the runtime can be cloned into a snapshot.
  pub fn can_be_snapshotted(&self) -> bool {
    self.state.borrow().snapshot_attribute
      != SnapshotAttribute::NotSnapshottable
  }

  pub fn snapshot_attribute(&self) -> SnapshotAttribute {
    self.state.borrow().snapshot_attribute
  }

  pub fn idle_tasks_enabled(&self) -> bool {
    self.state.borrow().idle_enabled
  }

  pub fn state(&self) -> JsRuntimeStateRc {
    self.state.clone()
  }

  pub fn isolate(&mut self) -> &mut v8::Isolate {
    self.isolate.as_mut().expect("isolate is gone")
  }

  /// A handle scope entered into the default context.
  pub fn handle_scope(&mut self) -> v8::HandleScope {
    let context = self
      .state
      .borrow()
      .contexts
      .get(DEFAULT_CONTEXT_NAME)
      .and_then(|ctx| ctx.borrow().v8_context().cloned())
      .expect("default context is gone");
    v8::HandleScope::with_context(self.isolate.as_mut().unwrap(), context)
  }

  /// Sets a custom context provider on the runtime different from what
  /// the app has.
  pub fn set_context_provider(
    &mut self,
    provider: Rc<dyn crate::provider::ContextProvider>,
  ) {
    self.context_provider = Some(provider);
  }

  pub fn context_provider(
    &self,
  ) -> Option<Rc<dyn crate::provider::ContextProvider>> {
    self.context_provider.clone()
  }

  /// Creates a context with the specified namespace through the context
  /// provider. An empty namespace yields a bare default context.
  pub fn create_context(
    &mut self,
    name: &str,
    entry_point: Option<PathBuf>,
    namespace: &str,
    snap_entry_point: Option<PathBuf>,
    supports_snapshots: bool,
    snapshot_method: SnapshotMethod,
  ) -> TheResult<JsContextRc> {
    let spec = ContextCreationSpec {
      name: name.to_string(),
      namespace: namespace.to_string(),
      entry_point,
      snap_entry_point,
      supports_snapshots,
      snapshot_method,
      snap_index: 0,
    };
    match self.context_provider.clone() {
      Some(provider) => provider.create_context(self, spec),
      None => self.create_context_with_spec(spec),
    }
  }

  /// Creates a context directly from a creation spec, bypassing any
  /// custom provider.
  pub fn create_context_with_spec(
    &mut self,
    spec: ContextCreationSpec,
  ) -> TheResult<JsContextRc> {
    self.create_context_spec(spec)
  }

  /// Materializes a named context from the runtime's snapshot. The base
  /// name, when given, is resolved through the stored name table;
  /// otherwise the context starts from the bare default.
  pub fn create_context_from_snapshot(
    &mut self,
    name: &str,
    base_name: Option<&str>,
  ) -> TheResult<JsContextRc> {
    let (snap_index, record) = {
      let state = self.state.borrow();
      let data = state.restored_data.as_ref().ok_or_else(|| {
        TheErr::InvalidState(format!(
          "runtime {:?} was not restored from a snapshot",
          state.name
        ))
      })?;
      let lookup = base_name.unwrap_or(name);
      match data.context_indexes.get_index_for_name(lookup) {
        Some(index) => {
          let record = data
            .contexts
            .iter()
            .find(|record| record.name == lookup)
            .cloned();
          (index, record)
        }
        None => {
          debug!(
            "Context {lookup:?} not in the snapshot, using the bare default"
          );
          (DEFAULT_CONTEXT_INDEX, None)
        }
      }
    };

    let (namespace, entry_point) = match record {
      Some(record) => (
        record.namespace,
        (!record.entry_point.is_empty())
          .then(|| PathBuf::from(record.entry_point)),
      ),
      None => (String::new(), None),
    };

    self.create_context_spec(ContextCreationSpec {
      name: name.to_string(),
      namespace,
      entry_point,
      snap_entry_point: None,
      supports_snapshots: true,
      snapshot_method: SnapshotMethod::NamespaceAndEntrypoint,
      snap_index,
    })
  }

  fn create_context_spec(
    &mut self,
    spec: ContextCreationSpec,
  ) -> TheResult<JsContextRc> {
    let state = self.state.clone();
    let isolate = self.isolate.as_mut().ok_or_else(|| {
      TheErr::InvalidState("runtime has no isolate".to_string())
    })?;
    let scope = &mut v8::HandleScope::new(isolate);
    create_context_in_scope(scope, state, spec)
  }

  pub fn get_context_by_name(&self, name: &str) -> Option<JsContextRc> {
    self.state.borrow().contexts.get(name).cloned()
  }

  pub fn dispose_context(&mut self, name: &str) -> TheResult<()> {
    self
      .state
      .borrow_mut()
      .contexts
      .remove(name)
      .map(|_| ())
      .ok_or_else(|| TheErr::NotFound(format!("context {name:?}")))
  }

  /// Drains the foreground runner until no task is runnable. Each task
  /// runs under its own nesting scope.
  pub fn process_tasks(&mut self) -> TheResult<()> {
    if self.is_snapshotter {
      return Err(TheErr::InvalidState(
        "a snapshot runtime may not run user tasks".to_string(),
      ));
    }
    let runner = self.state.borrow().task_runner();
    let scope = &mut self.handle_scope();
    loop {
      let task = runner.borrow_mut().get_next_task();
      let Some(mut task) = task else {
        break;
      };
      let _run_scope = TaskRunScope::new(runner.clone());
      task.run(scope);
      scope.perform_microtask_checkpoint();
    }
    Ok(())
  }

  /// Pulls idle tasks while time remains.
  pub fn process_idle_tasks(&mut self, time_left: f64) -> TheResult<()> {
    if self.is_snapshotter {
      return Err(TheErr::InvalidState(
        "a snapshot runtime may not run user tasks".to_string(),
      ));
    }
    if !self.state.borrow().idle_enabled {
      return Ok(());
    }
    let runner = self.state.borrow().task_runner();
    let clock = self.state.borrow().clock.clone();
    let deadline = clock.now_seconds() + time_left;
    let scope = &mut self.handle_scope();
    while clock.now_seconds() < deadline {
      let task = runner.borrow_mut().get_next_idle_task();
      let Some(mut task) = task else {
        break;
      };
      task.run(scope, deadline);
    }
    Ok(())
  }

  pub fn set_object_template(
    &mut self,
    key: usize,
    template: v8::Global<v8::ObjectTemplate>,
  ) {
    self
      .state
      .borrow_mut()
      .object_templates
      .insert(key, template);
  }

  pub fn get_object_template(
    &self,
    key: usize,
  ) -> Option<v8::Global<v8::ObjectTemplate>> {
    self.state.borrow().object_templates.get(&key).cloned()
  }

  /// Records a free function template. The data index is its registration
  /// order.
  pub fn set_function_template(
    &mut self,
    class_name: &str,
    function_name: &str,
    namespace: &str,
    template: v8::Global<v8::FunctionTemplate>,
  ) {
    let mut state = self.state.borrow_mut();
    let data_index = state.function_templates.len() as u64;
    state.function_templates.push(FunctionTemplateEntry {
      template,
      class_name: class_name.to_string(),
      function_name: function_name.to_string(),
      namespace: namespace.to_string(),
      data_index,
    });
  }

  pub fn get_function_template(
    &self,
    function_name: &str,
  ) -> Option<v8::Global<v8::FunctionTemplate>> {
    self
      .state
      .borrow()
      .function_templates
      .iter()
      .find(|entry| entry.function_name == function_name)
      .map(|entry| entry.template.clone())
  }

  pub fn register_snapshot_handle_closer(
    &mut self,
    closer: &Rc<RefCell<dyn SnapshotHandleCloser>>,
  ) {
    self.state.borrow_mut().register_snapshot_handle_closer(closer);
  }

  pub fn unregister_snapshot_handle_closer(
    &mut self,
    closer: &Rc<RefCell<dyn SnapshotHandleCloser>>,
  ) {
    self
      .state
      .borrow_mut()
      .unregister_snapshot_handle_closer(closer);
  }

  /// Invokes every handle closer in reverse registration order.
  pub fn close_open_handles_for_snapshot(&mut self) {
    let closers = {
      let state = self.state.borrow();
      state.handle_closers.clone()
    };
    for weak in closers.iter().rev() {
      if let Some(closer) = weak.upgrade() {
        closer.borrow_mut().close_handle_for_snapshot();
      }
    }
  }

  /// Serializes the runtime and emits the VM start-up blob. Consumes the
  /// isolate; the runtime is unusable afterwards.
  pub fn make_snapshot(&mut self) -> TheResult<RuntimeSnapData> {
    if !self.is_snapshotter {
      return Err(TheErr::InvalidState(format!(
        "runtime {:?} is not in the snapshot role",
        self.name()
      )));
    }

    // Collect the metadata before any handle is dropped.
    let mut snap_data = RuntimeSnapData {
      name: self.name(),
      idle_enabled: self.state.borrow().idle_enabled,
      context_indexes: NamedIndexes::default(),
      contexts: Vec::new(),
      function_templates: Vec::new(),
      startup_data: Vec::new(),
    };

    {
      let state = self.state.borrow();
      for entry in state.function_templates.iter() {
        snap_data.function_templates.push(FuncTplSnapData {
          data_index: entry.data_index,
          class_name: entry.class_name.clone(),
          function_name: entry.function_name.clone(),
          namespace: entry.namespace.clone(),
        });
      }
    }

    // Order contexts with the default first, then sorted by name so the
    // assigned indexes are stable.
    let mut names: Vec<String> = {
      let state = self.state.borrow();
      state
        .contexts
        .keys()
        .filter(|name| {
          *name != DEFAULT_CONTEXT_NAME
            && state.contexts[*name].borrow().supports_snapshots()
        })
        .cloned()
        .collect()
    };
    names.sort();

    {
      let isolate = self.isolate.as_mut().ok_or_else(|| {
        TheErr::InvalidState("runtime has no isolate".to_string())
      })?;
      let scope = &mut v8::HandleScope::new(isolate);
      let state = self.state.borrow();

      let default_ctx =
        state.contexts.get(DEFAULT_CONTEXT_NAME).ok_or_else(|| {
          TheErr::InvalidState("default context is gone".to_string())
        })?;
      let local = default_ctx.borrow().local_context(scope);
      scope.set_default_context(local);
      snap_data
        .context_indexes
        .add_named_index(DEFAULT_CONTEXT_INDEX, DEFAULT_CONTEXT_NAME)?;
      snap_data
        .contexts
        .push(default_ctx.borrow().make_snap_data());

      for name in &names {
        let ctx = state.contexts.get(name).unwrap();
        let local = ctx.borrow().local_context(scope);
        let index = scope.add_context(local);
        snap_data
          .context_indexes
          .add_named_index(index as u64 + 1, name)?;
        snap_data.contexts.push(ctx.borrow().make_snap_data());
      }
    }

    // Close every outstanding handle so the creator owns the heap: handle
    // closers in LIFO order, then the contexts themselves, templates last.
    self.close_open_handles_for_snapshot();
    {
      let mut state = self.state.borrow_mut();
      for ctx in state.contexts.values() {
        ctx.borrow_mut().close_handle_for_snapshot();
      }
      state.contexts.clear();
      state.object_templates.clear();
      state.function_templates.clear();
      state.task_runner.borrow_mut().terminate();
    }

    let isolate = self.isolate.take().ok_or_else(|| {
      TheErr::InvalidState("runtime has no isolate".to_string())
    })?;
    self.disposed = true;
    let blob = isolate
      .create_blob(v8::FunctionCodeHandling::Clear)
      .ok_or_else(|| {
        TheErr::InvalidState(format!(
          "failed to create the snapshot blob for {:?}",
          snap_data.name
        ))
      })?;
    snap_data.startup_data = blob.to_vec();

    Ok(snap_data)
  }

  /// Disposes of resources for the runtime. Idempotent.
  pub fn dispose_runtime(&mut self) {
    if self.disposed {
      return;
    }
    self.disposed = true;

    {
      let mut state = self.state.borrow_mut();
      state.task_runner.borrow_mut().terminate();
      let closers = std::mem::take(&mut state.handle_closers);
      drop(state);
      // Destroy instances whose weak callbacks never ran.
      for weak in closers.iter().rev() {
        if let Some(closer) = weak.upgrade() {
          closer.borrow_mut().dispose();
        }
      }
    }

    {
      let mut state = self.state.borrow_mut();
      state.contexts.clear();
      state.object_templates.clear();
      state.function_templates.clear();
      state.restored_data = None;
    }

    if let Some(isolate) = self.isolate.take() {
      if self.is_snapshotter {
        // The snapshot creator owns this isolate; dropping it without a
        // blob aborts.
        std::mem::forget(isolate);
      }
    }
  }
}

impl Drop for JsRuntime {
  fn drop(&mut self) {
    self.dispose_runtime();
  }
}

/// The platform helper routing isolate questions to their runtimes.
pub struct JsRuntimeIsolateHelper;

impl PlatformRuntimeProvider for JsRuntimeIsolateHelper {
  fn foreground_runner(
    &self,
    isolate: &v8::Isolate,
  ) -> Option<ForegroundTaskRunnerRc> {
    isolate
      .get_slot::<JsRuntimeStateRc>()
      .map(|state| state.borrow().task_runner())
  }

  fn idle_tasks_enabled(&self, isolate: &v8::Isolate) -> bool {
    isolate
      .get_slot::<JsRuntimeStateRc>()
      .map(|state| state.borrow().idle_enabled)
      .unwrap_or(false)
  }
}
