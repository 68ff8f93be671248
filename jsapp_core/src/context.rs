//! One JS realm and its modules.

use crate::assets::AppAssetRootsRc;
use crate::bridge::registry;
use crate::codecache::CodeCacheRc;
use crate::jserror::JsError;
use crate::modules::{self, ModuleMap};
use crate::prelude::*;
use crate::runtime::JsRuntimeState;
use crate::snapshot::data::{ContextSnapData, ModuleSnapData};

use std::sync::atomic::{AtomicU64, Ordering};

/// How a context participates in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMethod {
  /// Only the namespace setup is baked in; the entry point runs on
  /// restore.
  NamespaceOnly,
  /// The entry point runs before the snapshot is taken.
  NamespaceAndEntrypoint,
}

/// Everything needed to create one context.
#[derive(Debug, Clone)]
pub struct ContextCreationSpec {
  pub name: String,
  pub namespace: String,
  pub entry_point: Option<PathBuf>,
  pub snap_entry_point: Option<PathBuf>,
  pub supports_snapshots: bool,
  pub snapshot_method: SnapshotMethod,
  /// The named-index the context restores from; 0 is the fresh/bare
  /// default.
  pub snap_index: u64,
}

/// A sand-boxed execution context with its own set of built-in objects and
/// functions.
pub struct JsContext {
  name: String,
  namespace: String,
  entry_point: Option<PathBuf>,
  snap_entry_point: Option<PathBuf>,
  supports_snapshots: bool,
  snapshot_method: SnapshotMethod,
  security_token: String,
  snap_index: u64,
  context: Option<v8::Global<v8::Context>>,
  module_map: ModuleMap,
  asset_roots: AppAssetRootsRc,
  code_cache: CodeCacheRc,
}

rc_refcell_ptr!(JsContext);

fn next_security_token(name: &str) -> String {
  static COUNTER: AtomicU64 = AtomicU64::new(1);
  format!("{name}:{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

impl JsContext {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn entry_point(&self) -> Option<&Path> {
    self.entry_point.as_deref()
  }

  pub fn snap_entry_point(&self) -> Option<&Path> {
    self.snap_entry_point.as_deref()
  }

  pub fn supports_snapshots(&self) -> bool {
    self.supports_snapshots
  }

  pub fn snapshot_method(&self) -> SnapshotMethod {
    self.snapshot_method
  }

  pub fn security_token(&self) -> &str {
    &self.security_token
  }

  /// The named-index the context was restored from, 0 when fresh.
  pub fn snap_index(&self) -> u64 {
    self.snap_index
  }

  pub fn module_map(&self) -> &ModuleMap {
    &self.module_map
  }

  pub fn module_map_mut(&mut self) -> &mut ModuleMap {
    &mut self.module_map
  }

  pub fn asset_roots(&self) -> &AppAssetRootsRc {
    &self.asset_roots
  }

  pub fn code_cache(&self) -> &CodeCacheRc {
    &self.code_cache
  }

  pub fn v8_context(&self) -> Option<&v8::Global<v8::Context>> {
    self.context.as_ref()
  }

  /// Gets a local context for use.
  pub fn local_context<'s>(
    &self,
    scope: &mut v8::HandleScope<'s, ()>,
  ) -> v8::Local<'s, v8::Context> {
    v8::Local::new(scope, self.context.as_ref().unwrap())
  }

  /// Drops the global holding the context so the snapshot creator can
  /// capture it. The module map's handles go with it.
  pub fn close_handle_for_snapshot(&mut self) {
    self.module_map.reset();
    self.context = None;
  }

  /// Emits the context's snapshot record: name, namespace, entry point and
  /// each module's serializable tuple.
  pub fn make_snap_data(&self) -> ContextSnapData {
    let modules = self
      .module_map
      .iter()
      .map(|info| {
        let info = info.borrow();
        ModuleSnapData {
          path: info.path().to_string_lossy().to_string(),
          name: info.name().to_string(),
          version: info.version().map(|v| v.to_string()),
          module_type: info.module_type(),
        }
      })
      .collect();

    ContextSnapData {
      name: self.name.clone(),
      namespace: self.namespace.clone(),
      entry_point: self
        .entry_point
        .as_ref()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default(),
      modules,
    }
  }
}

// Module and script execution.
impl JsContext {
  /// Loads, links and evaluates the module at `path` (which may carry
  /// leading `%TOKEN%`s) and returns the module namespace.
  pub fn run_module(
    ctx: &JsContextRc,
    scope: &mut v8::HandleScope,
    path: &Path,
  ) -> TheResult<v8::Global<v8::Value>> {
    let local_context = ctx.borrow().local_context(scope);
    let scope = &mut v8::ContextScope::new(scope, local_context);

    let info = modules::load_module(scope, ctx, path)?;
    modules::instantiate_module(scope, &info)?;
    modules::run_module(scope, &info)
  }

  /// Runs the specified string as traditional JS code (not a module).
  pub fn run_script(
    ctx: &JsContextRc,
    scope: &mut v8::HandleScope,
    source: &str,
  ) -> TheResult<v8::Global<v8::Value>> {
    let (local_context, name) = {
      let borrowed = ctx.borrow();
      (borrowed.local_context(scope), borrowed.name.clone())
    };
    let scope = &mut v8::ContextScope::new(scope, local_context);

    let origin =
      modules::create_origin(scope, &format!("{name}:script"), false);
    let source = v8::String::new(scope, source)
      .ok_or_else(|| TheErr::Compile("script source too large".to_string()))?;

    let tc_scope = &mut v8::TryCatch::new(scope);
    let script = match v8::Script::compile(tc_scope, source, Some(&origin)) {
      Some(script) => script,
      None => {
        return Err(
          JsError::from_try_catch(tc_scope)
            .map(|e| e.into_compile_err())
            .unwrap_or_else(|| TheErr::Compile("script".to_string())),
        );
      }
    };

    match script.run(tc_scope) {
      Some(value) => Ok(v8::Global::new(tc_scope, value)),
      None => Err(
        JsError::from_try_catch(tc_scope)
          .map(|e| e.into_eval_err())
          .unwrap_or_else(|| TheErr::Eval("script".to_string())),
      ),
    }
  }
}

/// Creates a context inside an already entered isolate scope, installs it
/// in the runtime state, runs the namespace setup and, unless suppressed,
/// the entry point.
pub fn create_context_in_scope(
  scope: &mut v8::HandleScope<()>,
  state_rc: crate::runtime::JsRuntimeStateRc,
  spec: ContextCreationSpec,
) -> TheResult<JsContextRc> {
  // A non-empty namespace must exist in the callback registry.
  if !spec.namespace.is_empty() && !registry::has_namespace(&spec.namespace) {
    return Err(TheErr::ConfigError(format!(
      "namespace {:?} has no registered setup",
      spec.namespace
    )));
  }
  if state_rc.borrow().contexts.contains_key(&spec.name) {
    return Err(TheErr::AlreadyExists(format!("context {:?}", spec.name)));
  }

  let (asset_roots, code_cache, is_restored, is_snapshotter) = {
    let state = state_rc.borrow();
    (
      state.asset_roots.clone(),
      state.code_cache.clone(),
      state.is_restored,
      state.is_snapshotter,
    )
  };

  let scope = &mut v8::HandleScope::new(scope);
  let context = if is_restored && spec.snap_index > 0 {
    // Named indexes are offset by one: index 0 is the default context.
    let real_index = (spec.snap_index - 1) as usize;
    match v8::Context::from_snapshot(scope, real_index, Default::default()) {
      Some(context) => context,
      None => {
        return Err(TheErr::CorruptSnapshot(format!(
          "no context at snapshot index {}",
          spec.snap_index
        )));
      }
    }
  } else {
    v8::Context::new(scope, Default::default())
  };

  let security_token = next_security_token(&spec.name);
  let token = v8::String::new(scope, &security_token).unwrap();
  context.set_security_token(token.into());

  let js_context = JsContext::to_rc(JsContext {
    name: spec.name.clone(),
    namespace: spec.namespace.clone(),
    entry_point: spec.entry_point.clone(),
    snap_entry_point: spec.snap_entry_point.clone(),
    supports_snapshots: spec.supports_snapshots,
    snapshot_method: spec.snapshot_method,
    security_token,
    snap_index: spec.snap_index,
    context: Some(v8::Global::new(scope, context)),
    module_map: ModuleMap::new(),
    asset_roots,
    code_cache,
  });

  // Install before running any JS so the VM-to-context lookup works from
  // inside the hooks.
  state_rc
    .borrow_mut()
    .contexts
    .insert(spec.name.clone(), js_context.clone());

  let scope = &mut v8::ContextScope::new(scope, context);

  // Contexts materialized from a snapshot heap already carry their
  // namespace state; a bare context (empty namespace) gets none at all.
  if !is_restored && !spec.namespace.is_empty() {
    registry::run_namespace_setup(scope, context, &spec.namespace)?;
  }

  // A snapshotting runtime with a namespace-only method stops here. A
  // context restored from a blob whose entry point was baked in does not
  // run it a second time.
  let run_entry = if is_snapshotter {
    spec.snapshot_method == SnapshotMethod::NamespaceAndEntrypoint
  } else if is_restored && spec.snap_index > 0 {
    spec.snapshot_method == SnapshotMethod::NamespaceOnly
  } else {
    true
  };
  if run_entry {
    let entry = if is_snapshotter {
      spec.snap_entry_point.clone().or(spec.entry_point.clone())
    } else {
      spec.entry_point.clone()
    };
    if let Some(entry) = entry {
      if let Err(e) = JsContext::run_module(&js_context, scope, &entry) {
        state_rc.borrow_mut().contexts.remove(&spec.name);
        return Err(e);
      }
    }
  }

  Ok(js_context)
}

/// V8 host callback creating the child context for a shadow realm. The
/// derived context is named `<base>:shadow:<n>` with a runtime-scoped
/// counter.
pub fn host_create_shadow_realm_context_cb<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> Option<v8::Local<'s, v8::Context>> {
  let state_rc = JsRuntimeState::from_isolate(scope);
  let initiator = scope.get_current_context();
  let initiator_global = v8::Global::new(scope, initiator);
  let base = state_rc.borrow().find_context_by_v8(&initiator_global)?;

  let (base_name, namespace, supports) = {
    let borrowed = base.borrow();
    (
      borrowed.name.clone(),
      borrowed.namespace.clone(),
      borrowed.supports_snapshots,
    )
  };
  let shadow_count = {
    let mut state = state_rc.borrow_mut();
    state.shadow_realm_counter += 1;
    state.shadow_realm_counter
  };
  let shadow_name = format!("{base_name}:shadow:{shadow_count}");

  let spec = ContextCreationSpec {
    name: shadow_name.clone(),
    namespace,
    entry_point: None,
    snap_entry_point: None,
    supports_snapshots: supports,
    snapshot_method: SnapshotMethod::NamespaceOnly,
    snap_index: 0,
  };

  match create_context_in_scope(scope, state_rc.clone(), spec) {
    Ok(shadow) => {
      let local = shadow.borrow().local_context(scope);
      Some(local)
    }
    Err(e) => {
      error!("Failed to create shadow realm {shadow_name:?}: {e}");
      None
    }
  }
}
