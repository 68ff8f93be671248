//! The top-level embedding host: runtimes, code cache, asset roots and the
//! snapshot brokers.

use crate::assets::{AppAssetRoots, AppAssetRootsRc};
use crate::codecache::{CodeCache, CodeCacheRc};
use crate::prelude::*;
use crate::provider::{
  ContextProvider, RuntimeProvider, RuntimeRole, V8ContextProvider,
  V8RuntimeProvider,
};
use crate::runtime::{
  JsRuntime, JsRuntimeOptions, JsRuntimeRc, SnapshotAttribute,
};
use crate::snapshot::creator::{JsSnapshotCreator, V8SnapshotCreator};
use crate::snapshot::data::AppSnapData;
use crate::snapshot::named_indexes::NamedIndexes;
use crate::snapshot::provider::{JsSnapshotProvider, V8SnapshotProvider};

use std::cell::RefCell;
use std::rc::Rc;

/// App lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
  Uninitialized,
  Initialized,
  Restored,
  Disposed,
}

/// The four broker interfaces. Missing entries fall back to the VM-backed
/// defaults at initialization.
#[derive(Default, Clone)]
pub struct AppProviders {
  pub snapshot_provider: Option<Rc<RefCell<dyn JsSnapshotProvider>>>,
  pub snapshot_creator: Option<Rc<dyn JsSnapshotCreator>>,
  pub runtime_provider: Option<Rc<dyn RuntimeProvider>>,
  pub context_provider: Option<Rc<dyn ContextProvider>>,
}

impl AppProviders {
  fn fill_defaults(&mut self) {
    if self.snapshot_provider.is_none() {
      self.snapshot_provider =
        Some(Rc::new(RefCell::new(V8SnapshotProvider::new())));
    }
    if self.snapshot_creator.is_none() {
      self.snapshot_creator = Some(Rc::new(V8SnapshotCreator::new()));
    }
    if self.runtime_provider.is_none() {
      self.runtime_provider = Some(Rc::new(V8RuntimeProvider));
    }
    if self.context_provider.is_none() {
      self.context_provider = Some(Rc::new(V8ContextProvider));
    }
  }
}

/// One embedding host instance.
pub struct JsApp {
  name: String,
  version: String,
  state: AppState,
  is_snapshotter: bool,
  asset_roots: Option<AppAssetRootsRc>,
  code_cache: Option<CodeCacheRc>,
  runtimes: HashMap<String, JsRuntimeRc>,
  runtime_order: Vec<String>,
  providers: AppProviders,
  snapshot_in_progress: bool,
}

rc_refcell_ptr!(JsApp);

impl JsApp {
  /// A fresh, uninitialized app.
  pub fn new(name: &str, version: &str) -> JsApp {
    JsApp {
      name: name.to_string(),
      version: version.to_string(),
      state: AppState::Uninitialized,
      is_snapshotter: false,
      asset_roots: None,
      code_cache: None,
      runtimes: HashMap::new(),
      runtime_order: Vec::new(),
      providers: AppProviders::default(),
      snapshot_in_progress: false,
    }
  }

  /// An app that will be reconstructed from a snapshot blob. It may only
  /// be restore-initialized.
  pub fn new_restored(name: &str, version: &str) -> JsApp {
    let mut app = JsApp::new(name, version);
    app.state = AppState::Restored;
    app
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn state(&self) -> AppState {
    self.state
  }

  pub fn is_snapshotter(&self) -> bool {
    self.is_snapshotter
  }

  pub fn asset_roots(&self) -> Option<AppAssetRootsRc> {
    self.asset_roots.clone()
  }

  pub fn code_cache(&self) -> Option<CodeCacheRc> {
    self.code_cache.clone()
  }

  pub fn snapshot_provider(
    &self,
  ) -> Option<Rc<RefCell<dyn JsSnapshotProvider>>> {
    self.providers.snapshot_provider.clone()
  }

  pub fn snapshot_creator(&self) -> Option<Rc<dyn JsSnapshotCreator>> {
    self.providers.snapshot_creator.clone()
  }

  /// The snapshot creator may be swapped out, but never while a snapshot
  /// is in progress. The other providers are immutable once initialized.
  pub fn set_snapshot_creator(
    &mut self,
    creator: Rc<dyn JsSnapshotCreator>,
  ) -> TheResult<()> {
    if self.snapshot_in_progress {
      return Err(TheErr::InvalidState(
        "a snapshot is in progress".to_string(),
      ));
    }
    self.providers.snapshot_creator = Some(creator);
    Ok(())
  }

  /// Initializes the app: validates the version, roots the asset
  /// hierarchy and locks the providers in.
  pub fn initialize(
    &mut self,
    app_root: &Path,
    mut providers: AppProviders,
    is_snapshotter: bool,
  ) -> TheResult<()> {
    match self.state {
      AppState::Uninitialized => {}
      AppState::Restored => {
        return Err(TheErr::InvalidState(
          "a restored app may only be restore-initialized".to_string(),
        ));
      }
      other => {
        return Err(TheErr::InvalidState(format!(
          "initialize called in state {other:?}"
        )));
      }
    }
    semver::Version::parse(&self.version).map_err(|e| {
      TheErr::ConfigError(format!(
        "app version {:?} is not a semantic version: {e}",
        self.version
      ))
    })?;

    providers.fill_defaults();
    let roots = AppAssetRoots::to_rc(AppAssetRoots::new(app_root)?);
    let code_cache = CodeCache::to_rc(CodeCache::new(roots.clone()));

    self.asset_roots = Some(roots);
    self.code_cache = Some(code_cache);
    self.providers = providers;
    self.is_snapshotter = is_snapshotter;
    self.state = AppState::Initialized;
    Ok(())
  }

  /// Completes construction of a restored app: loads the snapshot through
  /// the provider and checks the embedded version against this app's.
  pub fn restore_initialize(
    &mut self,
    app_root: &Path,
    snapshot_file: &Path,
    mut providers: AppProviders,
  ) -> TheResult<()> {
    if self.state != AppState::Restored {
      return Err(TheErr::InvalidState(format!(
        "restore_initialize called in state {:?}",
        self.state
      )));
    }

    providers.fill_defaults();
    let provider = providers.snapshot_provider.clone().unwrap();
    provider.borrow_mut().load_snapshot_data(snapshot_file)?;

    {
      let provider = provider.borrow();
      let data = provider.app_snap_data().ok_or_else(|| {
        TheErr::CorruptSnapshot("snapshot provider holds no data".to_string())
      })?;
      if data.version != self.version {
        return Err(TheErr::IncompatibleSnapshot(format!(
          "snapshot version {:?} does not match app version {:?}",
          data.version, self.version
        )));
      }
    }

    let roots = AppAssetRoots::to_rc(AppAssetRoots::new(app_root)?);
    let code_cache = CodeCache::to_rc(CodeCache::new(roots.clone()));

    self.asset_roots = Some(roots);
    self.code_cache = Some(code_cache);
    self.providers = providers;
    Ok(())
  }

  fn runtime_options(
    &self,
    name: &str,
    snapshot_index: u64,
    attribute: SnapshotAttribute,
    idle_enabled: bool,
  ) -> TheResult<JsRuntimeOptions> {
    Ok(JsRuntimeOptions {
      name: name.to_string(),
      snapshot_index,
      snapshot_attribute: attribute,
      idle_enabled,
      app_name: self.name.clone(),
      app_version: self.version.clone(),
      asset_roots: self.asset_roots.clone().ok_or_else(|| {
        TheErr::InvalidState("app has no asset roots".to_string())
      })?,
      code_cache: self.code_cache.clone().ok_or_else(|| {
        TheErr::InvalidState("app has no code cache".to_string())
      })?,
    })
  }

  fn install_runtime(&mut self, runtime: JsRuntime) -> JsRuntimeRc {
    let name = runtime.name();
    let runtime = JsRuntime::to_rc(runtime);
    self.runtimes.insert(name.clone(), runtime.clone());
    self.runtime_order.push(name);
    runtime
  }

  /// Creates a runtime with the given name. A snapshotter app creates
  /// every runtime in the snapshot role.
  pub fn create_js_runtime(
    &mut self,
    name: &str,
    attribute: SnapshotAttribute,
    idle_enabled: bool,
  ) -> TheResult<JsRuntimeRc> {
    if !matches!(self.state, AppState::Initialized | AppState::Restored) {
      return Err(TheErr::InvalidState(format!(
        "create_js_runtime called in state {:?}",
        self.state
      )));
    }
    if self.runtimes.contains_key(name) {
      return Err(TheErr::AlreadyExists(format!("runtime {name:?}")));
    }

    let options = self.runtime_options(name, 0, attribute, idle_enabled)?;
    let role = if self.is_snapshotter {
      RuntimeRole::Snapshotter
    } else {
      RuntimeRole::Normal
    };
    let provider = self.providers.runtime_provider.clone().unwrap();
    let mut runtime = provider.create_runtime(options, role)?;
    if let Some(context_provider) = self.providers.context_provider.clone() {
      runtime.set_context_provider(context_provider);
    }
    Ok(self.install_runtime(runtime))
  }

  /// Creates a runtime restored from the snapshot entry at `index`.
  pub fn create_js_runtime_from_index(
    &mut self,
    name: &str,
    index: u64,
    attribute: SnapshotAttribute,
    idle_enabled: bool,
  ) -> TheResult<JsRuntimeRc> {
    if self.state != AppState::Restored {
      return Err(TheErr::InvalidState(format!(
        "create_js_runtime_from_index called in state {:?}",
        self.state
      )));
    }
    if self.runtimes.contains_key(name) {
      return Err(TheErr::AlreadyExists(format!("runtime {name:?}")));
    }
    if attribute == SnapshotAttribute::SnapshotOnly {
      warn!("Runtime {name:?} is snapshot-only and can not be restored");
      return Err(TheErr::InvalidState(format!(
        "runtime {name:?} is snapshot-only"
      )));
    }

    let snap_data = {
      let provider = self.providers.snapshot_provider.clone().ok_or_else(
        || TheErr::InvalidState("app has no snapshot provider".to_string()),
      )?;
      let provider = provider.borrow();
      if !provider.is_runtime_index_valid(index) {
        return Err(TheErr::NotFound(format!("runtime index {index}")));
      }
      provider
        .app_snap_data()
        .and_then(|data| data.runtimes.get(index as usize).cloned())
        .ok_or_else(|| {
          TheErr::CorruptSnapshot(format!("no runtime record at {index}"))
        })?
    };

    let options = self.runtime_options(name, index, attribute, idle_enabled)?;
    let provider = self.providers.runtime_provider.clone().unwrap();
    let mut runtime =
      provider.create_runtime(options, RuntimeRole::Restored(snap_data))?;
    if let Some(context_provider) = self.providers.context_provider.clone() {
      runtime.set_context_provider(context_provider);
    }
    Ok(self.install_runtime(runtime))
  }

  /// Creates a runtime with the given name, or hands back the existing
  /// one.
  pub fn create_js_runtime_or_get(
    &mut self,
    name: &str,
    attribute: SnapshotAttribute,
    idle_enabled: bool,
  ) -> TheResult<JsRuntimeRc> {
    if let Some(runtime) = self.runtimes.get(name) {
      return Ok(runtime.clone());
    }
    self.create_js_runtime(name, attribute, idle_enabled)
  }

  pub fn get_runtime_by_name(&self, name: &str) -> Option<JsRuntimeRc> {
    self.runtimes.get(name).cloned()
  }

  pub fn runtime_names(&self) -> Vec<String> {
    self.runtime_order.clone()
  }

  /// Disposes of a runtime and removes it from tracking.
  pub fn dispose_runtime(&mut self, name: &str) -> TheResult<()> {
    let runtime = self
      .runtimes
      .remove(name)
      .ok_or_else(|| TheErr::NotFound(format!("runtime {name:?}")))?;
    self.runtime_order.retain(|n| n != name);
    let provider = self.providers.runtime_provider.clone().unwrap();
    provider.dispose_runtime(&mut runtime.borrow_mut());
    Ok(())
  }

  /// Builds a sibling app in the snapshot role, rebuilding every
  /// snapshottable runtime and context. The source app is unaffected.
  pub fn clone_app_for_snapshotting(&self) -> TheResult<JsAppRc> {
    if self.state != AppState::Initialized {
      return Err(TheErr::InvalidState(format!(
        "clone_app_for_snapshotting called in state {:?}",
        self.state
      )));
    }
    let roots = self.asset_roots.clone().ok_or_else(|| {
      TheErr::InvalidState("app has no asset roots".to_string())
    })?;

    let mut clone = JsApp::new(&self.name, &self.version);
    clone.initialize(roots.app_root(), self.providers.clone(), true)?;

    for runtime_name in &self.runtime_order {
      let source = self.runtimes.get(runtime_name).unwrap();
      let (attribute, idle_enabled) = {
        let source = source.borrow();
        (source.snapshot_attribute(), source.idle_tasks_enabled())
      };
      if attribute == SnapshotAttribute::NotSnapshottable {
        trace!("Skipping non-snapshottable runtime {runtime_name:?}");
        continue;
      }

      let cloned_runtime =
        clone.create_js_runtime(runtime_name, attribute, idle_enabled)?;

      // Rebuild the snapshottable contexts with identical name, namespace
      // and entry point.
      let specs = {
        let source = source.borrow();
        let state = source.state();
        let state = state.borrow();
        let mut specs = Vec::new();
        for (context_name, context) in state.contexts.iter() {
          if context_name == crate::runtime::DEFAULT_CONTEXT_NAME {
            continue;
          }
          let context = context.borrow();
          if !context.supports_snapshots() {
            trace!("Skipping non-snapshottable context {context_name:?}");
            continue;
          }
          specs.push((
            context_name.clone(),
            context.entry_point().map(|p| p.to_path_buf()),
            context.namespace().to_string(),
            context.snap_entry_point().map(|p| p.to_path_buf()),
            context.snapshot_method(),
          ));
        }
        specs
      };

      for (name, entry, namespace, snap_entry, method) in specs {
        cloned_runtime.borrow_mut().create_context(
          &name,
          entry,
          &namespace,
          snap_entry,
          true,
          method,
        )?;
      }
    }

    Ok(JsApp::to_rc(clone))
  }

  /// Writes the snapshot blob for this (snapshotter) app to `file`.
  pub fn create_snapshot(
    &mut self,
    creator: Option<Rc<dyn JsSnapshotCreator>>,
    file: &Path,
  ) -> TheResult<()> {
    if file.as_os_str().is_empty() {
      return Err(TheErr::ConfigError(
        "empty snapshot file path".to_string(),
      ));
    }
    let creator = creator
      .or_else(|| self.providers.snapshot_creator.clone())
      .ok_or_else(|| {
        TheErr::ConfigError("no snapshot creator".to_string())
      })?;
    if self.state != AppState::Initialized || !self.is_snapshotter {
      return Err(TheErr::InvalidState(
        "create_snapshot requires an initialized snapshotter app".to_string(),
      ));
    }

    self.snapshot_in_progress = true;
    let result = creator.create_snapshot(self, file);
    self.snapshot_in_progress = false;
    result
  }

  /// Collects the app snapshot record, consuming every runtime's isolate.
  pub fn make_snap_data(&mut self) -> TheResult<AppSnapData> {
    if !self.is_snapshotter {
      return Err(TheErr::InvalidState(
        "only a snapshotter app can emit snapshot data".to_string(),
      ));
    }

    let mut data = AppSnapData {
      name: self.name.clone(),
      version: self.version.clone(),
      runtime_indexes: NamedIndexes::default(),
      runtimes: Vec::new(),
    };

    for (index, runtime_name) in self.runtime_order.iter().enumerate() {
      let runtime = self.runtimes.get(runtime_name).unwrap();
      let snap = runtime.borrow_mut().make_snapshot()?;
      data.runtime_indexes.add_named_index(index as u64, runtime_name)?;
      data.runtimes.push(snap);
    }

    // The runtimes' isolates are consumed by blob emission.
    self.runtimes.clear();
    self.runtime_order.clear();
    Ok(data)
  }

  /// Disposes the whole app. Calling it twice is a no-op.
  pub fn dispose_app(&mut self) {
    if self.state == AppState::Disposed {
      return;
    }
    let names = self.runtime_order.clone();
    for name in names {
      if let Err(e) = self.dispose_runtime(&name) {
        error!("Failed to dispose runtime {name:?}: {e}");
      }
    }
    self.runtimes.clear();
    self.runtime_order.clear();
    self.code_cache = None;
    self.asset_roots = None;
    self.state = AppState::Disposed;
  }
}

impl Drop for JsApp {
  fn drop(&mut self) {
    self.dispose_app();
  }
}
