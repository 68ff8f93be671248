//! ECMAScript and JSON modules.
//!
//! Each context owns a [`ModuleMap`] keyed by `(absolute path, type)`.
//! Static imports are fetched recursively and synchronously off the local
//! filesystem; dynamic imports run as posted tasks owning their promise
//! resolver.

use crate::context::JsContextRc;
use crate::jserror::JsError;
use crate::prelude::*;

pub mod hooks;
pub mod resolve;

#[cfg(test)]
mod modules_tests;

/// Module type selected by import attributes (or file extension for entry
/// points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleType {
  Invalid,
  Javascript,
  Json,
  Native,
}

impl ModuleType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ModuleType::Invalid => "invalid",
      ModuleType::Javascript => "js",
      ModuleType::Json => "json",
      ModuleType::Native => "native",
    }
  }

  pub fn from_str(value: &str) -> ModuleType {
    match value {
      "js" => ModuleType::Javascript,
      "json" => ModuleType::Json,
      "native" => ModuleType::Native,
      _ => ModuleType::Invalid,
    }
  }
}

/// Import attributes recognized on a request:
/// `{ type: "js"|"json"|"native", module: "<name>" }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributesInfo {
  pub mtype: ModuleType,
  pub type_string: String,
  pub module: String,
}

impl Default for AttributesInfo {
  fn default() -> Self {
    AttributesInfo {
      mtype: ModuleType::Javascript,
      type_string: "js".to_string(),
      module: String::new(),
    }
  }
}

impl AttributesInfo {
  pub fn extension_matches(&self, extension: &str) -> bool {
    match self.mtype {
      ModuleType::Json => extension == ".json",
      ModuleType::Javascript => extension == ".js" || extension == ".mjs",
      _ => false,
    }
  }
}

/// One loaded module.
pub struct ModuleInfo {
  path: PathBuf,
  name: String,
  version: Option<String>,
  attributes: AttributesInfo,
  module: Option<v8::Global<v8::Module>>,
  json: Option<v8::Global<v8::Value>>,
  unbound_script: Option<v8::Global<v8::UnboundModuleScript>>,
}

rc_refcell_ptr!(ModuleInfo);

impl ModuleInfo {
  pub fn new(
    path: PathBuf,
    name: String,
    version: Option<String>,
    attributes: AttributesInfo,
  ) -> ModuleInfo {
    ModuleInfo {
      path,
      name,
      version,
      attributes,
      module: None,
      json: None,
      unbound_script: None,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn version(&self) -> Option<&str> {
    self.version.as_deref()
  }

  pub fn attributes(&self) -> &AttributesInfo {
    &self.attributes
  }

  pub fn module_type(&self) -> ModuleType {
    self.attributes.mtype
  }

  pub fn v8_module(&self) -> Option<&v8::Global<v8::Module>> {
    self.module.as_ref()
  }

  pub fn set_v8_module(&mut self, module: v8::Global<v8::Module>) {
    self.module = Some(module);
  }

  pub fn json(&self) -> Option<&v8::Global<v8::Value>> {
    self.json.as_ref()
  }

  pub fn set_json(&mut self, value: v8::Global<v8::Value>) {
    self.json = Some(value);
  }

  pub fn unbound_script(&self) -> Option<&v8::Global<v8::UnboundModuleScript>> {
    self.unbound_script.as_ref()
  }

  pub fn set_unbound_script(
    &mut self,
    script: v8::Global<v8::UnboundModuleScript>,
  ) {
    self.unbound_script = Some(script);
  }

  pub fn clear_unbound_script(&mut self) {
    self.unbound_script = None;
  }
}

impl std::fmt::Debug for ModuleInfo {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModuleInfo")
      .field("path", &self.path)
      .field("name", &self.name)
      .field("version", &self.version)
      .field("attributes", &self.attributes)
      .field("module", &self.module.is_some())
      .field("json", &self.json.is_some())
      .finish()
  }
}

/// The per-context module map. Two modules with the same path but
/// different types may coexist.
#[derive(Default)]
pub struct ModuleMap {
  map: HashMap<(String, ModuleType), ModuleInfoRc>,
}

impl ModuleMap {
  pub fn new() -> ModuleMap {
    ModuleMap {
      map: HashMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.map.len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }

  pub fn insert(&mut self, info: ModuleInfoRc) -> TheResult<()> {
    let key = {
      let borrowed = info.borrow();
      (
        borrowed.path.to_string_lossy().to_string(),
        borrowed.attributes.mtype,
      )
    };
    if self.map.contains_key(&key) {
      return Err(TheErr::AlreadyExists(format!("module {:?}", key.0)));
    }
    self.map.insert(key, info);
    Ok(())
  }

  /// Finds a module by its absolute path, any type.
  pub fn get_by_specifier(&self, path: &str) -> Option<ModuleInfoRc> {
    self
      .map
      .iter()
      .find(|((p, _), _)| p == path)
      .map(|(_, info)| info.clone())
  }

  pub fn get_by_specifier_and_type(
    &self,
    path: &str,
    mtype: ModuleType,
  ) -> Option<ModuleInfoRc> {
    self.map.get(&(path.to_string(), mtype)).cloned()
  }

  /// Finds the module info holding the given v8 module.
  pub fn get_info_by_module(
    &self,
    module: &v8::Global<v8::Module>,
    mtype: Option<ModuleType>,
  ) -> Option<ModuleInfoRc> {
    self
      .map
      .values()
      .find(|info| {
        let borrowed = info.borrow();
        if let Some(expected) = mtype {
          if borrowed.attributes.mtype != expected {
            return false;
          }
        }
        borrowed.module.as_ref() == Some(module)
      })
      .cloned()
  }

  /// The parsed JSON value backing a synthetic module.
  pub fn get_json_by_module(
    &self,
    module: &v8::Global<v8::Module>,
  ) -> Option<v8::Global<v8::Value>> {
    let info = self.get_info_by_module(module, Some(ModuleType::Json))?;
    let json = info.borrow().json.clone();
    json
  }

  pub fn iter(&self) -> impl Iterator<Item = &ModuleInfoRc> {
    self.map.values()
  }

  /// Resets all the maps.
  pub fn reset(&mut self) {
    self.map.clear();
  }
}

/// Create v8 script origin.
pub fn create_origin<'s>(
  scope: &mut v8::HandleScope<'s, ()>,
  name: &str,
  is_module: bool,
) -> v8::ScriptOrigin<'s> {
  let name = v8::String::new(scope, name).unwrap();
  let source_map = v8::undefined(scope);

  v8::ScriptOrigin::new(
    scope,
    name.into(),
    0,
    0,
    false,
    0,
    Some(source_map.into()),
    false,
    false,
    is_module,
    None,
  )
}

/// Parses import attributes into an [`AttributesInfo`].
///
/// Entries come as `(key, value)` pairs, or `(key, value, offset)` triples
/// when the array carries source positions. Unknown keys are warned and
/// ignored; an unsupported `type` value invalidates the import.
pub fn parse_import_attributes(
  scope: &mut v8::HandleScope,
  attributes: v8::Local<v8::FixedArray>,
  has_positions: bool,
) -> AttributesInfo {
  let stride = if has_positions { 3 } else { 2 };
  let mut info = AttributesInfo::default();

  let mut i = 0;
  while i < attributes.length() {
    let key = attributes
      .get(scope, i)
      .and_then(|data| v8::Local::<v8::Value>::try_from(data).ok())
      .map(|value| value.to_rust_string_lossy(scope))
      .unwrap_or_default();
    if key.is_empty() {
      i += stride;
      continue;
    }

    let value = attributes
      .get(scope, i + 1)
      .and_then(|data| v8::Local::<v8::Value>::try_from(data).ok())
      .map(|value| value.to_rust_string_lossy(scope))
      .unwrap_or_default();

    match key.as_str() {
      "type" => {
        info.type_string = value.clone();
        info.mtype = ModuleType::from_str(&value);
        if info.mtype == ModuleType::Invalid {
          warn!("Unknown type attribute: {value:?}");
          info.type_string = String::new();
        }
      }
      "module" => {
        info.module = value;
      }
      _ => {
        warn!("Unknown import attribute: {key:?}");
      }
    }
    i += stride;
  }

  info
}

/// Loads a module rooted under the app, reusing the context's module map.
/// The attribute type is inferred from the file extension.
pub fn load_module(
  scope: &mut v8::HandleScope,
  ctx: &JsContextRc,
  module_path: &Path,
) -> TheResult<ModuleInfoRc> {
  let (roots, raw_path) = {
    let borrowed = ctx.borrow();
    (borrowed.asset_roots().clone(), module_path.to_path_buf())
  };

  let attributes = resolve::attributes_for_path(&raw_path);
  let resolved = resolve::build_module_info(
    &roots,
    &attributes,
    &raw_path,
    roots.app_root(),
  )?;

  let cached = ctx
    .borrow()
    .module_map()
    .get_by_specifier(&resolved.path.to_string_lossy());
  if let Some(cached) = cached {
    return Ok(cached);
  }

  let info = ModuleInfo::to_rc(ModuleInfo::new(
    resolved.path,
    resolved.name,
    resolved.version,
    attributes,
  ));
  load_module_tree(scope, ctx, &info)?;
  Ok(info)
}

/// Compiles or synthesizes one module and recurses into its requests. A
/// request already present in the map short-circuits, which also cuts
/// cycles.
pub fn load_module_tree(
  scope: &mut v8::HandleScope,
  ctx: &JsContextRc,
  info: &ModuleInfoRc,
) -> TheResult<()> {
  let (mtype, import_path) = {
    let borrowed = info.borrow();
    (borrowed.attributes.mtype, borrowed.path.clone())
  };

  let module: v8::Local<v8::Module> = match mtype {
    ModuleType::Javascript => compile_js_module(scope, ctx, info, &import_path)?,
    ModuleType::Json => synthesize_json_module(scope, ctx, info, &import_path)?,
    other => {
      return Err(TheErr::ModuleResolution(format!(
        "unsupported module type {other:?} for {import_path:?}"
      )));
    }
  };

  ctx.borrow_mut().module_map_mut().insert(info.clone())?;

  let requests = module.get_module_requests();
  trace!(
    "Loaded module {:?} with {} requests",
    import_path,
    requests.length()
  );

  for i in 0..requests.length() {
    let request = requests.get(scope, i).ok_or_else(|| {
      TheErr::ModuleResolution(format!(
        "module request {i} out of bounds for {import_path:?}"
      ))
    })?;
    let request = v8::Local::<v8::ModuleRequest>::try_from(request)
      .map_err(|e| TheErr::ModuleResolution(e.to_string()))?;

    let specifier = request.get_specifier().to_rust_string_lossy(scope);
    let attributes =
      parse_import_attributes(scope, request.get_import_attributes(), true);
    if attributes.mtype == ModuleType::Invalid {
      return Err(TheErr::ModuleResolution(format!(
        "import {specifier:?} in {import_path:?} has an invalid type attribute"
      )));
    }

    let (roots, referrer_dir) = {
      let borrowed = ctx.borrow();
      (
        borrowed.asset_roots().clone(),
        import_path
          .parent()
          .map(|p| p.to_path_buf())
          .unwrap_or_else(|| borrowed.asset_roots().app_root().to_path_buf()),
      )
    };
    let resolved = resolve::build_module_info(
      &roots,
      &attributes,
      Path::new(&specifier),
      &referrer_dir,
    )?;

    let cached = ctx
      .borrow()
      .module_map()
      .get_by_specifier(&resolved.path.to_string_lossy());
    if cached.is_some() {
      continue;
    }

    let child = ModuleInfo::to_rc(ModuleInfo::new(
      resolved.path,
      resolved.name,
      resolved.version,
      attributes,
    ));
    load_module_tree(scope, ctx, &child)?;
  }

  Ok(())
}

fn compile_js_module<'s>(
  scope: &mut v8::HandleScope<'s>,
  ctx: &JsContextRc,
  info: &ModuleInfoRc,
  import_path: &Path,
) -> TheResult<v8::Local<'s, v8::Module>> {
  let code_cache = ctx.borrow().code_cache().clone();
  let script_source = code_cache.load_script_source(import_path)?;
  let consume_hint = script_source.cached_data.clone();

  let origin = create_origin(scope, &import_path.to_string_lossy(), true);
  let source_string = v8::String::new(scope, &script_source.source)
    .ok_or_else(|| {
      TheErr::Compile(format!("source for {import_path:?} is too large"))
    })?;

  let tc_scope = &mut v8::TryCatch::new(scope);
  let (maybe_module, consumed_cache) = match consume_hint.as_deref() {
    Some(bytes) => {
      let mut source = v8::script_compiler::Source::new_with_cached_data(
        source_string,
        Some(&origin),
        v8::CachedData::new(bytes),
      );
      let module = v8::script_compiler::compile_module2(
        tc_scope,
        &mut source,
        v8::script_compiler::CompileOptions::ConsumeCodeCache,
        v8::script_compiler::NoCacheReason::NoReason,
      );
      let rejected = source
        .get_cached_data()
        .map(|data| data.rejected())
        .unwrap_or(true);
      code_cache.note_cache_consume(import_path, rejected);
      (module, true)
    }
    None => {
      let mut source =
        v8::script_compiler::Source::new(source_string, Some(&origin));
      let module = v8::script_compiler::compile_module(tc_scope, &mut source);
      (module, false)
    }
  };

  let module = match maybe_module {
    Some(module) => module,
    None => {
      let error = JsError::from_try_catch(tc_scope)
        .map(|e| e.into_compile_err())
        .unwrap_or_else(|| {
          TheErr::Compile(format!("failed to compile {import_path:?}"))
        });
      return Err(error);
    }
  };

  let module_global = v8::Global::new(tc_scope, module);
  info.borrow_mut().set_v8_module(module_global);

  // Harvest cache bytes from fresh compiles.
  if !consumed_cache {
    let unbound = module.get_unbound_module_script(tc_scope);
    info
      .borrow_mut()
      .set_unbound_script(v8::Global::new(tc_scope, unbound));
    if let Some(bytes) = unbound.create_code_cache() {
      if let Err(e) = code_cache.set_code_cache(import_path, &bytes) {
        error!("Failed to store code cache for {import_path:?}: {e}");
      }
    }
  }

  Ok(module)
}

fn synthesize_json_module<'s>(
  scope: &mut v8::HandleScope<'s>,
  ctx: &JsContextRc,
  info: &ModuleInfoRc,
  import_path: &Path,
) -> TheResult<v8::Local<'s, v8::Module>> {
  let _ = ctx;
  let text = std::fs::read_to_string(import_path).map_err(|e| {
    TheErr::NotFound(format!("failed to read {import_path:?}: {e}"))
  })?;

  let tc_scope = &mut v8::TryCatch::new(scope);
  let json_string = v8::String::new(tc_scope, &text).ok_or_else(|| {
    TheErr::Compile(format!("json for {import_path:?} is too large"))
  })?;

  let parsed = match v8::json::parse(tc_scope, json_string) {
    Some(parsed) => parsed,
    None => {
      let error = JsError::from_try_catch(tc_scope)
        .map(|e| e.into_compile_err())
        .unwrap_or_else(|| {
          TheErr::Compile(format!("failed to parse {import_path:?}"))
        });
      return Err(error);
    }
  };

  let name = v8::String::new(tc_scope, &import_path.to_string_lossy())
    .unwrap();
  let default_key = v8::String::new(tc_scope, "default").unwrap();
  let module = v8::Module::create_synthetic_module(
    tc_scope,
    name,
    &[default_key],
    hooks::json_module_evaluation_steps,
  );

  let mut borrowed = info.borrow_mut();
  borrowed.set_v8_module(v8::Global::new(tc_scope, module));
  borrowed.set_json(v8::Global::new(tc_scope, parsed));
  Ok(module)
}

/// Links a loaded module. Resolution of nested requests happens through
/// [`hooks::resolve_module_callback`].
pub fn instantiate_module(
  scope: &mut v8::HandleScope,
  info: &ModuleInfoRc,
) -> TheResult<()> {
  let module = {
    let borrowed = info.borrow();
    borrowed.v8_module().cloned().ok_or_else(|| {
      TheErr::InvalidState(format!(
        "module {:?} has no compiled module",
        borrowed.path()
      ))
    })?
  };
  let module = v8::Local::new(scope, module);

  let tc_scope = &mut v8::TryCatch::new(scope);
  if module
    .instantiate_module(tc_scope, hooks::resolve_module_callback)
    .is_none()
  {
    let error = JsError::from_try_catch(tc_scope)
      .map(|e| e.into_link_err())
      .unwrap_or_else(|| {
        TheErr::Link(format!(
          "failed to instantiate module {:?}",
          info.borrow().path()
        ))
      });
    return Err(error);
  }
  Ok(())
}

/// Evaluates a loaded module and returns its namespace.
pub fn run_module(
  scope: &mut v8::HandleScope,
  info: &ModuleInfoRc,
) -> TheResult<v8::Global<v8::Value>> {
  let module = {
    let borrowed = info.borrow();
    borrowed.v8_module().cloned().ok_or_else(|| {
      TheErr::InvalidState(format!(
        "module {:?} has no compiled module",
        borrowed.path()
      ))
    })?
  };
  let module = v8::Local::new(scope, module);

  let tc_scope = &mut v8::TryCatch::new(scope);
  let _ = module.evaluate(tc_scope);

  if module.get_status() == v8::ModuleStatus::Errored {
    let exception = module.get_exception();
    let error = JsError::from_v8_exception(tc_scope, exception);
    return Err(error.into_eval_err());
  }
  if tc_scope.has_caught() {
    let error = JsError::from_try_catch(tc_scope)
      .map(|e| e.into_eval_err())
      .unwrap_or_else(|| {
        TheErr::Eval(format!("failed to evaluate {:?}", info.borrow().path()))
      });
    return Err(error);
  }

  tc_scope.perform_microtask_checkpoint();

  let namespace = module.get_module_namespace();
  Ok(v8::Global::new(tc_scope, namespace))
}
