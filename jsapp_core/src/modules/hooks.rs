//! V8 module hooks: static resolution, dynamic import, import.meta and
//! JSON synthetic module evaluation.

use crate::context::JsContextRc;
use crate::jserror::JsError;
use crate::modules::{
  self, parse_import_attributes, resolve, ModuleInfo, ModuleInfoRc, ModuleType,
};
use crate::platform::JsTask;
use crate::prelude::*;
use crate::runtime::JsRuntimeState;

/// Called during `Module::instantiate_module` to resolve one request of the
/// referrer to an already loaded module.
pub fn resolve_module_callback<'a>(
  context: v8::Local<'a, v8::Context>,
  specifier: v8::Local<'a, v8::String>,
  import_attributes: v8::Local<'a, v8::FixedArray>,
  referrer: v8::Local<'a, v8::Module>,
) -> Option<v8::Local<'a, v8::Module>> {
  let scope = &mut unsafe { v8::CallbackScope::new(context) };

  let state_rc = JsRuntimeState::from_isolate(scope);
  let context_global = v8::Global::new(scope, context);
  let ctx = state_rc.borrow().find_context_by_v8(&context_global)?;

  let specifier = specifier.to_rust_string_lossy(scope);
  let attributes = parse_import_attributes(scope, import_attributes, false);
  if attributes.mtype == ModuleType::Invalid {
    return None;
  }

  let referrer_global = v8::Global::new(scope, referrer);
  let (roots, referrer_dir) = {
    let borrowed = ctx.borrow();
    let referrer_info = borrowed
      .module_map()
      .get_info_by_module(&referrer_global, None);
    let dir = referrer_info
      .and_then(|info| info.borrow().path().parent().map(|p| p.to_path_buf()))
      .unwrap_or_else(|| borrowed.asset_roots().app_root().to_path_buf());
    (borrowed.asset_roots().clone(), dir)
  };

  let resolved = match resolve::build_module_info(
    &roots,
    &attributes,
    Path::new(&specifier),
    &referrer_dir,
  ) {
    Ok(resolved) => resolved,
    Err(e) => {
      trace!("|resolve_module_callback| failed to resolve {specifier:?}: {e}");
      return None;
    }
  };

  let path = resolved.path.to_string_lossy().to_string();
  let info = {
    let borrowed = ctx.borrow();
    borrowed
      .module_map()
      .get_by_specifier_and_type(&path, attributes.mtype)
      .or_else(|| borrowed.module_map().get_by_specifier(&path))
  }?;

  let module = info.borrow().v8_module().cloned()?;
  Some(v8::Local::new(scope, module))
}

/// Called the first time `import.meta` is accessed for a module.
pub extern "C" fn host_initialize_import_meta_object_cb(
  context: v8::Local<v8::Context>,
  module: v8::Local<v8::Module>,
  meta: v8::Local<v8::Object>,
) {
  let scope = &mut unsafe { v8::CallbackScope::new(context) };
  let scope = &mut v8::HandleScope::new(scope);

  let state_rc = JsRuntimeState::from_isolate(scope);
  let context_global = v8::Global::new(scope, context);
  let Some(ctx) = state_rc.borrow().find_context_by_v8(&context_global) else {
    return;
  };

  let module_global = v8::Global::new(scope, module);
  let url = {
    let borrowed = ctx.borrow();
    borrowed
      .module_map()
      .get_info_by_module(&module_global, None)
      .map(|info| info.borrow().path().to_string_lossy().to_string())
  };
  let Some(url) = url else {
    return;
  };

  // Setup import.meta.url property.
  let key = v8::String::new(scope, "url").unwrap();
  let value = v8::String::new(scope, &url).unwrap();
  meta.create_data_property(scope, key.into(), value.into());

  // Setup import.meta.resolve() method.
  let url = v8::String::new(scope, &url).unwrap();
  let builder = v8::FunctionBuilder::new(import_meta_resolve).data(url.into());
  let key = v8::String::new(scope, "resolve").unwrap();
  if let Some(value) = v8::FunctionBuilder::<v8::Function>::build(builder, scope)
  {
    meta.set(scope, key.into(), value.into());
  }
}

fn import_meta_resolve(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  if args.length() == 0 {
    crate::bridge::throw_type_error(scope, "Not enough arguments specified.");
    return;
  }

  let state_rc = JsRuntimeState::from_isolate(scope);
  let context = scope.get_current_context();
  let context_global = v8::Global::new(scope, context);
  let Some(ctx) = state_rc.borrow().find_context_by_v8(&context_global) else {
    crate::bridge::throw_type_error(scope, "Unknown context");
    return;
  };

  let base = args.data().to_rust_string_lossy(scope);
  let base_dir = Path::new(&base)
    .parent()
    .map(|p| p.to_path_buf())
    .unwrap_or_else(|| PathBuf::from(&base));
  let specifier = args.get(0).to_rust_string_lossy(scope);

  let roots = ctx.borrow().asset_roots().clone();
  let attributes = modules::AttributesInfo::default();
  match resolve::build_module_info(
    &roots,
    &attributes,
    Path::new(&specifier),
    &base_dir,
  ) {
    Ok(resolved) => {
      let path = resolved.path.to_string_lossy().to_string();
      rv.set(v8::String::new(scope, &path).unwrap().into());
    }
    Err(e) => crate::bridge::throw_error(scope, &e),
  }
}

/// Synthetic module evaluation steps resolving the JSON default export.
pub fn json_module_evaluation_steps<'a>(
  context: v8::Local<'a, v8::Context>,
  module: v8::Local<v8::Module>,
) -> Option<v8::Local<'a, v8::Value>> {
  let scope = &mut unsafe { v8::CallbackScope::new(context) };

  let state_rc = JsRuntimeState::from_isolate(scope);
  let context_global = v8::Global::new(scope, context);
  let ctx = state_rc.borrow().find_context_by_v8(&context_global)?;

  let module_global = v8::Global::new(scope, module);
  let json = ctx.borrow().module_map().get_json_by_module(&module_global);
  let Some(json) = json else {
    error!("Failed to find the json module in the module map");
    return None;
  };

  let default_key = v8::String::new(scope, "default").unwrap();
  let json_local = v8::Local::new(scope, json);
  let set = module.set_synthetic_module_export(scope, default_key, json_local);
  if set != Some(true) {
    error!("Failed to set the default export for the json module");
    return None;
  }

  let resolver = v8::PromiseResolver::new(scope)?;
  let undefined = v8::undefined(scope);
  resolver.resolve(scope, undefined.into());
  Some(resolver.get_promise(scope).into())
}

/// Called when the VM requires the embedder to load a module for a dynamic
/// `import(...)`. The promise is returned immediately; resolution work runs
/// in a posted task that owns the resolver.
pub fn host_import_module_dynamically_cb<'s>(
  scope: &mut v8::HandleScope<'s>,
  _host_defined_options: v8::Local<'s, v8::Data>,
  resource_name: v8::Local<'s, v8::Value>,
  specifier: v8::Local<'s, v8::String>,
  import_attributes: v8::Local<v8::FixedArray>,
) -> Option<v8::Local<'s, v8::Promise>> {
  let resolver = v8::PromiseResolver::new(scope)?;
  let promise = resolver.get_promise(scope);

  if resource_name.is_null_or_undefined() {
    let message = v8::String::new(scope, "Resource name is null").unwrap();
    let exception = v8::Exception::type_error(scope, message);
    resolver.reject(scope, exception);
    return Some(promise);
  }

  let state_rc = JsRuntimeState::from_isolate(scope);
  let context = scope.get_current_context();
  let context_global = v8::Global::new(scope, context);
  let Some(ctx) = state_rc.borrow().find_context_by_v8(&context_global) else {
    let message =
      v8::String::new(scope, "Failed to find the context for the import")
        .unwrap();
    let exception = v8::Exception::type_error(scope, message);
    resolver.reject(scope, exception);
    return Some(promise);
  };

  let attributes = parse_import_attributes(scope, import_attributes, false);
  let specifier = specifier.to_rust_string_lossy(scope);
  if attributes.mtype == ModuleType::Invalid {
    let message = v8::String::new(
      scope,
      &format!(
        "Import {:?} had an invalid type of {:?}",
        specifier, attributes.type_string
      ),
    )
    .unwrap();
    let exception = v8::Exception::type_error(scope, message);
    resolver.reject(scope, exception);
    return Some(promise);
  }

  let base = resource_name.to_rust_string_lossy(scope);
  let base_dir = Path::new(&base)
    .parent()
    .map(|p| p.to_path_buf())
    .unwrap_or_else(|| PathBuf::from(&base));

  let roots = ctx.borrow().asset_roots().clone();
  let resolved = match resolve::build_module_info(
    &roots,
    &attributes,
    Path::new(&specifier),
    &base_dir,
  ) {
    Ok(resolved) => resolved,
    Err(e) => {
      trace!("Failed to resolve import {specifier:?} (base {base:?}): {e:?}");
      let message = v8::String::new(scope, &e.to_string()).unwrap();
      let exception = v8::Exception::error(scope, message);
      resolver.reject(scope, exception);
      return Some(promise);
    }
  };

  let task = DynamicImportTask {
    context: ctx.clone(),
    resolver: v8::Global::new(scope, resolver),
    info: ModuleInfo::to_rc(ModuleInfo::new(
      resolved.path,
      resolved.name,
      resolved.version,
      attributes,
    )),
  };
  state_rc
    .borrow()
    .task_runner()
    .borrow_mut()
    .post_task(Box::new(task));
  trace!("|host_import_module_dynamically_cb| queued {specifier:?}");

  Some(promise)
}

/// Carries one dynamic import from the host callback to its posted
/// resolution task.
struct DynamicImportTask {
  context: JsContextRc,
  resolver: v8::Global<v8::PromiseResolver>,
  info: ModuleInfoRc,
}

/// Data threaded through the chained promise callbacks.
struct ModuleResolutionData {
  resolver: v8::Global<v8::PromiseResolver>,
  namespace: v8::Global<v8::Value>,
}

impl JsTask for DynamicImportTask {
  fn run(&mut self, scope: &mut v8::HandleScope) {
    let local_context = self.context.borrow().local_context(scope);
    let scope = &mut v8::ContextScope::new(scope, local_context);
    let resolver = v8::Local::new(scope, &self.resolver);

    let path = self.info.borrow().path().to_path_buf();
    let mtype = self.info.borrow().module_type();

    // Reuse an already loaded module or fetch the subtree.
    let cached = self
      .context
      .borrow()
      .module_map()
      .get_by_specifier_and_type(&path.to_string_lossy(), mtype);
    let info = match cached {
      Some(info) => info,
      None => {
        match modules::load_module_tree(scope, &self.context, &self.info) {
          Ok(()) => self.info.clone(),
          Err(e) => {
            let message = v8::String::new(scope, &e.to_string()).unwrap();
            let exception = v8::Exception::error(scope, message);
            resolver.reject(scope, exception);
            return;
          }
        }
      }
    };

    if let Err(e) = modules::instantiate_module(scope, &info) {
      let message = v8::String::new(scope, &e.to_string()).unwrap();
      let exception = v8::Exception::error(scope, message);
      resolver.reject(scope, exception);
      return;
    }

    let module = {
      let borrowed = info.borrow();
      v8::Local::new(scope, borrowed.v8_module().unwrap().clone())
    };

    let tc_scope = &mut v8::TryCatch::new(scope);
    let result = module.evaluate(tc_scope);

    if module.get_status() == v8::ModuleStatus::Errored {
      let exception = module.get_exception();
      resolver.reject(tc_scope, exception);
      return;
    }

    let Some(result) = result else {
      let error = JsError::from_try_catch(tc_scope)
        .map(|e| e.to_string())
        .unwrap_or_else(|| "Module evaluation failed".to_string());
      let message = v8::String::new(tc_scope, &error).unwrap();
      let exception = v8::Exception::error(tc_scope, message);
      resolver.reject(tc_scope, exception);
      return;
    };

    tc_scope.perform_microtask_checkpoint();

    let namespace = module.get_module_namespace();

    let Ok(result_promise) = v8::Local::<v8::Promise>::try_from(result) else {
      // Legacy evaluation result, resolve with the namespace directly.
      resolver.resolve(tc_scope, namespace);
      return;
    };

    match result_promise.state() {
      v8::PromiseState::Rejected => {
        let reason = result_promise.result(tc_scope);
        resolver.reject(tc_scope, reason);
      }
      v8::PromiseState::Fulfilled => {
        resolver.resolve(tc_scope, namespace);
      }
      v8::PromiseState::Pending => {
        // Chain the resolver behind the evaluation promise.
        let data = Box::new(ModuleResolutionData {
          resolver: v8::Global::new(tc_scope, resolver),
          namespace: v8::Global::new(tc_scope, namespace),
        });
        let data_ptr = Box::into_raw(data) as *mut std::ffi::c_void;
        let external = v8::External::new(tc_scope, data_ptr);

        let on_fulfilled = v8::FunctionBuilder::<v8::Function>::build(
          v8::FunctionBuilder::new(resolve_promise_callback)
            .data(external.into()),
          tc_scope,
        );
        let on_rejected = v8::FunctionBuilder::<v8::Function>::build(
          v8::FunctionBuilder::new(reject_promise_callback)
            .data(external.into()),
          tc_scope,
        );
        match (on_fulfilled, on_rejected) {
          (Some(on_fulfilled), Some(on_rejected)) => {
            result_promise.then2(tc_scope, on_fulfilled, on_rejected);
          }
          _ => {
            let message = v8::String::new(
              tc_scope,
              "Failed to create the module resolver callback functions",
            )
            .unwrap();
            let exception = v8::Exception::error(tc_scope, message);
            resolver.reject(tc_scope, exception);
          }
        }
      }
    }
  }
}

fn resolve_promise_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _rv: v8::ReturnValue,
) {
  let Ok(external) = v8::Local::<v8::External>::try_from(args.data()) else {
    return;
  };
  let data =
    unsafe { Box::from_raw(external.value() as *mut ModuleResolutionData) };
  let resolver = v8::Local::new(scope, &data.resolver);
  let namespace = v8::Local::new(scope, &data.namespace);
  resolver.resolve(scope, namespace);
}

fn reject_promise_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _rv: v8::ReturnValue,
) {
  let Ok(external) = v8::Local::<v8::External>::try_from(args.data()) else {
    return;
  };
  let data =
    unsafe { Box::from_raw(external.value() as *mut ModuleResolutionData) };
  let resolver = v8::Local::new(scope, &data.resolver);
  let reason = args.get(0);
  resolver.reject(scope, reason);
}
