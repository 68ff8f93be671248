//! Process-wide registry of native callback descriptors.
//!
//! The registry follows a `lazy_init -> initialized -> reset -> lazy_init`
//! cycle so test harnesses can tear it down between cases. Steady-state
//! execution only reads it; registration happens at startup before any
//! runtime exists.

use crate::bridge::dispatch::{dispatch_callback, CallbackDescriptor};
use crate::bridge::native_object::TypeInfo;
use crate::prelude::*;

use parking_lot::RwLock;
use std::sync::Arc;

/// The sentinel namespace whose setup functions run for every context.
pub const GLOBAL_NAMESPACE: &str = "global";

/// A function that installs bindings on a freshly created context's global
/// object.
pub type NamespaceSetupFn = fn(
  scope: &mut v8::HandleScope,
  context: v8::Local<v8::Context>,
  global: v8::Local<v8::Object>,
) -> TheResult<()>;

#[derive(Default)]
struct RegistryState {
  descriptors: HashMap<u64, Arc<CallbackDescriptor>>,
  references: Vec<usize>,
  namespace_setup: HashMap<String, Vec<NamespaceSetupFn>>,
  object_infos: HashMap<String, &'static TypeInfo>,
}

static REGISTRY: RwLock<Option<RegistryState>> = RwLock::new(None);

fn with_registry<R>(f: impl FnOnce(&mut RegistryState) -> R) -> R {
  let mut guard = REGISTRY.write();
  let state = guard.get_or_insert_with(RegistryState::default);
  f(state)
}

/// Stores a callback descriptor under its address. A duplicate registration
/// of the same address is a no-op. The dispatch thunk's address is appended
/// to the external-references vector exactly once.
pub fn register(descriptor: CallbackDescriptor) {
  with_registry(|state| {
    let thunk = dispatch_callback as usize;
    if !state.references.contains(&thunk) {
      state.references.push(thunk);
    }
    state
      .descriptors
      .entry(descriptor.address)
      .or_insert_with(|| Arc::new(descriptor));
  });
}

/// Looks up a callback descriptor by the address stored in the function's
/// data.
pub fn lookup_by_address(address: u64) -> Option<Arc<CallbackDescriptor>> {
  let guard = REGISTRY.read();
  guard.as_ref()?.descriptors.get(&address).cloned()
}

/// The external-references vector, terminated by the zero sentinel.
pub fn external_references() -> Vec<usize> {
  let guard = REGISTRY.read();
  let mut refs = guard
    .as_ref()
    .map(|state| state.references.clone())
    .unwrap_or_default();
  refs.push(0);
  refs
}

/// The external references in the shape the isolate wants. The value is
/// leaked so it outlives any isolate built from it.
pub fn v8_external_references() -> &'static v8::ExternalReferences {
  use v8::MapFnTo;

  let refs = [v8::ExternalReference {
    function: dispatch_callback.map_fn_to(),
  }];
  Box::leak(Box::new(v8::ExternalReferences::new(&refs)))
}

/// Registers a namespace setup function. Without an explicit namespace list
/// the function lands in the global sentinel namespace.
pub fn register_namespace_setup(
  setup: NamespaceSetupFn,
  namespaces: Option<&[&str]>,
) {
  let namespaces = namespaces.unwrap_or(&[GLOBAL_NAMESPACE]);
  with_registry(|state| {
    for namespace in namespaces {
      state
        .namespace_setup
        .entry((*namespace).to_string())
        .or_default()
        .push(setup);
    }
  });
}

/// Whether any setup function was registered for the namespace.
pub fn has_namespace(namespace: &str) -> bool {
  let guard = REGISTRY.read();
  guard
    .as_ref()
    .map(|state| state.namespace_setup.contains_key(namespace))
    .unwrap_or(false)
}

/// Runs the global setup functions, then the named namespace's, in
/// registration order against the context's global object.
pub fn run_namespace_setup(
  scope: &mut v8::HandleScope,
  context: v8::Local<v8::Context>,
  namespace: &str,
) -> TheResult<()> {
  let mut setups: Vec<NamespaceSetupFn> = Vec::new();
  {
    let guard = REGISTRY.read();
    if let Some(state) = guard.as_ref() {
      if let Some(fns) = state.namespace_setup.get(GLOBAL_NAMESPACE) {
        setups.extend(fns.iter().copied());
      }
      if namespace != GLOBAL_NAMESPACE {
        if let Some(fns) = state.namespace_setup.get(namespace) {
          setups.extend(fns.iter().copied());
        }
      }
    }
  }

  let global = context.global(scope);
  for setup in setups {
    setup(scope, context, global)?;
  }
  Ok(())
}

/// Registers a native type descriptor for snapshot-time lookup.
///
/// Re-registering the same type name with a different descriptor address is
/// fatal.
pub fn register_object_info(info: &'static TypeInfo) {
  with_registry(|state| {
    match state.object_infos.get(info.type_name) {
      Some(existing) if !std::ptr::eq(*existing, info) => {
        panic!(
          "conflicting TypeInfo registration for {:?}",
          info.type_name
        );
      }
      Some(_) => {}
      None => {
        state.object_infos.insert(info.type_name.to_string(), info);
      }
    }
  });
}

/// Finds a native type descriptor by its type name.
pub fn lookup_object_info_by_type_name(
  type_name: &str,
) -> Option<&'static TypeInfo> {
  let guard = REGISTRY.read();
  guard.as_ref()?.object_infos.get(type_name).copied()
}

/// Drops the whole registry. The next access lazily re-initializes it.
pub fn reset() {
  let mut guard = REGISTRY.write();
  *guard = None;
}
