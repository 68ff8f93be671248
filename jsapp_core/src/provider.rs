//! Broker interfaces injected into the app, with their default
//! implementations.

use crate::context::{ContextCreationSpec, JsContextRc};
use crate::prelude::*;
use crate::runtime::{JsRuntime, JsRuntimeOptions};
use crate::snapshot::data::RuntimeSnapData;

/// The role a runtime is created in.
pub enum RuntimeRole {
  Normal,
  Snapshotter,
  Restored(RuntimeSnapData),
}

/// Creates and disposes runtimes.
pub trait RuntimeProvider {
  fn create_runtime(
    &self,
    options: JsRuntimeOptions,
    role: RuntimeRole,
  ) -> TheResult<JsRuntime>;

  fn dispose_runtime(&self, runtime: &mut JsRuntime);
}

/// The default runtime provider backed by the VM.
#[derive(Default)]
pub struct V8RuntimeProvider;

impl RuntimeProvider for V8RuntimeProvider {
  fn create_runtime(
    &self,
    options: JsRuntimeOptions,
    role: RuntimeRole,
  ) -> TheResult<JsRuntime> {
    match role {
      RuntimeRole::Normal => JsRuntime::new(options),
      RuntimeRole::Snapshotter => JsRuntime::new_snapshotter(options),
      RuntimeRole::Restored(snap_data) => {
        JsRuntime::new_restored(options, snap_data)
      }
    }
  }

  fn dispose_runtime(&self, runtime: &mut JsRuntime) {
    runtime.dispose_runtime();
  }
}

/// Creates and disposes contexts.
pub trait ContextProvider {
  /// Validates the namespace, creates a fresh VM context or restores one
  /// from the start-up blob, installs the back-pointer and runs the
  /// namespace setup; unless suppressed, the entry point runs last.
  fn create_context(
    &self,
    runtime: &mut JsRuntime,
    spec: ContextCreationSpec,
  ) -> TheResult<JsContextRc>;

  fn dispose_context(
    &self,
    runtime: &mut JsRuntime,
    name: &str,
  ) -> TheResult<()>;
}

/// The default context provider backed by the VM.
#[derive(Default)]
pub struct V8ContextProvider;

impl ContextProvider for V8ContextProvider {
  fn create_context(
    &self,
    runtime: &mut JsRuntime,
    spec: ContextCreationSpec,
  ) -> TheResult<JsContextRc> {
    runtime.create_context_with_spec(spec)
  }

  fn dispose_context(
    &self,
    runtime: &mut JsRuntime,
    name: &str,
  ) -> TheResult<()> {
    runtime.dispose_context(name)
  }
}
