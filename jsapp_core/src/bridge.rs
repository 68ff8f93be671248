//! The native-to-JS bridge: callback registry, dispatch, converters,
//! template builder and managed native objects.

use crate::prelude::*;

pub use convert::{FromV8, ToV8};
pub use dispatch::{
  dispatch_callback, function_for, function_template_for, CallbackDescriptor,
};
pub use native_object::{
  attach_object, new_object, unwrap_object, NativeClass, NativeObjectHandle,
  SnapshotHandleCloser, TypeInfo, WrapperState,
};
pub use template_builder::ObjectTemplateBuilder;

pub mod convert;
pub mod dispatch;
pub mod native_object;
pub mod registry;
pub mod template_builder;

#[cfg(test)]
mod registry_tests;
#[cfg(test)]
mod template_builder_tests;

/// Adds a property with the given name and value, into the given object.
pub fn set_property_to(
  scope: &mut v8::HandleScope,
  target: v8::Local<v8::Object>,
  name: &str,
  value: v8::Local<v8::Value>,
) {
  let key = v8::String::new(scope, name).unwrap();
  target.set(scope, key.into(), value);
}

/// Adds a read-only property with the given name and value, into the given
/// object.
pub fn set_constant_to(
  scope: &mut v8::HandleScope,
  target: v8::Local<v8::Object>,
  name: &str,
  value: v8::Local<v8::Value>,
) {
  let key = v8::String::new(scope, name).unwrap();
  target.define_own_property(
    scope,
    key.into(),
    value,
    v8::PropertyAttribute::READ_ONLY,
  );
}

/// Adds a `Function` object which dispatches to the registered callable at
/// `address`, into the given object.
pub fn set_function_to(
  scope: &mut v8::HandleScope,
  target: v8::Local<v8::Object>,
  name: &str,
  address: u64,
) {
  let key = v8::String::new(scope, name).unwrap();
  if let Some(function) = function_for(scope, address) {
    target.set(scope, key.into(), function.into());
  }
}

/// Creates an object with a given name under a `target` object.
pub fn create_object_under<'s>(
  scope: &mut v8::HandleScope<'s>,
  target: v8::Local<v8::Object>,
  name: &str,
) -> v8::Local<'s, v8::Object> {
  let template = v8::ObjectTemplate::new(scope);
  let key = v8::String::new(scope, name).unwrap();
  let value = template.new_instance(scope).unwrap();

  target.set(scope, key.into(), value.into());
  value
}

/// Useful utility to throw v8 exceptions.
pub fn throw_error(scope: &mut v8::HandleScope, error: &TheErr) {
  let message = v8::String::new(scope, &error.to_string()).unwrap();
  let exception = match error {
    TheErr::TypeMismatch(_) => v8::Exception::type_error(scope, message),
    TheErr::ModuleResolution(_) => v8::Exception::syntax_error(scope, message),
    _ => v8::Exception::error(scope, message),
  };
  scope.throw_exception(exception);
}

/// Useful utility to throw v8 type errors.
pub fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
  let message = v8::String::new(scope, message).unwrap();
  let exception = v8::Exception::type_error(scope, message);
  scope.throw_exception(exception);
}

/// Useful utility to throw v8 range errors.
pub fn throw_range_error(scope: &mut v8::HandleScope, message: &str) {
  let message = v8::String::new(scope, message).unwrap();
  let exception = v8::Exception::range_error(scope, message);
  scope.throw_exception(exception);
}

/// Useful utility to throw v8 syntax errors.
pub fn throw_syntax_error(scope: &mut v8::HandleScope, message: &str) {
  let message = v8::String::new(scope, message).unwrap();
  let exception = v8::Exception::syntax_error(scope, message);
  scope.throw_exception(exception);
}
