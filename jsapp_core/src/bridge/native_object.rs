//! Managed native objects with JS proxies.
//!
//! A native instance is held in a [`NativeCell`] shared between the Rust
//! side (strong handle, runtime handle-closer list) and the JS side (a
//! leaked reference stored in the wrapper object's internal field). The JS
//! wrapper carries two internal fields: the class [`TypeInfo`] pointer and
//! the instance cell pointer. A weak finalizer reclaims the JS-side
//! reference and destroys the instance when the wrapper is collected.

use crate::prelude::*;
use crate::runtime::JsRuntimeState;
use crate::snapshot::buffer::{ReadBuffer, WriteBuffer};

use std::any::Any;
use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;

/// Internal field holding the `TypeInfo` pointer.
pub const FIELD_TYPE_INFO: usize = 0;
/// Internal field holding the native instance cell pointer.
pub const FIELD_INSTANCE: usize = 1;
/// Internal fields reserved on every wrapper template.
pub const RESERVED_INTERNAL_FIELDS: usize = 2;

pub type SerializeNativeFn = fn(&mut WriteBuffer, &dyn Any);
pub type DeserializeNativeFn = fn(&mut ReadBuffer) -> TheResult<Box<dyn Any>>;

/// Static descriptor of a native class exposed to JS. Identity is pointer
/// identity of the static.
pub struct TypeInfo {
  pub type_name: &'static str,
  pub serialize: SerializeNativeFn,
  pub deserialize: DeserializeNativeFn,
}

/// A native class that can be wrapped into JS objects.
pub trait NativeClass: Sized + 'static {
  fn type_info() -> &'static TypeInfo;

  /// Builds the object template for the class. Called once per runtime;
  /// the result is cached in the runtime's template map.
  fn build_template<'s>(
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::ObjectTemplate>;
}

/// Wrapper lifecycle. A snapshot close forces `Live -> Closed`; the weak
/// callback drives `Live -> Clearing -> Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperState {
  Live,
  Clearing,
  Destroyed,
  Closed,
}

/// Anything that can drop its rooted JS handle ahead of a snapshot.
pub trait SnapshotHandleCloser {
  fn close_handle_for_snapshot(&mut self);

  /// Destroys the native instance if the weak callback never ran. Used
  /// when the owning runtime is disposed.
  fn dispose(&mut self);

  fn wrapper_state(&self) -> WrapperState;

  fn type_name(&self) -> &'static str;

  /// Serializes the instance payload through its class serializer.
  fn serialize_payload(&self, buffer: &mut WriteBuffer);
}

/// Shared cell backing one wrapped native instance.
pub struct NativeCell<T: NativeClass> {
  instance: Option<T>,
  state: WrapperState,
  weak: Option<v8::Weak<v8::Object>>,
  /// The raw pointer leaked into the wrapper's internal field, reclaimed by
  /// the weak finalizer or by `dispose`.
  js_ref: Option<*const RefCell<NativeCell<T>>>,
}

pub type NativeCellRc<T> = Rc<RefCell<NativeCell<T>>>;

impl<T: NativeClass> NativeCell<T> {
  pub fn state(&self) -> WrapperState {
    self.state
  }

  pub fn instance(&self) -> Option<&T> {
    self.instance.as_ref()
  }

  pub fn instance_mut(&mut self) -> Option<&mut T> {
    self.instance.as_mut()
  }

  /// The wrapper object, while it is still alive.
  pub fn js_object<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> Option<v8::Local<'s, v8::Object>> {
    self.weak.as_ref()?.to_local(scope)
  }

  fn finalize(&mut self) {
    // First pass: detach from the JS heap.
    self.state = WrapperState::Clearing;
    self.weak = None;
    self.js_ref = None;
    // Second pass: destroy the native instance.
    self.instance = None;
    self.state = WrapperState::Destroyed;
  }
}

impl<T: NativeClass> SnapshotHandleCloser for NativeCell<T> {
  fn close_handle_for_snapshot(&mut self) {
    if self.state != WrapperState::Live {
      return;
    }
    // The handle is released; the native instance stays intact so it can
    // be serialized and later rebound by deserialization.
    self.weak = None;
    self.state = WrapperState::Closed;
  }

  fn dispose(&mut self) {
    if let Some(raw) = self.js_ref.take() {
      // Reclaim the reference leaked into the wrapper's internal field.
      unsafe {
        drop(Rc::from_raw(raw));
      }
    }
    self.weak = None;
    self.instance = None;
    self.state = WrapperState::Destroyed;
  }

  fn wrapper_state(&self) -> WrapperState {
    self.state
  }

  fn type_name(&self) -> &'static str {
    T::type_info().type_name
  }

  fn serialize_payload(&self, buffer: &mut WriteBuffer) {
    if let Some(instance) = self.instance.as_ref() {
      (T::type_info().serialize)(buffer, instance as &dyn Any);
    }
  }
}

/// A strong native-side handle to a wrapped instance, returned from
/// [`new_object`].
pub struct NativeObjectHandle<T: NativeClass> {
  cell: NativeCellRc<T>,
}

impl<T: NativeClass> NativeObjectHandle<T> {
  pub fn cell(&self) -> &NativeCellRc<T> {
    &self.cell
  }

  pub fn state(&self) -> WrapperState {
    self.cell.borrow().state()
  }

  pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
    self.cell.borrow().instance().map(f)
  }

  pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    self.cell.borrow_mut().instance_mut().map(f)
  }

  pub fn js_object<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> Option<v8::Local<'s, v8::Object>> {
    self.cell.borrow().js_object(scope)
  }
}

/// Creates a fresh wrapper object for `instance` from the class's cached
/// object template and registers it with the runtime's handle closers.
pub fn new_object<T: NativeClass>(
  scope: &mut v8::HandleScope,
  instance: T,
) -> TheResult<NativeObjectHandle<T>> {
  let template = {
    let state_rc = JsRuntimeState::from_isolate(scope);
    let info_key = T::type_info() as *const TypeInfo as usize;
    let cached = state_rc.borrow().object_templates.get(&info_key).cloned();
    match cached {
      Some(template) => v8::Local::new(scope, template),
      None => {
        let template = T::build_template(scope);
        let global = v8::Global::new(scope, template);
        state_rc
          .borrow_mut()
          .object_templates
          .insert(info_key, global);
        template
      }
    }
  };

  let object = template.new_instance(scope).ok_or_else(|| {
    TheErr::InvalidState(format!(
      "Failed to instantiate wrapper for {}",
      T::type_info().type_name
    ))
  })?;

  let cell = attach_object(scope, object, instance)?;
  Ok(NativeObjectHandle {
    cell,
  })
}

/// Wires a native instance into an existing wrapper object: internal
/// fields, weak finalizer, handle-closer registration.
pub fn attach_object<T: NativeClass>(
  scope: &mut v8::HandleScope,
  object: v8::Local<v8::Object>,
  instance: T,
) -> TheResult<NativeCellRc<T>> {
  if object.internal_field_count() < RESERVED_INTERNAL_FIELDS {
    return Err(TheErr::TypeMismatch(format!(
      "Receiver has no wrapper fields for {}",
      T::type_info().type_name
    )));
  }

  let cell: NativeCellRc<T> = Rc::new(RefCell::new(NativeCell {
    instance: Some(instance),
    state: WrapperState::Live,
    weak: None,
    js_ref: None,
  }));

  let info_ptr = T::type_info() as *const TypeInfo as *mut c_void;
  let info_ext = v8::External::new(scope, info_ptr);
  object.set_internal_field(FIELD_TYPE_INFO, info_ext.into());

  let js_ref = Rc::into_raw(cell.clone());
  let cell_ext = v8::External::new(scope, js_ref as *mut c_void);
  object.set_internal_field(FIELD_INSTANCE, cell_ext.into());
  cell.borrow_mut().js_ref = Some(js_ref);

  let weak = v8::Weak::with_finalizer(
    scope,
    object,
    Box::new(move |_isolate| {
      let cell = unsafe { Rc::from_raw(js_ref) };
      cell.borrow_mut().finalize();
    }),
  );
  cell.borrow_mut().weak = Some(weak);

  let state_rc = JsRuntimeState::from_isolate(scope);
  state_rc
    .borrow_mut()
    .register_snapshot_handle_closer(&(cell.clone() as Rc<RefCell<dyn SnapshotHandleCloser>>));

  Ok(cell)
}

/// Extracts the native cell from a JS value, validating the wrapper fields
/// against the expected class.
pub fn unwrap_object<T: NativeClass>(
  scope: &mut v8::HandleScope,
  value: v8::Local<v8::Value>,
) -> Option<NativeCellRc<T>> {
  if !value.is_object() {
    return None;
  }
  let object = v8::Local::<v8::Object>::try_from(value).ok()?;
  if object.internal_field_count() < RESERVED_INTERNAL_FIELDS {
    return None;
  }

  let info_field = object.get_internal_field(scope, FIELD_TYPE_INFO)?;
  let info_value = v8::Local::<v8::Value>::try_from(info_field).ok()?;
  let info_ext = v8::Local::<v8::External>::try_from(info_value).ok()?;
  if !std::ptr::eq(
    info_ext.value() as *const TypeInfo,
    T::type_info() as *const TypeInfo,
  ) {
    return None;
  }

  let cell_field = object.get_internal_field(scope, FIELD_INSTANCE)?;
  let cell_value = v8::Local::<v8::Value>::try_from(cell_field).ok()?;
  let cell_ext = v8::Local::<v8::External>::try_from(cell_value).ok()?;
  let raw = cell_ext.value() as *const RefCell<NativeCell<T>>;
  if raw.is_null() {
    return None;
  }

  unsafe {
    Rc::increment_strong_count(raw);
    Some(Rc::from_raw(raw))
  }
}

/// A converter wrapper pairing a JS object with its native instance.
pub struct NativeHandleArg<T: NativeClass>(pub NativeCellRc<T>);

impl<T: NativeClass> crate::bridge::convert::FromV8 for NativeHandleArg<T> {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    unwrap_object::<T>(scope, value).map(NativeHandleArg)
  }
}
