use super::dispatch::{
  register_constructor0, register_method0, register_method1,
};
use super::native_object::{
  new_object, unwrap_object, NativeClass, TypeInfo, WrapperState,
};
use super::template_builder::ObjectTemplateBuilder;
use super::SnapshotHandleCloser;
use crate::bridge::convert::FromV8;
use crate::context::JsContext;
use crate::prelude::*;
use crate::runtime::DEFAULT_CONTEXT_NAME;
use crate::snapshot::buffer::{ReadBuffer, WriteBuffer};
use crate::test::helpers;

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};

static COUNTER_DROPS: AtomicUsize = AtomicUsize::new(0);

struct Counter {
  value: i32,
}

impl Drop for Counter {
  fn drop(&mut self) {
    COUNTER_DROPS.fetch_add(1, Ordering::SeqCst);
  }
}

fn serialize_counter(buffer: &mut WriteBuffer, instance: &dyn Any) {
  if let Some(counter) = instance.downcast_ref::<Counter>() {
    buffer.write_u32(counter.value as u32);
  }
}

fn deserialize_counter(buffer: &mut ReadBuffer) -> TheResult<Box<dyn Any>> {
  let value = buffer.read_u32()? as i32;
  Ok(Box::new(Counter {
    value,
  }))
}

static COUNTER_INFO: TypeInfo = TypeInfo {
  type_name: "Counter",
  serialize: serialize_counter,
  deserialize: deserialize_counter,
};

fn counter_new(_scope: &mut v8::HandleScope) -> TheResult<Counter> {
  Ok(Counter {
    value: 0,
  })
}

fn counter_get_value(
  _scope: &mut v8::HandleScope,
  counter: &mut Counter,
) -> TheResult<i32> {
  Ok(counter.value)
}

fn counter_set_value(
  _scope: &mut v8::HandleScope,
  counter: &mut Counter,
  value: i32,
) -> TheResult<()> {
  counter.value = value;
  Ok(())
}

fn counter_increment(
  _scope: &mut v8::HandleScope,
  counter: &mut Counter,
) -> TheResult<i32> {
  counter.value += 1;
  Ok(counter.value)
}

impl NativeClass for Counter {
  fn type_info() -> &'static TypeInfo {
    &COUNTER_INFO
  }

  fn build_template<'s>(
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::ObjectTemplate> {
    let constructor = register_constructor0::<Counter>(counter_new);
    let increment = register_method0::<Counter, i32>(counter_increment);
    let getter = register_method0::<Counter, i32>(counter_get_value);
    let setter = register_method1::<Counter, i32, ()>(counter_set_value);

    ObjectTemplateBuilder::new(scope)
      .set_constructor("Counter", constructor)
      .set_method("increment", increment)
      .set_property("value", getter, Some(setter))
      .build()
  }
}

#[test]
fn native_class1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());
  let context = runtime.get_context_by_name(DEFAULT_CONTEXT_NAME).unwrap();

  {
    // Installs the `Counter` constructor on the default context's global.
    let scope = &mut runtime.handle_scope();
    Counter::build_template(scope);
  }

  let before_drops = COUNTER_DROPS.load(Ordering::SeqCst);

  {
    let scope = &mut runtime.handle_scope();
    let result = JsContext::run_script(
      &context,
      scope,
      "let c = new Counter(); c.value = 100; c.value",
    )
    .unwrap();
    let local = v8::Local::new(scope, result);
    assert_eq!(i32::from_v8(scope, local), Some(100));

    // The native side observes the same value.
    let holder =
      JsContext::run_script(&context, scope, "c").unwrap();
    let holder = v8::Local::new(scope, holder);
    let cell = unwrap_object::<Counter>(scope, holder).unwrap();
    assert_eq!(cell.borrow().instance().unwrap().value, 100);
    assert_eq!(cell.borrow().state(), WrapperState::Live);

    let result =
      JsContext::run_script(&context, scope, "c.increment()").unwrap();
    let local = v8::Local::new(scope, result);
    assert_eq!(i32::from_v8(scope, local), Some(101));

    // A method invoked on a foreign receiver throws a TypeError.
    let result = JsContext::run_script(
      &context,
      scope,
      "let r = 'none';
       try { c.increment.call({}); }
       catch (e) { r = (e instanceof TypeError) ? 'TypeError' : 'other'; }
       r",
    )
    .unwrap();
    let local = v8::Local::new(scope, result);
    assert_eq!(String::from_v8(scope, local), Some("TypeError".to_string()));
  }

  // Every wrapper is tracked by the runtime's handle closers.
  assert!(runtime.state().borrow().handle_closer_count() >= 1);

  // Disposing the runtime destroys outstanding instances exactly once.
  runtime.dispose_runtime();
  assert_eq!(COUNTER_DROPS.load(Ordering::SeqCst), before_drops + 1);
}

struct Widget {
  label: String,
}

fn serialize_widget(buffer: &mut WriteBuffer, instance: &dyn Any) {
  if let Some(widget) = instance.downcast_ref::<Widget>() {
    buffer.write_string(&widget.label);
  }
}

fn deserialize_widget(buffer: &mut ReadBuffer) -> TheResult<Box<dyn Any>> {
  let label = buffer.read_string()?;
  Ok(Box::new(Widget {
    label,
  }))
}

static WIDGET_INFO: TypeInfo = TypeInfo {
  type_name: "Widget",
  serialize: serialize_widget,
  deserialize: deserialize_widget,
};

fn widget_label(
  _scope: &mut v8::HandleScope,
  widget: &mut Widget,
) -> TheResult<String> {
  Ok(widget.label.clone())
}

impl NativeClass for Widget {
  fn type_info() -> &'static TypeInfo {
    &WIDGET_INFO
  }

  fn build_template<'s>(
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::ObjectTemplate> {
    let label = register_method0::<Widget, String>(widget_label);
    ObjectTemplateBuilder::new(scope)
      .set_read_only_property("label", label)
      .build()
  }
}

#[test]
fn new_object1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());

  let scope = &mut runtime.handle_scope();
  let handle = new_object(
    scope,
    Widget {
      label: "gear".to_string(),
    },
  )
  .unwrap();

  assert_eq!(handle.state(), WrapperState::Live);
  assert_eq!(handle.with(|w| w.label.clone()), Some("gear".to_string()));

  // The wrapper round-trips through its JS object.
  let object = handle.js_object(scope).unwrap();
  let cell = unwrap_object::<Widget>(scope, object.into()).unwrap();
  assert_eq!(cell.borrow().instance().unwrap().label, "gear");

  // Unwrapping with the wrong class fails.
  assert!(unwrap_object::<Counter>(scope, object.into()).is_none());

  // Snapshot close releases the handle but keeps the instance.
  handle.cell().borrow_mut().close_handle_for_snapshot();
  assert_eq!(handle.state(), WrapperState::Closed);
  assert_eq!(handle.with(|w| w.label.clone()), Some("gear".to_string()));
  assert!(handle.cell().borrow().js_object(scope).is_none());
}

#[test]
fn serializer_round_trip1() {
  let widget = Widget {
    label: "axle".to_string(),
  };
  let mut buffer = WriteBuffer::new();
  (WIDGET_INFO.serialize)(&mut buffer, &widget as &dyn Any);

  let bytes = buffer.into_bytes();
  let mut reader = ReadBuffer::new(&bytes);
  let restored = (WIDGET_INFO.deserialize)(&mut reader).unwrap();
  let restored = restored.downcast_ref::<Widget>().unwrap();
  assert_eq!(restored.label, "axle");
}

#[test]
#[should_panic(expected = "constructor must be set first")]
fn second_constructor_is_fatal1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let mut runtime = helpers::make_runtime(temp_dir.path());
  let scope = &mut runtime.handle_scope();

  let constructor = register_constructor0::<Counter>(counter_new);
  let increment = register_method0::<Counter, i32>(counter_increment);
  ObjectTemplateBuilder::new(scope)
    .set_constructor("CounterA", constructor)
    .set_method("increment", increment)
    .set_constructor("CounterB", constructor);
}
