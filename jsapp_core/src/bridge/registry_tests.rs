use super::dispatch::{dispatch_callback, CallbackDescriptor};
use super::native_object::TypeInfo;
use super::registry;
use crate::prelude::*;
use crate::snapshot::buffer::{ReadBuffer, WriteBuffer};

use std::any::Any;

fn noop_invoker() -> super::dispatch::CallbackInvoker {
  Box::new(
    |_scope: &mut v8::HandleScope,
     _args: v8::FunctionCallbackArguments,
     _rv: v8::ReturnValue| {},
  )
}

fn serialize_nothing(_buffer: &mut WriteBuffer, _instance: &dyn Any) {}

fn deserialize_nothing(_buffer: &mut ReadBuffer) -> TheResult<Box<dyn Any>> {
  Ok(Box::new(()))
}

#[test]
fn register_and_lookup1() {
  registry::register(CallbackDescriptor {
    address: 0x1001,
    owning_type: String::new(),
    invoker: noop_invoker(),
  });
  let descriptor = registry::lookup_by_address(0x1001).unwrap();
  assert_eq!(descriptor.address, 0x1001);
  assert!(descriptor.owning_type.is_empty());

  assert!(registry::lookup_by_address(0xdead_0001).is_none());
}

#[test]
fn register_duplicate_is_noop1() {
  registry::register(CallbackDescriptor {
    address: 0x1002,
    owning_type: "First".to_string(),
    invoker: noop_invoker(),
  });
  registry::register(CallbackDescriptor {
    address: 0x1002,
    owning_type: "Second".to_string(),
    invoker: noop_invoker(),
  });
  let descriptor = registry::lookup_by_address(0x1002).unwrap();
  assert_eq!(descriptor.owning_type, "First");
}

#[test]
fn external_references1() {
  registry::register(CallbackDescriptor {
    address: 0x1003,
    owning_type: String::new(),
    invoker: noop_invoker(),
  });
  let refs = registry::external_references();
  // Terminates in the zero sentinel.
  assert_eq!(refs.last(), Some(&0));
  // The dispatch thunk is recorded exactly once.
  let thunk = dispatch_callback as usize;
  assert_eq!(refs.iter().filter(|addr| **addr == thunk).count(), 1);
}

#[test]
fn namespace_setup_registration1() {
  fn setup(
    _scope: &mut v8::HandleScope,
    _context: v8::Local<v8::Context>,
    _global: v8::Local<v8::Object>,
  ) -> TheResult<()> {
    Ok(())
  }

  registry::register_namespace_setup(setup, Some(&["reg-test-ns"]));
  assert!(registry::has_namespace("reg-test-ns"));
  assert!(!registry::has_namespace("reg-test-ns-missing"));

  // The default list is the global sentinel namespace.
  registry::register_namespace_setup(setup, None);
  assert!(registry::has_namespace(registry::GLOBAL_NAMESPACE));
}

#[test]
fn object_info1() {
  static INFO: TypeInfo = TypeInfo {
    type_name: "RegistryTestType",
    serialize: serialize_nothing,
    deserialize: deserialize_nothing,
  };

  registry::register_object_info(&INFO);
  // Re-registering the same descriptor is fine.
  registry::register_object_info(&INFO);

  let found =
    registry::lookup_object_info_by_type_name("RegistryTestType").unwrap();
  assert!(std::ptr::eq(found, &INFO));
  assert!(registry::lookup_object_info_by_type_name("Missing").is_none());
}

#[test]
#[should_panic(expected = "conflicting TypeInfo registration")]
fn object_info_conflict1() {
  static INFO_A: TypeInfo = TypeInfo {
    type_name: "RegistryConflictType",
    serialize: serialize_nothing,
    deserialize: deserialize_nothing,
  };
  static INFO_B: TypeInfo = TypeInfo {
    type_name: "RegistryConflictType",
    serialize: serialize_nothing,
    deserialize: deserialize_nothing,
  };

  registry::register_object_info(&INFO_A);
  registry::register_object_info(&INFO_B);
}
