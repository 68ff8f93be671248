//! Native call dispatch.
//!
//! Every JS-visible function shares one V8 callback, [`dispatch_callback`].
//! The address of the real Rust function is stored as a `BigInt` in the
//! function's data; the thunk reads it back, looks up the registered
//! descriptor and invokes it. The `register_function*` / `register_method*`
//! constructors monomorphize one invoker per signature shape and convert
//! arguments positionally through [`FromV8`]/[`ToV8`].

use crate::bridge::convert::{FromV8, ToV8};
use crate::bridge::native_object::{attach_object, unwrap_object, NativeClass};
use crate::bridge::registry;
use crate::bridge::{throw_error, throw_type_error};
use crate::prelude::*;

/// The type-erased invoker paired with a native function address.
pub type CallbackInvoker = Box<
  dyn Fn(&mut v8::HandleScope, v8::FunctionCallbackArguments, v8::ReturnValue)
    + Send
    + Sync,
>;

/// One registered native callable.
pub struct CallbackDescriptor {
  /// Address of the native function, the opaque lookup key.
  pub address: u64,
  /// Owning type name for member methods, empty for free functions.
  pub owning_type: String,
  pub invoker: CallbackInvoker,
}

/// The single V8-facing dispatch thunk.
pub fn dispatch_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  rv: v8::ReturnValue,
) {
  let data = args.data();
  let address = match v8::Local::<v8::BigInt>::try_from(data) {
    Ok(tag) => tag.u64_value().0,
    Err(_) => {
      throw_type_error(scope, "Function carries no native callback tag");
      return;
    }
  };

  match registry::lookup_by_address(address) {
    Some(descriptor) => (descriptor.invoker)(scope, args, rv),
    None => {
      throw_error(
        scope,
        &TheErr::NotFound(format!("native callback 0x{address:x}")),
      );
    }
  }
}

/// Builds a function template whose invocations dispatch to the registered
/// callable at `address`.
pub fn function_template_for<'s>(
  scope: &mut v8::HandleScope<'s>,
  address: u64,
) -> v8::Local<'s, v8::FunctionTemplate> {
  let data = v8::BigInt::new_from_u64(scope, address);
  v8::FunctionTemplate::builder(dispatch_callback)
    .data(data.into())
    .build(scope)
}

/// Builds a function object for the registered callable at `address`.
pub fn function_for<'s>(
  scope: &mut v8::HandleScope<'s>,
  address: u64,
) -> Option<v8::Local<'s, v8::Function>> {
  let template = function_template_for(scope, address);
  template.get_function(scope)
}

macro_rules! impl_register_callable {
  ($fn_name:ident, $method_name:ident, $ctor_name:ident $(, $A:ident)*) => {
    paste::paste! {
      /// Registers a free function and returns its address key.
      pub fn $fn_name<$($A,)* R>(
        f: fn(&mut v8::HandleScope $(, $A)*) -> TheResult<R>,
      ) -> u64
      where
        $($A: FromV8 + 'static,)*
        R: ToV8 + 'static,
      {
        let address = f as usize as u64;
        let invoker: CallbackInvoker = Box::new(move |scope, args, mut rv| {
          #[allow(unused_mut, unused_variables)]
          let mut index = 0;
          $(
            let [<arg_ $A:lower>] = match $A::from_v8(scope, args.get(index)) {
              Some(value) => value,
              None => {
                throw_type_error(
                  scope,
                  &format!("Argument {index} has the wrong type"),
                );
                return;
              }
            };
            #[allow(unused_assignments)]
            {
              index += 1;
            }
          )*
          match f(scope $(, [<arg_ $A:lower>])*) {
            Ok(result) => {
              let value = result.to_v8(scope);
              rv.set(value);
            }
            Err(e) => throw_error(scope, &e),
          }
        });
        registry::register(CallbackDescriptor {
          address,
          owning_type: String::new(),
          invoker,
        });
        address
      }

      /// Registers a member method of a native class and returns its
      /// address key. The receiver is validated against the class type
      /// info; a null or foreign receiver throws a `TypeError`.
      pub fn $method_name<T, $($A,)* R>(
        f: fn(&mut v8::HandleScope, &mut T $(, $A)*) -> TheResult<R>,
      ) -> u64
      where
        T: NativeClass,
        $($A: FromV8 + 'static,)*
        R: ToV8 + 'static,
      {
        let address = f as usize as u64;
        let invoker: CallbackInvoker = Box::new(move |scope, args, mut rv| {
          let this = args.this();
          let cell = match unwrap_object::<T>(scope, this.into()) {
            Some(cell) => cell,
            None => {
              throw_type_error(
                scope,
                &format!(
                  "Method called on a receiver that is not a {}",
                  T::type_info().type_name
                ),
              );
              return;
            }
          };

          #[allow(unused_mut, unused_variables)]
          let mut index = 0;
          $(
            let [<arg_ $A:lower>] = match $A::from_v8(scope, args.get(index)) {
              Some(value) => value,
              None => {
                throw_type_error(
                  scope,
                  &format!("Argument {index} has the wrong type"),
                );
                return;
              }
            };
            #[allow(unused_assignments)]
            {
              index += 1;
            }
          )*

          let mut cell_ref = cell.borrow_mut();
          let instance = match cell_ref.instance_mut() {
            Some(instance) => instance,
            None => {
              throw_type_error(scope, "Native instance already destroyed");
              return;
            }
          };
          match f(scope, instance $(, [<arg_ $A:lower>])*) {
            Ok(result) => {
              drop(cell_ref);
              let value = result.to_v8(scope);
              rv.set(value);
            }
            Err(e) => {
              drop(cell_ref);
              throw_error(scope, &e);
            }
          }
        });
        registry::register(CallbackDescriptor {
          address,
          owning_type: T::type_info().type_name.to_string(),
          invoker,
        });
        address
      }

      /// Registers a constructor for a native class and returns its
      /// address key. Invocation allocates the native instance and wires
      /// it into the receiver created by `new`.
      pub fn $ctor_name<T $(, $A)*>(
        f: fn(&mut v8::HandleScope $(, $A)*) -> TheResult<T>,
      ) -> u64
      where
        T: NativeClass,
        $($A: FromV8 + 'static,)*
      {
        let address = f as usize as u64;
        let invoker: CallbackInvoker = Box::new(move |scope, args, mut rv| {
          #[allow(unused_mut, unused_variables)]
          let mut index = 0;
          $(
            let [<arg_ $A:lower>] = match $A::from_v8(scope, args.get(index)) {
              Some(value) => value,
              None => {
                throw_type_error(
                  scope,
                  &format!("Argument {index} has the wrong type"),
                );
                return;
              }
            };
            #[allow(unused_assignments)]
            {
              index += 1;
            }
          )*
          let instance = match f(scope $(, [<arg_ $A:lower>])*) {
            Ok(instance) => instance,
            Err(e) => {
              throw_error(scope, &e);
              return;
            }
          };
          let this = args.this();
          match attach_object(scope, this, instance) {
            Ok(_) => rv.set(this.into()),
            Err(e) => throw_error(scope, &e),
          }
        });
        registry::register(CallbackDescriptor {
          address,
          owning_type: T::type_info().type_name.to_string(),
          invoker,
        });
        address
      }
    }
  };
}

impl_register_callable!(register_function0, register_method0, register_constructor0);
impl_register_callable!(register_function1, register_method1, register_constructor1, A1);
impl_register_callable!(register_function2, register_method2, register_constructor2, A1, A2);
impl_register_callable!(register_function3, register_method3, register_constructor3, A1, A2, A3);
impl_register_callable!(register_function4, register_method4, register_constructor4, A1, A2, A3, A4);
