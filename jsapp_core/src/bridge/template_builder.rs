//! Fluent configuration of one JS object template.

use crate::bridge::dispatch::function_template_for;
use crate::bridge::native_object::RESERVED_INTERNAL_FIELDS;

/// Build-time configuration of an `ObjectTemplate`.
///
/// `set_constructor` may be called at most once and only before any other
/// setter; a second constructor is fatal. The builder is single-use:
/// `build` consumes it.
pub struct ObjectTemplateBuilder<'s, 'p> {
  scope: &'p mut v8::HandleScope<'s>,
  template: v8::Local<'s, v8::ObjectTemplate>,
  constructor_allowed: bool,
}

impl<'s, 'p> ObjectTemplateBuilder<'s, 'p> {
  pub fn new(scope: &'p mut v8::HandleScope<'s>) -> Self {
    let template = v8::ObjectTemplate::new(scope);
    template.set_internal_field_count(RESERVED_INTERNAL_FIELDS);
    ObjectTemplateBuilder {
      scope,
      template,
      constructor_allowed: true,
    }
  }

  /// Installs a constructor function on the current context's global and
  /// re-roots the template on the constructor's prototype template, so
  /// instances created with `new` share it.
  pub fn set_constructor(mut self, name: &str, address: u64) -> Self {
    assert!(
      self.constructor_allowed,
      "constructor must be set first and only once"
    );
    // Setting it twice or after members is a programming error.
    self.constructor_allowed = false;

    let constructor = function_template_for(self.scope, address);
    let class_name = v8::String::new(self.scope, name).unwrap();
    constructor.set_class_name(class_name);

    let instance = constructor.instance_template(self.scope);
    instance.set_internal_field_count(RESERVED_INTERNAL_FIELDS);

    self.template = constructor.prototype_template(self.scope);
    self.template.set_internal_field_count(RESERVED_INTERNAL_FIELDS);

    let context = self.scope.get_current_context();
    let global = context.global(self.scope);
    let key = v8::String::new(self.scope, name).unwrap();
    if let Some(function) = constructor.get_function(self.scope) {
      global.set(self.scope, key.into(), function.into());
    }

    self
  }

  /// Adds a method dispatching to the registered callable at `address`.
  pub fn set_method(mut self, name: &str, address: u64) -> Self {
    self.constructor_allowed = false;
    let method = function_template_for(self.scope, address);
    let key = v8::String::new(self.scope, name).unwrap();
    self.template.set(key.into(), method.into());
    self
  }

  /// Adds a data value.
  pub fn set_value(mut self, name: &str, value: v8::Local<'s, v8::Data>) -> Self {
    self.constructor_allowed = false;
    let key = v8::String::new(self.scope, name).unwrap();
    self.template.set(key.into(), value);
    self
  }

  /// Adds an accessor property with a getter and an optional setter.
  pub fn set_property(
    mut self,
    name: &str,
    getter: u64,
    setter: Option<u64>,
  ) -> Self {
    self.constructor_allowed = false;
    let getter = function_template_for(self.scope, getter);
    let setter = setter.map(|address| function_template_for(self.scope, address));
    let key = v8::String::new(self.scope, name).unwrap();
    let attr = match setter {
      Some(_) => v8::PropertyAttribute::NONE,
      None => v8::PropertyAttribute::READ_ONLY,
    };
    self
      .template
      .set_accessor_property(key.into(), Some(getter), setter, attr);
    self
  }

  /// Adds a getter-only accessor property.
  pub fn set_read_only_property(self, name: &str, getter: u64) -> Self {
    self.set_property(name, getter, None)
  }

  /// Returns the configured template, consuming the builder.
  pub fn build(self) -> v8::Local<'s, v8::ObjectTemplate> {
    self.template
  }
}
