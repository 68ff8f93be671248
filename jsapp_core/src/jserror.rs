//! Structured JS exceptions captured from V8.

use crate::prelude::*;

/// A JavaScript exception lifted out of the isolate, with enough context to
/// be reported on the Rust side. Compile/link/eval failures carry one of
/// these in their message.
#[derive(Debug, Clone)]
pub struct JsError {
  pub message: String,
  pub resource_name: String,
  pub line_number: Option<usize>,
  pub stack: Option<String>,
}

impl JsError {
  /// Builds a [`JsError`] from a caught v8 exception value.
  pub fn from_v8_exception(
    scope: &mut v8::HandleScope,
    exception: v8::Local<v8::Value>,
  ) -> Self {
    let message = v8::Exception::create_message(scope, exception);
    let resource_name = message
      .get_script_resource_name(scope)
      .map(|name| name.to_rust_string_lossy(scope))
      .unwrap_or_default();
    let line_number = message.get_line_number(scope);
    let msg_text = message.get(scope).to_rust_string_lossy(scope);

    // The `stack` property is only present on Error objects.
    let stack = exception.to_object(scope).and_then(|obj| {
      let key = v8::String::new(scope, "stack").unwrap();
      let stack = obj.get(scope, key.into())?;
      if stack.is_undefined() {
        return None;
      }
      Some(stack.to_rust_string_lossy(scope))
    });

    JsError {
      message: msg_text,
      resource_name,
      line_number,
      stack,
    }
  }

  /// Captures the pending exception of a try-catch scope, if any.
  pub fn from_try_catch(
    tc_scope: &mut v8::TryCatch<v8::HandleScope>,
  ) -> Option<Self> {
    let exception = tc_scope.exception()?;
    Some(JsError::from_v8_exception(tc_scope, exception))
  }
}

impl std::fmt::Display for JsError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.message)?;
    if !self.resource_name.is_empty() {
      write!(f, " ({}", self.resource_name)?;
      if let Some(line) = self.line_number {
        write!(f, ":{line}")?;
      }
      write!(f, ")")?;
    }
    if let Some(stack) = &self.stack {
      write!(f, "\n{stack}")?;
    }
    Ok(())
  }
}

impl JsError {
  pub fn into_compile_err(self) -> TheErr {
    TheErr::Compile(self.to_string())
  }

  pub fn into_link_err(self) -> TheErr {
    TheErr::Link(self.to_string())
  }

  pub fn into_eval_err(self) -> TheErr {
    TheErr::Eval(self.to_string())
  }
}
