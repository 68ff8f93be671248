//! Converters between rust and v8 values.

/// Rust value to v8 value.
pub trait ToV8 {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value>;
}

/// V8 value to rust value. Returns `None` when the value does not have the
/// expected shape.
pub trait FromV8: Sized {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self>;
}

impl ToV8 for () {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::undefined(scope).into()
  }
}

impl ToV8 for bool {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::Boolean::new(scope, *self).into()
  }
}

impl FromV8 for bool {
  /// Any value converts through JS truthiness.
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    Some(value.boolean_value(scope))
  }
}

// Integer converters reject non-integral numbers.
fn integral_value(
  scope: &mut v8::HandleScope,
  value: v8::Local<v8::Value>,
) -> Option<f64> {
  if !value.is_number() {
    return None;
  }
  let number = value.number_value(scope)?;
  if number.fract() != 0.0 {
    return None;
  }
  Some(number)
}

impl ToV8 for i32 {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::Integer::new(scope, *self).into()
  }
}

impl FromV8 for i32 {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    let number = integral_value(scope, value)?;
    if number < i32::MIN as f64 || number > i32::MAX as f64 {
      return None;
    }
    Some(number as i32)
  }
}

impl ToV8 for u32 {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::Integer::new_from_unsigned(scope, *self).into()
  }
}

impl FromV8 for u32 {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    let number = integral_value(scope, value)?;
    if number < 0.0 || number > u32::MAX as f64 {
      return None;
    }
    Some(number as u32)
  }
}

impl ToV8 for i64 {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::BigInt::new_from_i64(scope, *self).into()
  }
}

impl FromV8 for i64 {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    if let Ok(big) = v8::Local::<v8::BigInt>::try_from(value) {
      let (n, lossless) = big.i64_value();
      return if lossless { Some(n) } else { None };
    }
    let number = integral_value(scope, value)?;
    if number < i64::MIN as f64 || number > i64::MAX as f64 {
      return None;
    }
    Some(number as i64)
  }
}

impl ToV8 for u64 {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::BigInt::new_from_u64(scope, *self).into()
  }
}

impl FromV8 for u64 {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    if let Ok(big) = v8::Local::<v8::BigInt>::try_from(value) {
      let (n, lossless) = big.u64_value();
      return if lossless { Some(n) } else { None };
    }
    let number = integral_value(scope, value)?;
    if number < 0.0 || number > u64::MAX as f64 {
      return None;
    }
    Some(number as u64)
  }
}

impl ToV8 for f64 {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::Number::new(scope, *self).into()
  }
}

impl FromV8 for f64 {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    if !value.is_number() {
      return None;
    }
    value.number_value(scope)
  }
}

impl ToV8 for f32 {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::Number::new(scope, *self as f64).into()
  }
}

impl FromV8 for f32 {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    f64::from_v8(scope, value).map(|n| n as f32)
  }
}

impl ToV8 for str {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::String::new(scope, self).unwrap().into()
  }
}

impl ToV8 for String {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::String::new(scope, self).unwrap().into()
  }
}

impl FromV8 for String {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    if !value.is_string() && !value.is_string_object() {
      return None;
    }
    Some(value.to_rust_string_lossy(scope))
  }
}

/// UTF-16 code units.
pub struct U16String(pub Vec<u16>);

impl ToV8 for U16String {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    let s = String::from_utf16_lossy(&self.0);
    v8::String::new(scope, &s).unwrap().into()
  }
}

impl FromV8 for U16String {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    let s = String::from_v8(scope, value)?;
    Some(U16String(s.encode_utf16().collect()))
  }
}

impl<T> ToV8 for Vec<T>
where
  T: ToV8,
{
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    let elements = self
      .iter()
      .map(|item| item.to_v8(scope))
      .collect::<Vec<v8::Local<'s, v8::Value>>>();
    v8::Array::new_with_elements(scope, &elements).into()
  }
}

impl<T> FromV8 for Vec<T>
where
  T: FromV8,
{
  /// Requires an array; every element converts recursively.
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    let elements = v8::Local::<v8::Array>::try_from(value).ok()?;
    let n = elements.length();
    let mut result: Vec<T> = Vec::with_capacity(n as usize);
    for i in 0..n {
      let element = elements.get_index(scope, i)?;
      result.push(T::from_v8(scope, element)?);
    }
    Some(result)
  }
}

// Passthrough converters keep the JS value as a global handle.

impl ToV8 for v8::Global<v8::Value> {
  fn to_v8<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    v8::Local::new(scope, self)
  }
}

impl FromV8 for v8::Global<v8::Value> {
  fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
  ) -> Option<Self> {
    Some(v8::Global::new(scope, value))
  }
}

macro_rules! passthrough_converter {
  ($v8_type:ident, $check:ident) => {
    impl ToV8 for v8::Global<v8::$v8_type> {
      fn to_v8<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
      ) -> v8::Local<'s, v8::Value> {
        v8::Local::new(scope, self).into()
      }
    }

    impl FromV8 for v8::Global<v8::$v8_type> {
      fn from_v8(
        scope: &mut v8::HandleScope,
        value: v8::Local<v8::Value>,
      ) -> Option<Self> {
        if !value.$check() {
          return None;
        }
        let local = v8::Local::<v8::$v8_type>::try_from(value).ok()?;
        Some(v8::Global::new(scope, local))
      }
    }
  };
}

passthrough_converter!(Object, is_object);
passthrough_converter!(Function, is_function);
passthrough_converter!(Number, is_number);
passthrough_converter!(Promise, is_promise);
passthrough_converter!(ArrayBuffer, is_array_buffer);
passthrough_converter!(External, is_external);
