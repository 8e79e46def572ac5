use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::coords::{ColorRgba, Vec3};
use crate::device::ImageData;

/// Dynamically typed property value.
///
/// Declarative trees carry props as values; native objects interpret them
/// through [`super::NativeObject::set_path`].
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Decoded image, compared by identity.
    Image(Rc<ImageData>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Image(_) => "image",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Number(n) => Some(*n as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Rc<ImageData>> {
        match self {
            Value::Image(img) => Some(img),
            _ => None,
        }
    }

    /// Flat list of numbers, e.g. vertex data.
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        self.as_list()?.iter().map(Value::as_f32).collect()
    }

    /// Three-number list.
    pub fn as_vec3(&self) -> Option<Vec3> {
        match self.to_f32_vec()?.as_slice() {
            [x, y, z] => Some(Vec3::new(*x, *y, *z)),
            _ => None,
        }
    }

    /// Three- or four-number list; alpha defaults to 1.
    pub fn as_color(&self) -> Option<ColorRgba> {
        match self.to_f32_vec()?.as_slice() {
            [r, g, b] => Some(ColorRgba::new(*r, *g, *b, 1.0)),
            [r, g, b, a] => Some(ColorRgba::new(*r, *g, *b, *a)),
            _ => None,
        }
    }

    /// Looks up a field on a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.get(key)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Image(a), Value::Image(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Image(img) => write!(f, "<image {}x{}>", img.width, img.height),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<&[f32]> for Value {
    fn from(v: &[f32]) -> Self {
        Value::List(v.iter().map(|&n| Value::from(n)).collect())
    }
}

impl<const N: usize> From<[f32; N]> for Value {
    fn from(v: [f32; N]) -> Self {
        Value::from(&v[..])
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::from(v.to_array())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<Rc<ImageData>> for Value {
    fn from(v: Rc<ImageData>) -> Self {
        Value::Image(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_compare_by_identity() {
        let a = Rc::new(ImageData::solid(1, 1, [0; 4]));
        let b = Rc::new(ImageData::solid(1, 1, [0; 4]));
        assert_eq!(Value::Image(a.clone()), Value::Image(a.clone()));
        assert_ne!(Value::Image(a), Value::Image(b));
    }

    #[test]
    fn numeric_lists_convert_to_vectors_and_colors() {
        let v = Value::from([1.0f32, 2.0, 3.0]);
        assert_eq!(v.as_vec3(), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(v.as_color(), Some(ColorRgba::new(1.0, 2.0, 3.0, 1.0)));
        assert_eq!(Value::from("x").as_vec3(), None);
        let mixed = Value::List(vec![Value::from(1.0f32), Value::from("a")]);
        assert_eq!(mixed.to_f32_vec(), None);
    }
}
