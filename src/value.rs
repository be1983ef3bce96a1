//! Typed message payloads for the Fluxgraph dataflow engine.
//!
//! This module defines the two payload types that travel along graph edges:
//!
//! - [`Value`]: a type-erased unit holding exactly one payload out of a closed
//!   set of kinds (integral, floating, string, opaque handle), with a runtime
//!   tag and type-checked accessors.
//! - [`Args`]: an ordered, fixed-length sequence of [`Value`]s, constructed
//!   once per message emission and owned exclusively by the message instance
//!   until consumed downstream.
//!
//! Accessors never coerce: reading an `Int` as `Float` fails with
//! [`ValueError::TypeMismatch`]. There is no implicit conversion between
//! numeric and string representations.
//!
//! # Examples
//!
//! ```
//! use fluxgraph::value::{Args, Value, ValueKind};
//!
//! let args = Args::new(vec![Value::from(1), Value::from(2.5), Value::from("ok")]);
//! assert_eq!(args.int(0).unwrap(), 1);
//! assert_eq!(args.float(1).unwrap(), 2.5);
//! assert_eq!(args.str(2).unwrap(), "ok");
//!
//! // Wrong-kind access is an error, not a coercion.
//! let err = args.float(0).unwrap_err();
//! assert_eq!(
//!     err,
//!     fluxgraph::value::ValueError::TypeMismatch {
//!         expected: ValueKind::Float,
//!         found: ValueKind::Int,
//!     }
//! );
//! ```

use std::any::Any;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Runtime tag identifying which payload kind a [`Value`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Signed 64-bit integer payload.
    Int,
    /// 64-bit floating point payload.
    Float,
    /// UTF-8 string payload.
    Str,
    /// Opaque reference-counted handle to arbitrary user data.
    Handle,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Str => write!(f, "str"),
            Self::Handle => write!(f, "handle"),
        }
    }
}

/// Errors produced by type-checked payload access.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ValueError {
    /// The stored runtime tag disagrees with the requested type.
    #[error("type mismatch: expected {expected}, found {found}")]
    #[diagnostic(
        code(fluxgraph::value::type_mismatch),
        help("Values never coerce between kinds; check the producing node's signature.")
    )]
    TypeMismatch {
        expected: ValueKind,
        found: ValueKind,
    },

    /// Positional access beyond the length of an [`Args`].
    #[error("argument index {index} out of bounds (len {len})")]
    #[diagnostic(code(fluxgraph::value::index_out_of_bounds))]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Opaque, cheaply clonable handle to arbitrary user data.
///
/// Handles are compared by identity and carried through the graph unchanged;
/// the engine never inspects their contents. Downcast back to the concrete
/// type with [`Handle::downcast`].
#[derive(Clone)]
pub struct Handle(Arc<dyn Any + Send + Sync>);

impl Handle {
    /// Wrap an arbitrary `Send + Sync` payload.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self(Arc::new(payload))
    }

    /// Attempt to recover the concrete payload type.
    ///
    /// Returns `None` when the handle holds a different type.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(..)")
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A type-erased, copyable unit holding exactly one typed payload.
///
/// Values are immutable once constructed and owned by the message that
/// carries them. Access goes through the type-checked accessors
/// ([`Value::as_int`] and friends), which fail with
/// [`ValueError::TypeMismatch`] if the stored tag disagrees with the
/// requested type.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Handle(Handle),
}

impl Value {
    /// The runtime tag of the stored payload.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::Handle(_) => ValueKind::Handle,
        }
    }

    /// Type-checked integer access.
    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Self::Int(v) => Ok(*v),
            other => Err(ValueError::TypeMismatch {
                expected: ValueKind::Int,
                found: other.kind(),
            }),
        }
    }

    /// Type-checked float access.
    pub fn as_float(&self) -> Result<f64, ValueError> {
        match self {
            Self::Float(v) => Ok(*v),
            other => Err(ValueError::TypeMismatch {
                expected: ValueKind::Float,
                found: other.kind(),
            }),
        }
    }

    /// Type-checked string access.
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Self::Str(v) => Ok(v),
            other => Err(ValueError::TypeMismatch {
                expected: ValueKind::Str,
                found: other.kind(),
            }),
        }
    }

    /// Type-checked handle access.
    pub fn as_handle(&self) -> Result<&Handle, ValueError> {
        match self {
            Self::Handle(v) => Ok(v),
            other => Err(ValueError::TypeMismatch {
                expected: ValueKind::Handle,
                found: other.kind(),
            }),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Handle> for Value {
    fn from(v: Handle) -> Self {
        Self::Handle(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Str(v) => serializer.serialize_str(v),
            // Opaque payloads have no stable wire form; serialize a marker.
            Self::Handle(_) => serializer.serialize_str("<opaque handle>"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Handle(_) => write!(f, "<opaque handle>"),
        }
    }
}

/// An ordered, fixed-length sequence of [`Value`]s.
///
/// One `Args` is constructed per message emission and transfers ownership to
/// the consuming node; there is no aliasing of a message across nodes.
/// Construction is total and never fails; type checking happens at access
/// time.
///
/// # Examples
///
/// ```
/// use fluxgraph::value::{Args, Value};
///
/// let args = Args::new(vec![Value::from(7), Value::from("label")]);
/// assert_eq!(args.len(), 2);
/// assert_eq!(args.int(0).unwrap(), 7);
/// assert_eq!(args.str(1).unwrap(), "label");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    /// Construct from an ordered list of values. Total; never fails.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Construct a single-value message.
    #[must_use]
    pub fn single(value: impl Into<Value>) -> Self {
        Self {
            values: vec![value.into()],
        }
    }

    /// An empty argument list (used by sources that emit unit messages).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Positional access without type checking.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// The runtime tags of all values, in positional order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ValueKind> {
        self.values.iter().map(Value::kind).collect()
    }

    /// Borrow the underlying values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume into the underlying values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn checked(&self, index: usize) -> Result<&Value, ValueError> {
        self.values.get(index).ok_or(ValueError::IndexOutOfBounds {
            index,
            len: self.values.len(),
        })
    }

    /// Type-checked integer access at `index`.
    pub fn int(&self, index: usize) -> Result<i64, ValueError> {
        self.checked(index)?.as_int()
    }

    /// Type-checked float access at `index`.
    pub fn float(&self, index: usize) -> Result<f64, ValueError> {
        self.checked(index)?.as_float()
    }

    /// Type-checked string access at `index`.
    pub fn str(&self, index: usize) -> Result<&str, ValueError> {
        self.checked(index)?.as_str()
    }

    /// Type-checked handle access at `index`.
    pub fn handle(&self, index: usize) -> Result<&Handle, ValueError> {
        self.checked(index)?.as_handle()
    }
}

impl Index<usize> for Args {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl FromIterator<Value> for Args {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_round_trip_kinds() {
        assert_eq!(Value::from(3).kind(), ValueKind::Int);
        assert_eq!(Value::from(3.5).kind(), ValueKind::Float);
        assert_eq!(Value::from("x").kind(), ValueKind::Str);
        assert_eq!(Value::from(Handle::new(vec![1u8])).kind(), ValueKind::Handle);
    }

    #[test]
    fn no_implicit_coercion() {
        let v = Value::from(1);
        assert_eq!(
            v.as_float(),
            Err(ValueError::TypeMismatch {
                expected: ValueKind::Float,
                found: ValueKind::Int,
            })
        );
        let s = Value::from("1");
        assert!(s.as_int().is_err());
    }

    #[test]
    fn args_positional_access() {
        let args = Args::new(vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(args.int(0).unwrap(), 1);
        assert_eq!(args.int(1).unwrap(), 2);
        assert_eq!(args.int(2).unwrap(), 3);
        assert_eq!(
            args.int(3),
            Err(ValueError::IndexOutOfBounds { index: 3, len: 3 })
        );
    }

    #[test]
    fn handle_downcast() {
        let h = Handle::new(String::from("payload"));
        assert_eq!(*h.downcast::<String>().unwrap(), "payload");
        assert!(h.downcast::<i64>().is_none());
    }

    #[test]
    fn handle_identity_equality() {
        let h = Handle::new(1u8);
        assert_eq!(h.clone(), h);
        assert_ne!(Handle::new(1u8), Handle::new(1u8));
    }

    #[test]
    fn serialization_is_tag_faithful() {
        let args = Args::new(vec![Value::from(1), Value::from("a")]);
        let json = serde_json::to_string(&args).unwrap();
        assert!(json.contains('1'));
        assert!(json.contains("\"a\""));
    }
}
