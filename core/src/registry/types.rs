//! Wire type system
//!
//! The closed set of types that may appear in procedure signatures. Anything
//! outside this set is rejected at registration time with an error naming the
//! offending type.

use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::value::Value;

/// Reference to a class or enumeration registered under a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeRef {
    pub service: String,
    pub name: String,
}

impl TypeRef {
    pub fn new(service: &str, name: &str) -> Self {
        Self {
            service: service.to_string(),
            name: name.to_string(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.service, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WireType {
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
    Bytes,
    /// Opaque server-side object, a uint64 handle on the wire
    Class(TypeRef),
    /// int32-backed enumeration
    Enumeration(TypeRef),
    List(Box<WireType>),
    Set(Box<WireType>),
    Dictionary(Box<WireType>, Box<WireType>),
    Tuple(Vec<WireType>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("{0} is not a valid dictionary key type; keys must be bool, an integer or string")]
    InvalidKeyType(String),
    #[error("tuple must have at least two elements")]
    TupleArity,
}

impl WireType {
    /// Name of the underlying wire representation. Classes travel as uint64
    /// handles, enumerations as their int32 raw value.
    pub fn wire_name(&self) -> &'static str {
        match self {
            WireType::Bool => "bool",
            WireType::Int32 => "int32",
            WireType::Int64 => "int64",
            WireType::UInt32 => "uint32",
            WireType::UInt64 => "uint64",
            WireType::Float => "float",
            WireType::Double => "double",
            WireType::String => "string",
            WireType::Bytes => "bytes",
            WireType::Class(_) => "uint64",
            WireType::Enumeration(_) => "int32",
            WireType::List(_) => "List",
            WireType::Set(_) => "Set",
            WireType::Dictionary(..) => "Dictionary",
            WireType::Tuple(_) => "Tuple",
        }
    }

    /// Full type name as used in procedure attributes, e.g.
    /// `List(Class(Service.TestClass))`.
    pub fn full_name(&self) -> String {
        match self {
            WireType::Class(r) => format!("Class({})", r.qualified()),
            WireType::Enumeration(r) => format!("Enum({})", r.qualified()),
            WireType::List(t) => format!("List({})", t.full_name()),
            WireType::Set(t) => format!("Set({})", t.full_name()),
            WireType::Dictionary(k, v) => {
                format!("Dictionary({},{})", k.full_name(), v.full_name())
            }
            WireType::Tuple(ts) => {
                format!("Tuple({})", ts.iter().map(WireType::full_name).join(","))
            }
            _ => self.wire_name().to_string(),
        }
    }

    /// True when the type carries class/enum semantics the wire representation
    /// alone cannot express, so descriptors need a disambiguating attribute.
    pub fn needs_attribute(&self) -> bool {
        !matches!(
            self,
            WireType::Bool
                | WireType::Int32
                | WireType::Int64
                | WireType::UInt32
                | WireType::UInt64
                | WireType::Float
                | WireType::Double
                | WireType::String
                | WireType::Bytes
        )
    }

    /// Types allowed as dictionary keys: hashable primitives only.
    pub fn is_valid_key(&self) -> bool {
        matches!(
            self,
            WireType::Bool
                | WireType::Int32
                | WireType::Int64
                | WireType::UInt32
                | WireType::UInt64
                | WireType::String
        )
    }

    /// Structural validation: dictionary key restrictions and tuple arity,
    /// applied recursively.
    pub fn validate(&self) -> Result<(), TypeError> {
        match self {
            WireType::List(t) | WireType::Set(t) => t.validate(),
            WireType::Dictionary(k, v) => {
                if !k.is_valid_key() {
                    return Err(TypeError::InvalidKeyType(k.full_name()));
                }
                k.validate()?;
                v.validate()
            }
            WireType::Tuple(ts) => {
                if ts.len() < 2 {
                    return Err(TypeError::TupleArity);
                }
                for t in ts {
                    t.validate()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Shape check of a decoded value against this type. Enum membership and
    /// handle liveness are checked separately by the dispatcher.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (WireType::Bool, Value::Bool(_)) => true,
            (WireType::Int32, Value::Int32(_)) => true,
            (WireType::Int64, Value::Int64(_)) => true,
            (WireType::UInt32, Value::UInt32(_)) => true,
            (WireType::UInt64, Value::UInt64(_)) => true,
            (WireType::Float, Value::Float(_)) => true,
            (WireType::Double, Value::Double(_)) => true,
            (WireType::String, Value::String(_)) => true,
            (WireType::Bytes, Value::Bytes(_)) => true,
            (WireType::Class(_), Value::Object(_)) => true,
            (WireType::Enumeration(_), Value::Enumeration(_)) => true,
            (WireType::List(t), Value::List(vs)) | (WireType::Set(t), Value::Set(vs)) => {
                vs.iter().all(|v| t.accepts(v))
            }
            (WireType::Dictionary(k, v), Value::Dictionary(pairs)) => pairs
                .iter()
                .all(|(key, value)| k.accepts(key) && v.accepts(value)),
            (WireType::Tuple(ts), Value::Tuple(vs)) => {
                ts.len() == vs.len() && ts.iter().zip(vs).all(|(t, v)| t.accepts(v))
            }
            _ => false,
        }
    }
}
