//! Wire value model
//!
//! Every argument and return value crossing the wire is one of these shapes.
//! Object references never travel as such; they are substituted by their
//! object store handle (`Object`), with handle 0 denoting "no object".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Raw value of an int32-backed enumeration
    Enumeration(i32),
    /// Object store handle. 0 is the null object.
    Object(u64),
    List(Vec<Value>),
    Set(Vec<Value>),
    Dictionary(Vec<(Value, Value)>),
    Tuple(Vec<Value>),
}

impl Value {
    /// Short name of the value's wire type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enumeration(_) => "enumeration",
            Value::Object(_) => "object",
            Value::List(_) => "List",
            Value::Set(_) => "Set",
            Value::Dictionary(_) => "Dictionary",
            Value::Tuple(_) => "Tuple",
        }
    }

    /// True for the null object (handle 0).
    pub fn is_null_object(&self) -> bool {
        matches!(self, Value::Object(0))
    }
}

/// Structural equality. Lists and tuples compare element-wise in order; sets
/// and dictionaries compare without regard to entry order. The derive is not
/// used because it would make entry order significant for sets and
/// dictionaries.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (UInt32(a), UInt32(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Enumeration(a), Enumeration(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (List(a), List(b)) | (Tuple(a), Tuple(b)) => a == b,
            (Set(a), Set(b)) => {
                a.len() == b.len()
                    && a.iter().all(|x| b.contains(x))
                    && b.iter().all(|x| a.contains(x))
            }
            (Dictionary(a), Dictionary(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            _ => false,
        }
    }
}
