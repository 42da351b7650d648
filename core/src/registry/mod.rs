//! Service registry
//!
//! Descriptors for everything the server exposes: services, procedures,
//! classes and enumerations. The registry is built once at startup through
//! [`builder::RegistryBuilder`] and is immutable afterwards, so it can be
//! shared freely between the dispatcher and descriptor export.

pub mod builder;
pub mod docs;
pub mod types;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::context::CallContext;
use crate::continuation::Step;
use crate::scene::SceneMask;
use crate::value::Value;

pub use builder::{
    ClassDef, ClassPropertyDef, EnumerationDef, MethodDef, ProcedureDef, PropertyDef,
    RegistryBuilder, ServiceDef,
};
pub use types::{TypeRef, WireType};

/// Uniform invocation entry point bound to every procedure at registry build
/// time. Takes the flat, fully-decoded argument vector; defaults have already
/// been substituted by the dispatcher.
pub type Handler =
    Arc<dyn Fn(&CallContext, Vec<Value>) -> anyhow::Result<Step<Option<Value>>> + Send + Sync>;

/// Registration-time failure. These abort startup and are never surfaced to a
/// network client.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("\"{0}\" is not a valid identifier")]
    InvalidIdentifier(String),
    #[error("duplicate service \"{0}\"")]
    DuplicateService(String),
    #[error("service {service} contains duplicate procedures {name}")]
    DuplicateProcedure { service: String, name: String },
    #[error("service {service} contains duplicate classes {name}")]
    DuplicateClass { service: String, name: String },
    #[error("service {service} contains duplicate enumerations {name}")]
    DuplicateEnumeration { service: String, name: String },
    #[error("invalid type for {member}: {source}")]
    InvalidType {
        member: String,
        #[source]
        source: types::TypeError,
    },
    #[error("unknown class \"{class}\" referenced by {member}")]
    UnknownClass { class: String, member: String },
    #[error("unknown enumeration \"{enumeration}\" referenced by {member}")]
    UnknownEnumeration { enumeration: String, member: String },
    #[error("default value for parameter {parameter} in {procedure} does not match its type {expected}")]
    DefaultValueType {
        procedure: String,
        parameter: String,
        expected: String,
    },
    #[error("documentation error in {member}: {message}")]
    Documentation { member: String, message: String },
}

pub struct ParameterDescriptor {
    pub name: String,
    pub ty: WireType,
    default: Option<DefaultSource>,
    resolved: OnceLock<Value>,
}

/// A scalar default is stored directly; collection, tuple and object defaults
/// are declared through a zero-argument factory, constructed on demand.
pub(crate) enum DefaultSource {
    Value(Value),
    Factory(Box<dyn Fn() -> Value + Send + Sync>),
}

impl ParameterDescriptor {
    pub(crate) fn new(name: String, ty: WireType, default: Option<DefaultSource>) -> Self {
        Self {
            name,
            ty,
            default,
            resolved: OnceLock::new(),
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// The parameter's default, resolving and caching a factory-based default
    /// on first use.
    pub fn default_value(&self) -> Option<&Value> {
        match &self.default {
            None => None,
            Some(DefaultSource::Value(v)) => Some(v),
            Some(DefaultSource::Factory(f)) => Some(self.resolved.get_or_init(f)),
        }
    }

    /// True when a supplied value structurally equals the parameter's
    /// default. Lets transports omit arguments a client sent at their
    /// default value.
    pub fn is_default(&self, value: &Value) -> bool {
        self.default_value().is_some_and(|default| default == value)
    }
}

impl Serialize for ParameterDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ParameterDescriptor", 3)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("type", &self.ty)?;
        s.serialize_field("default", &self.default_value())?;
        s.end()
    }
}

#[derive(Serialize)]
pub struct ProcedureDescriptor {
    pub service: String,
    pub name: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub return_type: Option<WireType>,
    pub return_nullable: bool,
    pub documentation: String,
    pub scene: SceneMask,
    /// Free-form tags consumed by client-code generators: property accessor
    /// markers, class bindings and type parameterization hints.
    pub attributes: Vec<String>,
    #[serde(skip)]
    pub(crate) handler: Handler,
}

impl ProcedureDescriptor {
    /// `Service.Procedure`, as used in error messages.
    pub fn fully_qualified(&self) -> String {
        format!("{}.{}", self.service, self.name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassDescriptor {
    pub name: String,
    pub documentation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumerationValueDescriptor {
    pub name: String,
    pub value: i32,
    pub documentation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumerationDescriptor {
    pub name: String,
    pub documentation: String,
    pub values: Vec<EnumerationValueDescriptor>,
}

impl EnumerationDescriptor {
    pub fn contains_value(&self, raw: i32) -> bool {
        self.values.iter().any(|v| v.value == raw)
    }
}

#[derive(Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub documentation: String,
    pub scene: SceneMask,
    pub procedures: BTreeMap<String, ProcedureDescriptor>,
    pub classes: BTreeMap<String, ClassDescriptor>,
    pub enumerations: BTreeMap<String, EnumerationDescriptor>,
}

/// The complete, immutable set of descriptors. Concurrency-safe by
/// construction: nothing mutates it after [`RegistryBuilder::build`].
#[derive(Serialize)]
pub struct Registry {
    services: BTreeMap<String, ServiceDescriptor>,
}

impl Registry {
    pub(crate) fn from_services(services: BTreeMap<String, ServiceDescriptor>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    pub fn procedure(&self, service: &str, procedure: &str) -> Option<&ProcedureDescriptor> {
        self.services.get(service)?.procedures.get(procedure)
    }

    pub fn class(&self, r: &TypeRef) -> Option<&ClassDescriptor> {
        self.services.get(&r.service)?.classes.get(&r.name)
    }

    pub fn enumeration(&self, r: &TypeRef) -> Option<&EnumerationDescriptor> {
        self.services.get(&r.service)?.enumerations.get(&r.name)
    }

    /// Full descriptor export for client code generation. Pure read of the
    /// registry; never touches host state.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
