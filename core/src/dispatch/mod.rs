//! Request dispatcher
//!
//! Runs the per-request state machine: lookup, scene check, argument decode,
//! instance resolution, invocation and outcome encoding. Every failure mode
//! is converted into a uniform error response at this boundary; nothing a
//! client sends can crash the server or the host tick. A procedure that
//! suspends comes back as [`CallResult::Pending`] and is re-driven by the
//! transport loop on a later tick.

pub mod processor;

use std::sync::Arc;

use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::context::CallContext;
use crate::continuation::{Continuation, Step};
use crate::registry::{ProcedureDescriptor, Registry, WireType};
use crate::scene::GameScene;
use crate::value::Value;

/// A decoded request for a single procedure call. Arguments are positional;
/// any position with a registered default may be omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureCall {
    pub service: String,
    pub procedure: String,
    pub arguments: Vec<Argument>,
}

impl ProcedureCall {
    pub fn new(service: &str, procedure: &str) -> Self {
        Self {
            service: service.to_string(),
            procedure: procedure.to_string(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, position: u32, payload: Vec<u8>) -> Self {
        self.arguments.push(Argument { position, payload });
        self
    }
}

/// One positional argument, carrying the encoded value payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argument {
    pub position: u32,
    pub payload: Vec<u8>,
}

/// Wire-level outcome of a completed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// The encoded return value
    Value(Vec<u8>),
    /// Successful call with no return value
    Empty,
    /// Uniform error response; the only failure shape clients ever see
    Error(String),
}

/// Per-request failure, converted into [`Response::Error`] at the dispatcher
/// boundary.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Service \"{0}\" not found")]
    UnknownService(String),
    #[error("Procedure \"{procedure}\" not found, in service \"{service}\"")]
    UnknownProcedure { service: String, procedure: String },
    #[error("Procedure {procedure} not available in game scene '{scene}'")]
    WrongScene { procedure: String, scene: GameScene },
    #[error("Argument position {position} out of range in {procedure}")]
    ArgumentPosition { procedure: String, position: u32 },
    #[error("Argument not specified for parameter {parameter} in {procedure}")]
    MissingArgument { procedure: String, parameter: String },
    #[error("Malformed payload for parameter {parameter} in {procedure}: {source}")]
    MalformedArgument {
        procedure: String,
        parameter: String,
        #[source]
        source: CodecError,
    },
    #[error(
        "Incorrect argument type for parameter {parameter} in {procedure}. \
         Expected an argument of type {expected}, got {got}"
    )]
    ArgumentType {
        procedure: String,
        parameter: String,
        expected: String,
        got: String,
    },
    #[error(
        "Invalid value {value} for enumeration {enumeration}, \
         for parameter {parameter} in {procedure}"
    )]
    InvalidEnumerationValue {
        procedure: String,
        parameter: String,
        enumeration: String,
        value: i32,
    },
    #[error("Unknown object handle {handle} for parameter {parameter} in {procedure}")]
    UnknownObjectHandle {
        procedure: String,
        parameter: String,
        handle: u64,
    },
    #[error("Incorrect value returned by {procedure}. Expected a value of type {expected}, got {got}")]
    ReturnType {
        procedure: String,
        expected: String,
        got: String,
    },
    #[error(
        "Incorrect value returned by {procedure}. Expected a non-null value of type {expected}, \
         got null, but the procedure is not marked as nullable"
    )]
    NullReturn { procedure: String, expected: String },
    #[error("Error in {procedure}: {message}")]
    Execution { procedure: String, message: String },
    #[error("Failed to encode return value of {procedure}: {source}")]
    Encode {
        procedure: String,
        #[source]
        source: CodecError,
    },
}

/// Outcome of one dispatch step.
pub enum CallResult {
    Completed(Response),
    /// The procedure suspended; run the continuation again on a later tick.
    /// No response goes out until it completes.
    Pending(CallContinuation),
}

/// A suspended call, carrying everything needed to finish the response once
/// the underlying continuation completes.
pub struct CallContinuation {
    procedure: String,
    return_type: Option<WireType>,
    return_nullable: bool,
    continuation: Continuation<Option<Value>>,
}

impl CallContinuation {
    /// Fully qualified name of the suspended procedure.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Advances the suspended call by exactly one step.
    pub fn run(self) -> CallResult {
        let Self {
            procedure,
            return_type,
            return_nullable,
            continuation,
        } = self;
        match continuation.run() {
            Ok(Step::Done(value)) => CallResult::Completed(finish(
                &procedure,
                return_type.as_ref(),
                return_nullable,
                value,
            )),
            Ok(Step::Yield(next)) => CallResult::Pending(Self {
                procedure,
                return_type,
                return_nullable,
                continuation: next,
            }),
            Err(e) => CallResult::Completed(Response::Error(
                RpcError::Execution {
                    procedure,
                    message: e.to_string(),
                }
                .to_string(),
            )),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    context: Arc<CallContext>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, context: Arc<CallContext>) -> Self {
        Self { registry, context }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<CallContext> {
        &self.context
    }

    /// Resolves and invokes one procedure call. Never panics or propagates:
    /// all failures come back as [`Response::Error`].
    pub fn handle_call(&self, call: &ProcedureCall) -> CallResult {
        match self.dispatch(call) {
            Ok(result) => result,
            Err(e) => {
                debug!("{}.{}: {}", call.service, call.procedure, e);
                CallResult::Completed(Response::Error(e.to_string()))
            }
        }
    }

    fn dispatch(&self, call: &ProcedureCall) -> Result<CallResult, RpcError> {
        let service = self
            .registry
            .service(&call.service)
            .ok_or_else(|| RpcError::UnknownService(call.service.clone()))?;
        let procedure = service.procedures.get(&call.procedure).ok_or_else(|| {
            RpcError::UnknownProcedure {
                service: call.service.clone(),
                procedure: call.procedure.clone(),
            }
        })?;
        let fq = procedure.fully_qualified();

        let scene = self.context.scene();
        if !procedure.scene.contains(scene) {
            return Err(RpcError::WrongScene {
                procedure: fq,
                scene,
            });
        }

        let arguments = self.decode_arguments(procedure, &call.arguments)?;

        trace!("invoking {}", fq);
        let step = (procedure.handler)(&self.context, arguments).map_err(|e| {
            RpcError::Execution {
                procedure: fq.clone(),
                message: e.to_string(),
            }
        })?;

        Ok(match step {
            Step::Done(value) => CallResult::Completed(finish(
                &fq,
                procedure.return_type.as_ref(),
                procedure.return_nullable,
                value,
            )),
            Step::Yield(continuation) => CallResult::Pending(CallContinuation {
                procedure: fq,
                return_type: procedure.return_type.clone(),
                return_nullable: procedure.return_nullable,
                continuation,
            }),
        })
    }

    /// Decodes the full argument vector before anything is invoked. A missing
    /// argument takes the parameter's default; a malformed or mistyped
    /// payload fails the whole call.
    fn decode_arguments(
        &self,
        procedure: &ProcedureDescriptor,
        arguments: &[Argument],
    ) -> Result<Vec<Value>, RpcError> {
        let fq = procedure.fully_qualified();
        let mut supplied: Vec<Option<&[u8]>> = vec![None; procedure.parameters.len()];
        for argument in arguments {
            let slot = supplied
                .get_mut(argument.position as usize)
                .ok_or_else(|| RpcError::ArgumentPosition {
                    procedure: fq.clone(),
                    position: argument.position,
                })?;
            *slot = Some(&argument.payload);
        }

        let mut values = Vec::with_capacity(procedure.parameters.len());
        for (parameter, payload) in procedure.parameters.iter().zip(supplied) {
            let value = match payload {
                None => parameter
                    .default_value()
                    .cloned()
                    .ok_or_else(|| RpcError::MissingArgument {
                        procedure: fq.clone(),
                        parameter: parameter.name.clone(),
                    })?,
                Some(payload) => {
                    let value =
                        codec::decode(payload).map_err(|source| RpcError::MalformedArgument {
                            procedure: fq.clone(),
                            parameter: parameter.name.clone(),
                            source,
                        })?;
                    if !parameter.ty.accepts(&value) {
                        return Err(RpcError::ArgumentType {
                            procedure: fq,
                            parameter: parameter.name.clone(),
                            expected: parameter.ty.full_name(),
                            got: value.type_name().to_string(),
                        });
                    }
                    self.check_refs(&value, &parameter.ty, &parameter.name, &fq)?;
                    value
                }
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Walks a decoded value checking the semantics the wire representation
    /// cannot express: enumeration raw values must name a member, and object
    /// handles must be live in the store (0, the null object, always is).
    fn check_refs(
        &self,
        value: &Value,
        ty: &WireType,
        parameter: &str,
        procedure: &str,
    ) -> Result<(), RpcError> {
        match (ty, value) {
            (WireType::Enumeration(r), Value::Enumeration(raw)) => {
                // Registered enumerations are validated at build time
                let Some(enumeration) = self.registry.enumeration(r) else {
                    return Ok(());
                };
                if !enumeration.contains_value(*raw) {
                    return Err(RpcError::InvalidEnumerationValue {
                        procedure: procedure.to_string(),
                        parameter: parameter.to_string(),
                        enumeration: r.qualified(),
                        value: *raw,
                    });
                }
                Ok(())
            }
            (WireType::Class(_), Value::Object(handle)) => {
                if !self.context.objects().contains(*handle) {
                    return Err(RpcError::UnknownObjectHandle {
                        procedure: procedure.to_string(),
                        parameter: parameter.to_string(),
                        handle: *handle,
                    });
                }
                Ok(())
            }
            (WireType::List(t), Value::List(vs)) | (WireType::Set(t), Value::Set(vs)) => {
                for v in vs {
                    self.check_refs(v, t, parameter, procedure)?;
                }
                Ok(())
            }
            (WireType::Dictionary(k, v), Value::Dictionary(pairs)) => {
                for (key, value) in pairs {
                    self.check_refs(key, k, parameter, procedure)?;
                    self.check_refs(value, v, parameter, procedure)?;
                }
                Ok(())
            }
            (WireType::Tuple(ts), Value::Tuple(vs)) => {
                for (t, v) in ts.iter().zip(vs) {
                    self.check_refs(v, t, parameter, procedure)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Turns a completed handler value into the wire response, enforcing the
/// declared return type and the nullability rule.
fn finish(
    procedure: &str,
    return_type: Option<&WireType>,
    return_nullable: bool,
    value: Option<Value>,
) -> Response {
    match finish_value(procedure, return_type, return_nullable, value) {
        Ok(response) => response,
        Err(e) => {
            debug!("{}", e);
            Response::Error(e.to_string())
        }
    }
}

fn finish_value(
    procedure: &str,
    return_type: Option<&WireType>,
    return_nullable: bool,
    value: Option<Value>,
) -> Result<Response, RpcError> {
    let Some(ty) = return_type else {
        return Ok(Response::Empty);
    };
    let value = match value {
        Some(value) => value,
        // A handler that produced nothing returned null; only class types
        // can be null on the wire
        None if matches!(ty, WireType::Class(_)) => Value::Object(0),
        None => {
            return Err(RpcError::ReturnType {
                procedure: procedure.to_string(),
                expected: ty.full_name(),
                got: "null".to_string(),
            });
        }
    };
    if value.is_null_object() && matches!(ty, WireType::Class(_)) && !return_nullable {
        return Err(RpcError::NullReturn {
            procedure: procedure.to_string(),
            expected: ty.full_name(),
        });
    }
    if !ty.accepts(&value) {
        return Err(RpcError::ReturnType {
            procedure: procedure.to_string(),
            expected: ty.full_name(),
            got: value.type_name().to_string(),
        });
    }
    let payload = codec::encode(&value).map_err(|source| RpcError::Encode {
        procedure: procedure.to_string(),
        source,
    })?;
    Ok(Response::Value(payload))
}
