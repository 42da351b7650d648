//! Service registration and scanning
//!
//! The host integration layer declares its services here once at startup.
//! `build` validates every member shape (identifiers, types, duplicates,
//! documentation crefs), rewrites properties and class members into plain
//! procedures, binds a uniform invocation wrapper to each one and freezes the
//! result into the immutable [`Registry`]. All validation fails fast at build
//! time; nothing is checked per-request.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::bail;
use log::*;

use crate::context::CallContext;
use crate::continuation::Step;
use crate::objects::Instance;
use crate::scene::SceneMask;
use crate::value::Value;

use super::docs::{self, ClassScope, Scope, ServiceScope};
use super::types::{TypeRef, WireType};
use super::{
    ClassDescriptor, DefaultSource, EnumerationDescriptor, EnumerationValueDescriptor, Handler,
    ParameterDescriptor, ProcedureDescriptor, Registry, ServiceDescriptor, ServiceError,
};

/// Handler for class-bound members: receives the resolved `this` instance
/// (`None` for a null handle) ahead of the remaining arguments.
pub type MethodHandler = Arc<
    dyn Fn(&CallContext, Option<Instance>, Vec<Value>) -> anyhow::Result<Step<Option<Value>>>
        + Send
        + Sync,
>;

struct ParameterDef {
    name: String,
    ty: WireType,
    default: Option<DefaultSource>,
}

/// A plain service procedure.
pub struct ProcedureDef {
    name: String,
    documentation: String,
    scene: Option<SceneMask>,
    parameters: Vec<ParameterDef>,
    return_type: Option<WireType>,
    return_nullable: bool,
    handler: Handler,
}

impl ProcedureDef {
    pub fn new(
        name: &str,
        handler: impl Fn(&CallContext, Vec<Value>) -> anyhow::Result<Step<Option<Value>>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            documentation: String::new(),
            scene: None,
            parameters: Vec::new(),
            return_type: None,
            return_nullable: false,
            handler: Arc::new(handler),
        }
    }

    pub fn documentation(mut self, doc: &str) -> Self {
        self.documentation = doc.to_string();
        self
    }

    /// Overrides the scene mask inherited from the owning service.
    pub fn scene(mut self, mask: SceneMask) -> Self {
        self.scene = Some(mask);
        self
    }

    pub fn parameter(mut self, name: &str, ty: WireType) -> Self {
        self.parameters.push(ParameterDef {
            name: name.to_string(),
            ty,
            default: None,
        });
        self
    }

    pub fn parameter_with_default(mut self, name: &str, ty: WireType, default: Value) -> Self {
        self.parameters.push(ParameterDef {
            name: name.to_string(),
            ty,
            default: Some(DefaultSource::Value(default)),
        });
        self
    }

    /// Declares a default that cannot be written as a plain constant
    /// (collections, tuples, objects); the factory runs on first use.
    pub fn parameter_with_factory(
        mut self,
        name: &str,
        ty: WireType,
        factory: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.to_string(),
            ty,
            default: Some(DefaultSource::Factory(Box::new(factory))),
        });
        self
    }

    pub fn returns(mut self, ty: WireType) -> Self {
        self.return_type = Some(ty);
        self
    }

    /// Like [`Self::returns`], but a null object return is permitted.
    pub fn returns_nullable(mut self, ty: WireType) -> Self {
        self.return_type = Some(ty);
        self.return_nullable = true;
        self
    }
}

/// A service-level read/write property. Rewritten into `get_`/`set_`
/// procedures by the scanner.
pub struct PropertyDef {
    name: String,
    ty: WireType,
    documentation: String,
    scene: Option<SceneMask>,
    getter: Option<Handler>,
    setter: Option<Handler>,
}

impl PropertyDef {
    pub fn new(name: &str, ty: WireType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            documentation: String::new(),
            scene: None,
            getter: None,
            setter: None,
        }
    }

    pub fn documentation(mut self, doc: &str) -> Self {
        self.documentation = doc.to_string();
        self
    }

    pub fn scene(mut self, mask: SceneMask) -> Self {
        self.scene = Some(mask);
        self
    }

    pub fn getter(
        mut self,
        f: impl Fn(&CallContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.getter = Some(Arc::new(move |ctx, _args| Ok(Step::Done(Some(f(ctx)?)))));
        self
    }

    pub fn setter(
        mut self,
        f: impl Fn(&CallContext, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.setter = Some(Arc::new(move |ctx, args| {
            let Some(value) = args.into_iter().next() else {
                bail!("property setter called without a value");
            };
            f(ctx, value)?;
            Ok(Step::Done(None))
        }));
        self
    }
}

/// A read/write property on a class. Rewritten into `<Class>_get_` /
/// `<Class>_set_` procedures with a leading `this` parameter.
pub struct ClassPropertyDef {
    name: String,
    ty: WireType,
    documentation: String,
    scene: Option<SceneMask>,
    getter: Option<MethodHandler>,
    setter: Option<MethodHandler>,
}

impl ClassPropertyDef {
    pub fn new(name: &str, ty: WireType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            documentation: String::new(),
            scene: None,
            getter: None,
            setter: None,
        }
    }

    pub fn documentation(mut self, doc: &str) -> Self {
        self.documentation = doc.to_string();
        self
    }

    pub fn scene(mut self, mask: SceneMask) -> Self {
        self.scene = Some(mask);
        self
    }

    pub fn getter(
        mut self,
        f: impl Fn(&CallContext, Option<Instance>) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.getter = Some(Arc::new(move |ctx, this, _args| {
            Ok(Step::Done(Some(f(ctx, this)?)))
        }));
        self
    }

    pub fn setter(
        mut self,
        f: impl Fn(&CallContext, Option<Instance>, Value) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.setter = Some(Arc::new(move |ctx, this, args| {
            let Some(value) = args.into_iter().next() else {
                bail!("property setter called without a value");
            };
            f(ctx, this, value)?;
            Ok(Step::Done(None))
        }));
        self
    }
}

enum MethodKind {
    Instance(MethodHandler),
    Static(Handler),
}

/// A method on a class. Instance methods gain an implicit leading `this`
/// parameter of the class's handle type; static methods do not.
pub struct MethodDef {
    name: String,
    documentation: String,
    scene: Option<SceneMask>,
    parameters: Vec<ParameterDef>,
    return_type: Option<WireType>,
    return_nullable: bool,
    kind: MethodKind,
}

impl MethodDef {
    pub fn new(
        name: &str,
        f: impl Fn(&CallContext, Option<Instance>, Vec<Value>) -> anyhow::Result<Step<Option<Value>>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            documentation: String::new(),
            scene: None,
            parameters: Vec::new(),
            return_type: None,
            return_nullable: false,
            kind: MethodKind::Instance(Arc::new(f)),
        }
    }

    pub fn new_static(
        name: &str,
        f: impl Fn(&CallContext, Vec<Value>) -> anyhow::Result<Step<Option<Value>>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            documentation: String::new(),
            scene: None,
            parameters: Vec::new(),
            return_type: None,
            return_nullable: false,
            kind: MethodKind::Static(Arc::new(f)),
        }
    }

    pub fn documentation(mut self, doc: &str) -> Self {
        self.documentation = doc.to_string();
        self
    }

    pub fn scene(mut self, mask: SceneMask) -> Self {
        self.scene = Some(mask);
        self
    }

    pub fn parameter(mut self, name: &str, ty: WireType) -> Self {
        self.parameters.push(ParameterDef {
            name: name.to_string(),
            ty,
            default: None,
        });
        self
    }

    pub fn parameter_with_default(mut self, name: &str, ty: WireType, default: Value) -> Self {
        self.parameters.push(ParameterDef {
            name: name.to_string(),
            ty,
            default: Some(DefaultSource::Value(default)),
        });
        self
    }

    pub fn parameter_with_factory(
        mut self,
        name: &str,
        ty: WireType,
        factory: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.to_string(),
            ty,
            default: Some(DefaultSource::Factory(Box::new(factory))),
        });
        self
    }

    pub fn returns(mut self, ty: WireType) -> Self {
        self.return_type = Some(ty);
        self
    }

    pub fn returns_nullable(mut self, ty: WireType) -> Self {
        self.return_type = Some(ty);
        self.return_nullable = true;
        self
    }
}

/// A named, opaque server-side object type.
pub struct ClassDef {
    name: String,
    documentation: String,
    methods: Vec<MethodDef>,
    properties: Vec<ClassPropertyDef>,
}

impl ClassDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documentation: String::new(),
            methods: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn documentation(mut self, doc: &str) -> Self {
        self.documentation = doc.to_string();
        self
    }

    pub fn method(mut self, def: MethodDef) -> Self {
        self.methods.push(def);
        self
    }

    pub fn property(mut self, def: ClassPropertyDef) -> Self {
        self.properties.push(def);
        self
    }
}

pub struct EnumerationDef {
    name: String,
    documentation: String,
    values: Vec<EnumerationValueDescriptor>,
}

impl EnumerationDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documentation: String::new(),
            values: Vec::new(),
        }
    }

    pub fn documentation(mut self, doc: &str) -> Self {
        self.documentation = doc.to_string();
        self
    }

    pub fn value(mut self, name: &str, value: i32, documentation: &str) -> Self {
        self.values.push(EnumerationValueDescriptor {
            name: name.to_string(),
            value,
            documentation: documentation.to_string(),
        });
        self
    }
}

pub struct ServiceDef {
    name: String,
    documentation: String,
    scene: SceneMask,
    procedures: Vec<ProcedureDef>,
    properties: Vec<PropertyDef>,
    classes: Vec<ClassDef>,
    enumerations: Vec<EnumerationDef>,
}

impl ServiceDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documentation: String::new(),
            scene: SceneMask::ALL,
            procedures: Vec::new(),
            properties: Vec::new(),
            classes: Vec::new(),
            enumerations: Vec::new(),
        }
    }

    pub fn documentation(mut self, doc: &str) -> Self {
        self.documentation = doc.to_string();
        self
    }

    /// The scene mask members inherit unless they override it.
    pub fn scene(mut self, mask: SceneMask) -> Self {
        self.scene = mask;
        self
    }

    pub fn procedure(mut self, def: ProcedureDef) -> Self {
        self.procedures.push(def);
        self
    }

    pub fn property(mut self, def: PropertyDef) -> Self {
        self.properties.push(def);
        self
    }

    pub fn class(mut self, def: ClassDef) -> Self {
        self.classes.push(def);
        self
    }

    pub fn enumeration(mut self, def: EnumerationDef) -> Self {
        self.enumerations.push(def);
        self
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    services: Vec<ServiceDef>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, def: ServiceDef) -> Self {
        self.services.push(def);
        self
    }

    /// Validates and freezes everything into the immutable registry.
    pub fn build(self) -> Result<Registry, ServiceError> {
        let mut drafts = Vec::new();
        let mut seen = BTreeMap::new();
        for def in self.services {
            validate_member_identifier(&def.name)?;
            if seen.insert(def.name.clone(), ()).is_some() {
                return Err(ServiceError::DuplicateService(def.name));
            }
            drafts.push(expand_service(def)?);
        }

        let scope = build_scope(&drafts);
        for draft in &drafts {
            check_service_refs(draft, &scope)?;
        }

        let mut services = BTreeMap::new();
        let mut procedure_count = 0;
        for draft in drafts {
            procedure_count += draft.procedures.len();
            let service = finalize_service(draft, &scope)?;
            services.insert(service.name.clone(), service);
        }
        info!(
            "service registry built: {} services, {} procedures",
            services.len(),
            procedure_count
        );
        Ok(Registry::from_services(services))
    }
}

struct DraftProcedure {
    name: String,
    documentation: String,
    scene: SceneMask,
    parameters: Vec<ParameterDef>,
    return_type: Option<WireType>,
    return_nullable: bool,
    attributes: Vec<String>,
    handler: Handler,
}

struct DraftService {
    name: String,
    documentation: String,
    scene: SceneMask,
    procedures: Vec<DraftProcedure>,
    /// Service property base names, kept for cref resolution
    properties: Vec<String>,
    classes: Vec<(String, String, Vec<String>, Vec<String>)>,
    enumerations: Vec<EnumerationDef>,
}

/// Rewrites a service definition's properties and class members into plain
/// procedures, validating identifiers and type shapes along the way.
fn expand_service(def: ServiceDef) -> Result<DraftService, ServiceError> {
    let service = def.name.clone();
    let mut procedures = Vec::new();
    let mut names = BTreeMap::new();

    let mut add = |draft: DraftProcedure, names: &mut BTreeMap<String, ()>| {
        if names.insert(draft.name.clone(), ()).is_some() {
            return Err(ServiceError::DuplicateProcedure {
                service: service.clone(),
                name: draft.name,
            });
        }
        procedures.push(draft);
        Ok(())
    };

    for proc in def.procedures {
        validate_member_identifier(&proc.name)?;
        let draft = make_procedure(
            &def.name,
            proc.name.clone(),
            proc.documentation,
            proc.scene.unwrap_or(def.scene),
            proc.parameters,
            proc.return_type,
            proc.return_nullable,
            Vec::new(),
            proc.handler,
        )?;
        add(draft, &mut names)?;
    }

    let mut property_names = Vec::new();
    for prop in def.properties {
        validate_member_identifier(&prop.name)?;
        let scene = prop.scene.unwrap_or(def.scene);
        if let Some(getter) = prop.getter {
            let draft = make_procedure(
                &def.name,
                format!("get_{}", prop.name),
                prop.documentation.clone(),
                scene,
                Vec::new(),
                Some(prop.ty.clone()),
                false,
                vec![format!("Property.Get({})", prop.name)],
                getter,
            )?;
            add(draft, &mut names)?;
        }
        if let Some(setter) = prop.setter {
            let draft = make_procedure(
                &def.name,
                format!("set_{}", prop.name),
                prop.documentation.clone(),
                scene,
                vec![ParameterDef {
                    name: "value".to_string(),
                    ty: prop.ty.clone(),
                    default: None,
                }],
                None,
                false,
                vec![format!("Property.Set({})", prop.name)],
                setter,
            )?;
            add(draft, &mut names)?;
        }
        property_names.push(prop.name);
    }

    let mut classes = Vec::new();
    let mut class_names = BTreeMap::new();
    for class in def.classes {
        validate_member_identifier(&class.name)?;
        if class_names.insert(class.name.clone(), ()).is_some() {
            return Err(ServiceError::DuplicateClass {
                service: service.clone(),
                name: class.name,
            });
        }
        let class_ref = TypeRef::new(&def.name, &class.name);
        let this = || ParameterDef {
            name: "this".to_string(),
            ty: WireType::Class(class_ref.clone()),
            default: None,
        };
        let mut method_names = Vec::new();
        let mut class_property_names = Vec::new();

        for method in class.methods {
            validate_member_identifier(&method.name)?;
            let scene = method.scene.unwrap_or(def.scene);
            let draft = match method.kind {
                MethodKind::Instance(f) => {
                    let mut parameters = vec![this()];
                    parameters.extend(method.parameters);
                    make_procedure(
                        &def.name,
                        format!("{}_{}", class.name, method.name),
                        method.documentation,
                        scene,
                        parameters,
                        method.return_type,
                        method.return_nullable,
                        vec![format!(
                            "Class.Method({},{})",
                            class_ref.qualified(),
                            method.name
                        )],
                        bind_instance(f),
                    )?
                }
                MethodKind::Static(handler) => make_procedure(
                    &def.name,
                    format!("{}_static_{}", class.name, method.name),
                    method.documentation,
                    scene,
                    method.parameters,
                    method.return_type,
                    method.return_nullable,
                    vec![format!(
                        "Class.StaticMethod({},{})",
                        class_ref.qualified(),
                        method.name
                    )],
                    handler,
                )?,
            };
            add(draft, &mut names)?;
            method_names.push(method.name);
        }

        for prop in class.properties {
            validate_member_identifier(&prop.name)?;
            let scene = prop.scene.unwrap_or(def.scene);
            if let Some(getter) = prop.getter {
                let draft = make_procedure(
                    &def.name,
                    format!("{}_get_{}", class.name, prop.name),
                    prop.documentation.clone(),
                    scene,
                    vec![this()],
                    Some(prop.ty.clone()),
                    false,
                    vec![format!(
                        "Class.Property.Get({},{})",
                        class_ref.qualified(),
                        prop.name
                    )],
                    bind_instance(getter),
                )?;
                add(draft, &mut names)?;
            }
            if let Some(setter) = prop.setter {
                let draft = make_procedure(
                    &def.name,
                    format!("{}_set_{}", class.name, prop.name),
                    prop.documentation.clone(),
                    scene,
                    vec![
                        this(),
                        ParameterDef {
                            name: "value".to_string(),
                            ty: prop.ty.clone(),
                            default: None,
                        },
                    ],
                    None,
                    false,
                    vec![format!(
                        "Class.Property.Set({},{})",
                        class_ref.qualified(),
                        prop.name
                    )],
                    bind_instance(setter),
                )?;
                add(draft, &mut names)?;
            }
            // Method and property names share the class member namespace for
            // cref resolution
            class_property_names.push(prop.name);
        }

        classes.push((
            class.name,
            class.documentation,
            method_names,
            class_property_names,
        ));
    }

    let mut enum_names = BTreeMap::new();
    for enumeration in &def.enumerations {
        validate_member_identifier(&enumeration.name)?;
        if enum_names.insert(enumeration.name.clone(), ()).is_some() {
            return Err(ServiceError::DuplicateEnumeration {
                service: service.clone(),
                name: enumeration.name.clone(),
            });
        }
        for value in &enumeration.values {
            validate_member_identifier(&value.name)?;
        }
    }

    Ok(DraftService {
        name: def.name,
        documentation: def.documentation,
        scene: def.scene,
        procedures,
        properties: property_names,
        classes,
        enumerations: def.enumerations,
    })
}

/// Builds one draft procedure: validates parameter identifiers and type
/// shapes, then appends the type parameterization attributes client
/// generators need to reconstruct class/enum semantics from wire integers.
#[allow(clippy::too_many_arguments)]
fn make_procedure(
    service: &str,
    name: String,
    documentation: String,
    scene: SceneMask,
    parameters: Vec<ParameterDef>,
    return_type: Option<WireType>,
    return_nullable: bool,
    mut attributes: Vec<String>,
    handler: Handler,
) -> Result<DraftProcedure, ServiceError> {
    let qualified = format!("{}.{}", service, name);
    for (position, param) in parameters.iter().enumerate() {
        validate_parameter_identifier(&param.name)?;
        param.ty.validate().map_err(|source| ServiceError::InvalidType {
            member: format!("parameter {} of {}", param.name, qualified),
            source,
        })?;
        if param.ty.needs_attribute() {
            attributes.push(format!("ParameterType({}).{}", position, param.ty.full_name()));
        }
        if let Some(DefaultSource::Value(default)) = &param.default
            && !param.ty.accepts(default)
        {
            return Err(ServiceError::DefaultValueType {
                procedure: qualified,
                parameter: param.name.clone(),
                expected: param.ty.full_name(),
            });
        }
    }
    if let Some(ty) = &return_type {
        ty.validate().map_err(|source| ServiceError::InvalidType {
            member: format!("return type of {}", qualified),
            source,
        })?;
        if ty.needs_attribute() {
            attributes.push(format!("ReturnType.{}", ty.full_name()));
        }
    }
    Ok(DraftProcedure {
        name,
        documentation,
        scene,
        parameters,
        return_type,
        return_nullable,
        attributes,
        handler,
    })
}

/// Wraps an instance-bound handler into the uniform procedure handler:
/// separates the leading `this` argument and resolves it through the object
/// store before the method body runs.
fn bind_instance(f: MethodHandler) -> Handler {
    Arc::new(move |ctx, mut args| {
        if args.is_empty() {
            bail!("class method called without a this argument");
        }
        let instance = match args.remove(0) {
            Value::Object(handle) => ctx.objects().get_instance(handle)?,
            other => bail!(
                "expected an object handle for this, got {}",
                other.type_name()
            ),
        };
        f(ctx, instance, args)
    })
}

fn build_scope(drafts: &[DraftService]) -> Scope {
    let mut scope = Scope::default();
    for draft in drafts {
        let mut service = ServiceScope::default();
        service
            .procedures
            .extend(draft.procedures.iter().map(|p| p.name.clone()));
        service.properties.extend(draft.properties.iter().cloned());
        for (name, _, methods, properties) in &draft.classes {
            let mut class = ClassScope::default();
            class.methods.extend(methods.iter().cloned());
            class.properties.extend(properties.iter().cloned());
            service.classes.insert(name.clone(), class);
        }
        for enumeration in &draft.enumerations {
            service.enumerations.insert(
                enumeration.name.clone(),
                enumeration.values.iter().map(|v| v.name.clone()).collect(),
            );
        }
        scope.services.insert(draft.name.clone(), service);
    }
    scope
}

/// Every class/enum reference in a signature must name a registered type;
/// cross-service references are allowed.
fn check_service_refs(draft: &DraftService, scope: &Scope) -> Result<(), ServiceError> {
    for proc in &draft.procedures {
        let qualified = format!("{}.{}", draft.name, proc.name);
        for param in &proc.parameters {
            check_type_refs(&param.ty, scope, &qualified)?;
        }
        if let Some(ty) = &proc.return_type {
            check_type_refs(ty, scope, &qualified)?;
        }
    }
    Ok(())
}

fn check_type_refs(ty: &WireType, scope: &Scope, member: &str) -> Result<(), ServiceError> {
    match ty {
        WireType::Class(r) => {
            let known = scope
                .services
                .get(&r.service)
                .is_some_and(|s| s.classes.contains_key(&r.name));
            if !known {
                return Err(ServiceError::UnknownClass {
                    class: r.qualified(),
                    member: member.to_string(),
                });
            }
            Ok(())
        }
        WireType::Enumeration(r) => {
            let known = scope
                .services
                .get(&r.service)
                .is_some_and(|s| s.enumerations.contains_key(&r.name));
            if !known {
                return Err(ServiceError::UnknownEnumeration {
                    enumeration: r.qualified(),
                    member: member.to_string(),
                });
            }
            Ok(())
        }
        WireType::List(t) | WireType::Set(t) => check_type_refs(t, scope, member),
        WireType::Dictionary(k, v) => {
            check_type_refs(k, scope, member)?;
            check_type_refs(v, scope, member)
        }
        WireType::Tuple(ts) => {
            for t in ts {
                check_type_refs(t, scope, member)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn rewrite_docs(doc: String, scope: &Scope, member: &str) -> Result<String, ServiceError> {
    docs::rewrite(&doc, scope).map_err(|message| ServiceError::Documentation {
        member: member.to_string(),
        message,
    })
}

fn finalize_service(draft: DraftService, scope: &Scope) -> Result<ServiceDescriptor, ServiceError> {
    let mut procedures = BTreeMap::new();
    for proc in draft.procedures {
        let qualified = format!("{}.{}", draft.name, proc.name);
        let descriptor = ProcedureDescriptor {
            service: draft.name.clone(),
            name: proc.name.clone(),
            parameters: proc
                .parameters
                .into_iter()
                .map(|p| ParameterDescriptor::new(p.name, p.ty, p.default))
                .collect(),
            return_type: proc.return_type,
            return_nullable: proc.return_nullable,
            documentation: rewrite_docs(proc.documentation, scope, &qualified)?,
            scene: proc.scene,
            attributes: proc.attributes,
            handler: proc.handler,
        };
        procedures.insert(proc.name, descriptor);
    }

    let mut classes = BTreeMap::new();
    for (name, documentation, _, _) in draft.classes {
        let qualified = format!("{}.{}", draft.name, name);
        classes.insert(
            name.clone(),
            ClassDescriptor {
                name,
                documentation: rewrite_docs(documentation, scope, &qualified)?,
            },
        );
    }

    let mut enumerations = BTreeMap::new();
    for def in draft.enumerations {
        let qualified = format!("{}.{}", draft.name, def.name);
        let values = def
            .values
            .into_iter()
            .map(|v| {
                Ok(EnumerationValueDescriptor {
                    name: v.name,
                    value: v.value,
                    documentation: rewrite_docs(v.documentation, scope, &qualified)?,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;
        enumerations.insert(
            def.name.clone(),
            EnumerationDescriptor {
                name: def.name,
                documentation: rewrite_docs(def.documentation, scope, &qualified)?,
                values,
            },
        );
    }

    Ok(ServiceDescriptor {
        documentation: rewrite_docs(draft.documentation, scope, &draft.name)?,
        name: draft.name,
        scene: draft.scene,
        procedures,
        classes,
        enumerations,
    })
}

/// Service, procedure, property, class, method and enumeration identifiers:
/// a leading uppercase letter followed by letters and digits.
fn validate_member_identifier(name: &str) -> Result<(), ServiceError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidIdentifier(name.to_string()))
    }
}

/// Parameter names additionally allow a leading lowercase letter (`x`,
/// `this`, `value`).
fn validate_parameter_identifier(name: &str) -> Result<(), ServiceError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{TestEnum, build_test_registry};

    #[test]
    fn scans_test_service() {
        let fixture = build_test_registry();
        let registry = fixture.registry;
        let service = registry.service("TestService").unwrap();
        assert!(!service.documentation.is_empty());
        assert_eq!(service.classes.len(), 1);
        assert_eq!(service.enumerations.len(), 1);
        assert!(registry.service("TestService2").is_some());
        assert!(registry.service("NoSuchService").is_none());
    }

    #[test]
    fn zero_arg_procedure_descriptor() {
        let registry = build_test_registry().registry;
        let proc = registry
            .procedure("TestService", "ProcedureNoArgsNoReturn")
            .unwrap();
        assert!(proc.parameters.is_empty());
        assert!(proc.return_type.is_none());
        assert_eq!(proc.documentation, "Procedure that does nothing.");
        assert_eq!(proc.fully_qualified(), "TestService.ProcedureNoArgsNoReturn");
    }

    #[test]
    fn properties_become_accessor_procedures() {
        let registry = build_test_registry().registry;
        let getter = registry
            .procedure("TestService", "get_SomeProperty")
            .unwrap();
        assert!(getter.parameters.is_empty());
        assert_eq!(getter.return_type, Some(WireType::String));
        assert_eq!(getter.attributes, vec!["Property.Get(SomeProperty)"]);

        let setter = registry
            .procedure("TestService", "set_SomeProperty")
            .unwrap();
        assert_eq!(setter.parameters.len(), 1);
        assert_eq!(setter.parameters[0].name, "value");
        assert_eq!(setter.parameters[0].ty, WireType::String);
        assert!(setter.return_type.is_none());
        assert_eq!(setter.attributes, vec!["Property.Set(SomeProperty)"]);
    }

    #[test]
    fn class_methods_get_this_parameter_and_attributes() {
        let registry = build_test_registry().registry;
        let proc = registry
            .procedure("TestService", "TestClass_FloatToString")
            .unwrap();
        assert_eq!(proc.parameters.len(), 2);
        assert_eq!(proc.parameters[0].name, "this");
        assert_eq!(
            proc.parameters[0].ty,
            WireType::Class(TypeRef::new("TestService", "TestClass"))
        );
        assert_eq!(proc.parameters[1].name, "x");
        assert_eq!(proc.parameters[1].ty, WireType::Float);
        assert_eq!(proc.return_type, Some(WireType::String));
        assert_eq!(
            proc.attributes,
            vec![
                "Class.Method(TestService.TestClass,FloatToString)",
                "ParameterType(0).Class(TestService.TestClass)",
            ]
        );
    }

    #[test]
    fn class_method_default_is_reported() {
        let registry = build_test_registry().registry;
        let proc = registry
            .procedure("TestService", "TestClass_IntToString")
            .unwrap();
        let param = &proc.parameters[1];
        assert_eq!(param.name, "x");
        assert_eq!(param.ty, WireType::Int32);
        assert_eq!(param.default_value(), Some(&Value::Int32(42)));
    }

    #[test]
    fn class_properties_become_bound_accessors() {
        let registry = build_test_registry().registry;
        let getter = registry
            .procedure("TestService", "TestClass_get_IntProperty")
            .unwrap();
        assert_eq!(getter.parameters.len(), 1);
        assert_eq!(getter.parameters[0].name, "this");
        assert_eq!(getter.return_type, Some(WireType::Int32));
        assert_eq!(
            getter.attributes,
            vec![
                "Class.Property.Get(TestService.TestClass,IntProperty)",
                "ParameterType(0).Class(TestService.TestClass)",
            ]
        );
        let setter = registry
            .procedure("TestService", "TestClass_set_IntProperty")
            .unwrap();
        assert_eq!(setter.parameters.len(), 2);
        assert_eq!(setter.parameters[1].name, "value");
    }

    #[test]
    fn static_methods_have_no_this() {
        let registry = build_test_registry().registry;
        let proc = registry
            .procedure("TestService", "TestClass_static_StaticMethod")
            .unwrap();
        assert_eq!(proc.parameters.len(), 1);
        assert_eq!(proc.parameters[0].name, "a");
        assert_eq!(
            proc.attributes,
            vec!["Class.StaticMethod(TestService.TestClass,StaticMethod)"]
        );
    }

    #[test]
    fn factory_default_is_resolved_lazily() {
        let registry = build_test_registry().registry;
        let proc = registry.procedure("TestService", "TupleDefault").unwrap();
        let param = &proc.parameters[0];
        assert!(param.has_default());
        let expected = Value::Tuple(vec![Value::Int32(1), Value::Bool(false)]);
        assert_eq!(param.default_value(), Some(&expected));
        // Cached: the same resolved value comes back again
        assert_eq!(param.default_value(), Some(&expected));
        assert!(param.is_default(&expected));
        assert!(!param.is_default(&Value::Tuple(vec![Value::Int32(2), Value::Bool(false)])));
    }

    #[test]
    fn enumeration_descriptor_carries_values_and_docs() {
        let registry = build_test_registry().registry;
        let service = registry.service("TestService").unwrap();
        let enumeration = service.enumerations.get("TestEnum").unwrap();
        assert_eq!(enumeration.values.len(), 3);
        assert_eq!(enumeration.values[0].name, "X");
        assert_eq!(enumeration.values[0].value, TestEnum::X as i32);
        assert!(!enumeration.values[0].documentation.is_empty());
        assert!(enumeration.values[1].documentation.is_empty());
        assert!(enumeration.contains_value(2));
        assert!(!enumeration.contains_value(9999));
    }

    #[test]
    fn return_type_attributes() {
        let registry = build_test_registry().registry;
        let proc = registry.procedure("TestService", "CreateTestObject").unwrap();
        assert!(
            proc.attributes
                .contains(&"ReturnType.Class(TestService.TestClass)".to_string())
        );
        let proc = registry.procedure("TestService", "ProcedureEnumArg").unwrap();
        assert!(
            proc.attributes
                .contains(&"ParameterType(0).Enum(TestService.TestEnum)".to_string())
        );
    }

    #[test]
    fn cross_service_class_reference() {
        let registry = build_test_registry().registry;
        let proc = registry
            .procedure("TestService2", "ClassTypeFromOtherServiceAsParameter")
            .unwrap();
        assert_eq!(
            proc.parameters[0].ty,
            WireType::Class(TypeRef::new("TestService", "TestClass"))
        );
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        for name in ["lowercase", "", "9Lives", "With Space", "Dash-ed"] {
            let result = RegistryBuilder::new()
                .service(ServiceDef::new(name))
                .build();
            match result {
                Err(ServiceError::InvalidIdentifier(id)) => assert_eq!(id, name),
                _ => panic!("expected invalid identifier error for {:?}", name),
            }
        }
    }

    #[test]
    fn duplicate_procedures_are_rejected() {
        let noop = |_: &CallContext, _| Ok(Step::Done(None));
        let result = RegistryBuilder::new()
            .service(
                ServiceDef::new("Service")
                    .procedure(ProcedureDef::new("Proc", noop))
                    .procedure(ProcedureDef::new("Proc", noop)),
            )
            .build();
        assert!(matches!(
            result,
            Err(ServiceError::DuplicateProcedure { .. })
        ));
    }

    #[test]
    fn invalid_dictionary_key_is_rejected() {
        let result = RegistryBuilder::new()
            .service(
                ServiceDef::new("Service").procedure(
                    ProcedureDef::new("Proc", |_, _| Ok(Step::Done(None))).parameter(
                        "d",
                        WireType::Dictionary(
                            Box::new(WireType::Float),
                            Box::new(WireType::String),
                        ),
                    ),
                ),
            )
            .build();
        match result {
            Err(ServiceError::InvalidType { member, .. }) => {
                assert_eq!(member, "parameter d of Service.Proc");
            }
            _ => panic!("expected invalid type error"),
        }
    }

    #[test]
    fn unknown_class_reference_is_rejected() {
        let result = RegistryBuilder::new()
            .service(
                ServiceDef::new("Service").procedure(
                    ProcedureDef::new("Proc", |_, _| Ok(Step::Done(None)))
                        .parameter("obj", WireType::Class(TypeRef::new("Service", "Nope"))),
                ),
            )
            .build();
        assert!(matches!(result, Err(ServiceError::UnknownClass { .. })));
    }

    #[test]
    fn mismatched_default_is_rejected() {
        let result = RegistryBuilder::new()
            .service(
                ServiceDef::new("Service").procedure(
                    ProcedureDef::new("Proc", |_, _| Ok(Step::Done(None)))
                        .parameter_with_default("x", WireType::Int32, Value::String("no".into())),
                ),
            )
            .build();
        assert!(matches!(result, Err(ServiceError::DefaultValueType { .. })));
    }

    #[test]
    fn unresolvable_cref_fails_the_build() {
        let result = RegistryBuilder::new()
            .service(
                ServiceDef::new("Service").procedure(
                    ProcedureDef::new("Proc", |_, _| Ok(Step::Done(None)))
                        .documentation("See <see cref=\"M:Service.Missing\"/>."),
                ),
            )
            .build();
        assert!(matches!(result, Err(ServiceError::Documentation { .. })));
    }

    #[test]
    fn docs_are_rewritten_to_service_relative_names() {
        let registry = build_test_registry().registry;
        let proc = registry
            .procedure("TestService", "ProcedureSingleArgReturns")
            .unwrap();
        assert_eq!(
            proc.documentation,
            "Returns the argument. See also <see cref=\"M:TestService.TestClass.FloatToString\"/>."
        );
    }

    #[test]
    fn scene_masks_inherit_and_override() {
        let registry = build_test_registry().registry;
        let inherited = registry
            .procedure("TestService", "ProcedureNoArgsNoReturn")
            .unwrap();
        assert_eq!(inherited.scene, SceneMask::ALL);
        let overridden = registry.procedure("TestService", "OnlyInDebug").unwrap();
        assert_eq!(overridden.scene, SceneMask::DEBUG);
    }
}
