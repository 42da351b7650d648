//! Documentation cross-reference rewriting
//!
//! Doc comments may embed `cref="KIND:Fully.Qualified.Name"` references in
//! the originating code's namespace. Clients only know service-relative
//! names, so every cref is rewritten to the short form at registry build
//! time: the namespace prefix and any method parameter suffix are dropped,
//! and property (`P:`) and enumeration member (`F:`) references map to `M:`
//! forms. A cref that cannot be resolved against the registered members fails
//! the build.

use std::collections::{BTreeMap, BTreeSet};

/// Name tables the resolver checks crefs against, collected by the builder
/// before descriptors are finalized.
#[derive(Default)]
pub(crate) struct Scope {
    pub services: BTreeMap<String, ServiceScope>,
}

#[derive(Default)]
pub(crate) struct ServiceScope {
    /// Final procedure names, after property/method rewriting
    pub procedures: BTreeSet<String>,
    /// Service property base names
    pub properties: BTreeSet<String>,
    pub classes: BTreeMap<String, ClassScope>,
    pub enumerations: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Default)]
pub(crate) struct ClassScope {
    pub methods: BTreeSet<String>,
    pub properties: BTreeSet<String>,
}

/// Rewrites every `cref="..."` occurrence in a documentation string.
pub(crate) fn rewrite(doc: &str, scope: &Scope) -> Result<String, String> {
    const MARKER: &str = "cref=\"";
    let mut out = String::with_capacity(doc.len());
    let mut rest = doc;
    while let Some(idx) = rest.find(MARKER) {
        let start = idx + MARKER.len();
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('"') else {
            return Err("unterminated cref attribute".to_string());
        };
        out.push_str(&resolve_cref(&rest[start..start + len], scope)?);
        rest = &rest[start + len..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Resolves a single `KIND:Fully.Qualified.Name` reference to its
/// service-relative short form.
pub(crate) fn resolve_cref(cref: &str, scope: &Scope) -> Result<String, String> {
    if cref.len() < 3 || cref.as_bytes()[1] != b':' {
        return Err(format!("invalid cref \"{}\"", cref));
    }
    let code = cref.as_bytes()[0];
    let reference = &cref[2..];
    // Method references carry a parameter signature suffix; drop it
    let reference = reference.split('(').next().unwrap_or(reference);
    let segments: Vec<&str> = reference.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format!("invalid cref \"{}\"", cref));
    }
    match code {
        b'T' => resolve_type(&segments, scope),
        b'M' => resolve_method(cref, &segments, scope),
        b'P' => resolve_property(cref, &segments, scope),
        b'F' => resolve_field(cref, &segments, scope),
        c => Err(format!("invalid code '{}' in cref \"{}\"", c as char, cref)),
    }
}

fn resolve_type(segments: &[&str], scope: &Scope) -> Result<String, String> {
    let name = *segments.last().unwrap();
    if scope.services.contains_key(name) {
        return Ok(format!("T:{}", name));
    }
    let owners: Vec<&String> = scope
        .services
        .iter()
        .filter(|(_, s)| s.classes.contains_key(name) || s.enumerations.contains_key(name))
        .map(|(n, _)| n)
        .collect();
    match owners.as_slice() {
        [service] => Ok(format!("T:{}.{}", service, name)),
        [] => Err(format!(
            "type \"{}\" is not a registered service, class or enumeration",
            name
        )),
        _ => Err(format!("type \"{}\" is ambiguous", name)),
    }
}

fn owner_and_member<'a>(cref: &str, segments: &[&'a str]) -> Result<(&'a str, &'a str), String> {
    if segments.len() < 2 {
        return Err(format!("invalid cref \"{}\"", cref));
    }
    Ok((segments[segments.len() - 2], segments[segments.len() - 1]))
}

fn resolve_method(cref: &str, segments: &[&str], scope: &Scope) -> Result<String, String> {
    let (owner, member) = owner_and_member(cref, segments)?;
    if let Some(service) = scope.services.get(owner)
        && service.procedures.contains(member)
    {
        return Ok(format!("M:{}.{}", owner, member));
    }
    let owners: Vec<&String> = scope
        .services
        .iter()
        .filter(|(_, s)| {
            s.classes
                .get(owner)
                .is_some_and(|c| c.methods.contains(member))
        })
        .map(|(n, _)| n)
        .collect();
    match owners.as_slice() {
        [service] => Ok(format!("M:{}.{}.{}", service, owner, member)),
        [] => Err(format!(
            "\"{}.{}\" is not a registered procedure or class method",
            owner, member
        )),
        _ => Err(format!("method \"{}.{}\" is ambiguous", owner, member)),
    }
}

fn resolve_property(cref: &str, segments: &[&str], scope: &Scope) -> Result<String, String> {
    let (owner, member) = owner_and_member(cref, segments)?;
    if let Some(service) = scope.services.get(owner)
        && service.properties.contains(member)
    {
        return Ok(format!("M:{}.{}", owner, member));
    }
    let owners: Vec<&String> = scope
        .services
        .iter()
        .filter(|(_, s)| {
            s.classes
                .get(owner)
                .is_some_and(|c| c.properties.contains(member))
        })
        .map(|(n, _)| n)
        .collect();
    match owners.as_slice() {
        [service] => Ok(format!("M:{}.{}.{}", service, owner, member)),
        [] => Err(format!("\"{}.{}\" is not a registered property", owner, member)),
        _ => Err(format!("property \"{}.{}\" is ambiguous", owner, member)),
    }
}

fn resolve_field(cref: &str, segments: &[&str], scope: &Scope) -> Result<String, String> {
    let (owner, member) = owner_and_member(cref, segments)?;
    let owners: Vec<&String> = scope
        .services
        .iter()
        .filter(|(_, s)| s.enumerations.get(owner).is_some_and(|e| e.contains(member)))
        .map(|(n, _)| n)
        .collect();
    match owners.as_slice() {
        [service] => Ok(format!("M:{}.{}.{}", service, owner, member)),
        [] => Err(format!(
            "\"{}.{}\" is not a registered enumeration value",
            owner, member
        )),
        _ => Err(format!("enumeration value \"{}.{}\" is ambiguous", owner, member)),
    }
}
