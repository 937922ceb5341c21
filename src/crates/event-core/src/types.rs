//! The structural type system describing event schemas.
//!
//! Types consist of a kind (primitive or composite) and a list of attributes.
//! Two types are equal iff they are structurally identical, attributes
//! included. Record types additionally carry a stable digest derived from
//! their structure, which serves as their on-disk identity.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// A free-form `key` or `key=value` annotation on a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn with_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// The shape of a type, without attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Bool,
    Int,
    Count,
    Real,
    Span,
    Timestamp,
    Str,
    Pattern,
    Address,
    Subnet,
    Port,
    Record(RecordType),
    Vector(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>, Box<Type>),
}

/// A value schema: a kind plus optional attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub attributes: Vec<Attribute>,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            attributes: Vec::new(),
        }
    }

    pub fn bool_() -> Self {
        Self::new(TypeKind::Bool)
    }

    pub fn int() -> Self {
        Self::new(TypeKind::Int)
    }

    pub fn count() -> Self {
        Self::new(TypeKind::Count)
    }

    pub fn real() -> Self {
        Self::new(TypeKind::Real)
    }

    pub fn span() -> Self {
        Self::new(TypeKind::Span)
    }

    pub fn timestamp() -> Self {
        Self::new(TypeKind::Timestamp)
    }

    pub fn string() -> Self {
        Self::new(TypeKind::Str)
    }

    pub fn pattern() -> Self {
        Self::new(TypeKind::Pattern)
    }

    pub fn address() -> Self {
        Self::new(TypeKind::Address)
    }

    pub fn subnet() -> Self {
        Self::new(TypeKind::Subnet)
    }

    pub fn port() -> Self {
        Self::new(TypeKind::Port)
    }

    pub fn vector(elem: Type) -> Self {
        Self::new(TypeKind::Vector(Box::new(elem)))
    }

    pub fn set(elem: Type) -> Self {
        Self::new(TypeKind::Set(Box::new(elem)))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Self::new(TypeKind::Map(Box::new(key), Box::new(value)))
    }

    /// Attach an attribute, builder-style.
    pub fn attr(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Check for the presence of an attribute key.
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.iter().any(|a| a.key == key)
    }

    /// Fields bearing the `skip` attribute never allocate a column index.
    pub fn is_skip(&self) -> bool {
        self.has_attribute("skip")
    }

    /// Check whether `value`'s kind matches this type.
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (&self.kind, value),
            (TypeKind::Bool, Value::Bool(_))
                | (TypeKind::Int, Value::Int(_))
                | (TypeKind::Count, Value::Count(_))
                | (TypeKind::Real, Value::Real(_))
                | (TypeKind::Span, Value::Span(_))
                | (TypeKind::Timestamp, Value::Timestamp(_))
                | (TypeKind::Str, Value::Str(_))
                | (TypeKind::Pattern, Value::Pattern(_))
                | (TypeKind::Address, Value::Address(_))
                | (TypeKind::Subnet, Value::Subnet(_))
                | (TypeKind::Port, Value::Port { .. })
                | (TypeKind::Vector(_), Value::Vector(_))
                | (TypeKind::Set(_), Value::Set(_))
                | (TypeKind::Map(..), Value::Map(_))
        )
    }

    fn render(&self, out: &mut String) {
        match &self.kind {
            TypeKind::Bool => out.push_str("bool"),
            TypeKind::Int => out.push_str("int"),
            TypeKind::Count => out.push_str("count"),
            TypeKind::Real => out.push_str("real"),
            TypeKind::Span => out.push_str("span"),
            TypeKind::Timestamp => out.push_str("timestamp"),
            TypeKind::Str => out.push_str("string"),
            TypeKind::Pattern => out.push_str("pattern"),
            TypeKind::Address => out.push_str("address"),
            TypeKind::Subnet => out.push_str("subnet"),
            TypeKind::Port => out.push_str("port"),
            TypeKind::Record(r) => {
                out.push_str("record{");
                for (i, field) in r.fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&field.name);
                    out.push(':');
                    field.ty.render(out);
                }
                out.push('}');
            }
            TypeKind::Vector(t) => {
                out.push_str("vector<");
                t.render(out);
                out.push('>');
            }
            TypeKind::Set(t) => {
                out.push_str("set<");
                t.render(out);
                out.push('>');
            }
            TypeKind::Map(k, v) => {
                out.push_str("map<");
                k.render(out);
                out.push(',');
                v.render(out);
                out.push('>');
            }
        }
        for attribute in &self.attributes {
            out.push_str(" #");
            out.push_str(&attribute.key);
            if let Some(value) = &attribute.value {
                out.push('=');
                out.push_str(value);
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out);
        write!(f, "{}", out)
    }
}

/// One named, typed field of a record layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub ty: Type,
}

impl RecordField {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A record type describing one event schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<RecordField>,
}

impl RecordType {
    pub fn new(name: impl Into<String>, fields: Vec<RecordField>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Stable content-addressed identifier of this layout.
    ///
    /// Hashes the canonical rendering of the full structure, attributes
    /// included, so that structurally distinct layouts land in distinct
    /// on-disk directories.
    pub fn digest(&self) -> String {
        let mut rendered = String::new();
        rendered.push_str(&self.name);
        rendered.push('=');
        Type::new(TypeKind::Record(self.clone())).render(&mut rendered);
        let mut hasher = XxHash64::default();
        hasher.write(rendered.as_bytes());
        format!("{:016x}", hasher.finish())
    }

    /// Resolve a field reference to its position.
    ///
    /// Accepts the bare field name or the `<layout>.<field>` form.
    pub fn resolve_field(&self, reference: &str) -> Option<usize> {
        self.fields.iter().position(|f| {
            f.name == reference
                || (reference.len() == self.name.len() + 1 + f.name.len()
                    && reference.starts_with(&self.name)
                    && reference.as_bytes()[self.name.len()] == b'.'
                    && reference.ends_with(&f.name))
        })
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_layout() -> RecordType {
        RecordType::new(
            "conn",
            vec![
                RecordField::new("src", Type::address()),
                RecordField::new("dst", Type::address()),
                RecordField::new("bytes", Type::count()),
            ],
        )
    }

    #[test]
    fn digest_is_stable_and_structural() {
        let a = conn_layout();
        let b = conn_layout();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 16);

        // Attributes participate in identity.
        let mut c = conn_layout();
        c.fields[2].ty = Type::count().attr(Attribute::new("skip"));
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn resolve_field_accepts_qualified_names() {
        let layout = conn_layout();
        assert_eq!(layout.resolve_field("src"), Some(0));
        assert_eq!(layout.resolve_field("conn.bytes"), Some(2));
        assert_eq!(layout.resolve_field("conn.nope"), None);
        assert_eq!(layout.resolve_field("other.src"), None);
    }

    #[test]
    fn structural_type_equality_includes_attributes() {
        let plain = Type::timestamp();
        let tagged = Type::timestamp().attr(Attribute::new("timestamp"));
        assert_ne!(plain, tagged);
        assert_eq!(tagged, Type::timestamp().attr(Attribute::new("timestamp")));
    }
}
