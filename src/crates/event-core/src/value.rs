//! Runtime values carried by event cells.
//!
//! A [`Value`] is the dynamically typed payload of one cell of a table slice.
//! The variants mirror the primitive and composite kinds of the type system.

use crate::time::{Span, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

/// Transport protocol qualifier of a port value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortProtocol {
    Unknown,
    Tcp,
    Udp,
    Icmp,
}

/// An IP network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subnet {
    pub network: IpAddr,
    pub prefix: u8,
}

impl Subnet {
    pub fn new(network: IpAddr, prefix: u8) -> Self {
        Self { network, prefix }
    }

    /// Check whether `addr` falls inside this network.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let prefix = self.prefix.min(32) as u32;
                if prefix == 0 {
                    return true;
                }
                let mask = u32::MAX << (32 - prefix);
                (u32::from(net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let prefix = self.prefix.min(128) as u32;
                if prefix == 0 {
                    return true;
                }
                let mask = u128::MAX << (128 - prefix);
                (u128::from(net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }

    /// Check whether `other` is fully contained in this network.
    pub fn contains_subnet(&self, other: &Subnet) -> bool {
        other.prefix >= self.prefix && self.contains(&other.network)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// A dynamically typed event value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Count(u64),
    Real(f64),
    Span(Span),
    Timestamp(Timestamp),
    Str(String),
    Pattern(String),
    Address(IpAddr),
    Subnet(Subnet),
    Port { number: u16, protocol: PortProtocol },
    Vector(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Short name of the value's kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Count(_) => "count",
            Value::Real(_) => "real",
            Value::Span(_) => "span",
            Value::Timestamp(_) => "timestamp",
            Value::Str(_) => "string",
            Value::Pattern(_) => "pattern",
            Value::Address(_) => "address",
            Value::Subnet(_) => "subnet",
            Value::Port { .. } => "port",
            Value::Vector(_) => "vector",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    /// Compare two values of the same kind.
    ///
    /// Returns `None` when the kinds differ or the kind has no meaningful
    /// order. Reals use a total order so that index range scans behave
    /// deterministically.
    pub fn partial_cmp_same(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Count(a), Value::Count(b)) => Some(a.cmp(b)),
            (Value::Real(a), Value::Real(b)) => Some(a.total_cmp(b)),
            (Value::Span(a), Value::Span(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Address(a), Value::Address(b)) => Some(a.cmp(b)),
            (Value::Port { number: a, .. }, Value::Port { number: b, .. }) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(x) => write!(f, "{}", x),
            Value::Int(x) => write!(f, "{}", x),
            Value::Count(x) => write!(f, "{}", x),
            Value::Real(x) => write!(f, "{}", x),
            Value::Span(x) => write!(f, "{}", x),
            Value::Timestamp(x) => write!(f, "{}", x),
            Value::Str(x) => write!(f, "{:?}", x),
            Value::Pattern(x) => write!(f, "/{}/", x),
            Value::Address(x) => write!(f, "{}", x),
            Value::Subnet(x) => write!(f, "{}", x),
            Value::Port { number, .. } => write!(f, "{}", number),
            Value::Vector(xs) => {
                write!(f, "[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, "]")
            }
            Value::Set(xs) => {
                write!(f, "{{")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, "}}")
            }
            Value::Map(xs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<u64> for Value {
    fn from(x: u64) -> Self {
        Value::Count(x)
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Value::Int(x)
    }
}

impl From<bool> for Value {
    fn from(x: bool) -> Self {
        Value::Bool(x)
    }
}

impl From<IpAddr> for Value {
    fn from(x: IpAddr) -> Self {
        Value::Address(x)
    }
}
