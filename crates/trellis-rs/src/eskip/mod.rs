//! The route definition grammar.
//!
//! Routes are written in a small textual language, one rule per route:
//!
//! ```text
//! catalog: Path("/api/products/:id") && Method("GET")
//!   -> setRequestHeader("X-Tier", "internal")
//!   -> "http://products:8080";
//!
//! probe: Method("OPTIONS") -> status(204) -> <shunt>;
//! ```
//!
//! A route is `id: predicates -> filters -> backend;`. Predicates are joined
//! with `&&`, or `*` for match-all. Filters are chained with `->`. The
//! backend is a quoted URL, one of the variants `<shunt>`, `<loopback>`,
//! `<dynamic>`, or a load-balanced set such as
//! `<roundRobin, "http://a", "http://b">`. Argument literals are
//! double-quoted strings, `/regex/` literals, numbers, and booleans.
//!
//! Parsing produces plain definition values ([`RouteDef`]); nothing here
//! instantiates predicates or filters. [`print`] renders definitions back to
//! text, and `parse(print(parse(s)))` equals `parse(s)` modulo whitespace.

pub mod args;
mod lexer;
mod parser;
mod printer;

pub use parser::{parse, parse_filters, parse_one, parse_predicates};
pub use printer::{print, print_route};

/// Parse error with the byte offset where scanning stopped.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("parse error at offset {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

/// One literal argument of a predicate or filter.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Regex(String),
    Number(f64),
    Bool(bool),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// String content of either a string or a regex literal. Predicates that
    /// take patterns accept both forms.
    pub fn as_pattern(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Regex(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Regex(_) => "regex",
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
        }
    }
}

/// A named predicate or filter reference with its literal arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedArgsDef {
    pub name: String,
    pub args: Vec<ArgValue>,
}

impl NamedArgsDef {
    pub fn new(name: impl Into<String>, args: Vec<ArgValue>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Backend form of a route definition.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendDef {
    Network(String),
    Shunt,
    Loopback,
    Dynamic,
    LoadBalanced {
        algorithm: String,
        endpoints: Vec<String>,
    },
}

/// One parsed route definition. This is the unit data clients deliver and
/// the table manager validates into a [`Route`](crate::models::route::Route).
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDef {
    pub id: String,
    pub predicates: Vec<NamedArgsDef>,
    pub filters: Vec<NamedArgsDef>,
    pub backend: BackendDef,
}
