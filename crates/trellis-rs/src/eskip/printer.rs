use super::{ArgValue, BackendDef, NamedArgsDef, RouteDef};
use std::fmt::Write;

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_regex(s: &str) -> String {
    s.replace('/', "\\/")
}

fn format_arg(arg: &ArgValue) -> String {
    match arg {
        ArgValue::Str(s) => format!("\"{}\"", escape_string(s)),
        ArgValue::Regex(r) => format!("/{}/", escape_regex(r)),
        ArgValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        ArgValue::Bool(b) => b.to_string(),
    }
}

fn format_named_args(def: &NamedArgsDef) -> String {
    let args: Vec<String> = def.args.iter().map(format_arg).collect();
    format!("{}({})", def.name, args.join(", "))
}

fn format_backend(backend: &BackendDef) -> String {
    match backend {
        BackendDef::Network(url) => format!("\"{}\"", escape_string(url)),
        BackendDef::Shunt => "<shunt>".to_string(),
        BackendDef::Loopback => "<loopback>".to_string(),
        BackendDef::Dynamic => "<dynamic>".to_string(),
        BackendDef::LoadBalanced {
            algorithm,
            endpoints,
        } => {
            let urls: Vec<String> = endpoints
                .iter()
                .map(|e| format!("\"{}\"", escape_string(e)))
                .collect();
            format!("<{}, {}>", algorithm, urls.join(", "))
        }
    }
}

/// Renders one route definition in canonical form.
pub fn print_route(def: &RouteDef) -> String {
    let predicates = if def.predicates.is_empty() {
        "*".to_string()
    } else {
        def.predicates
            .iter()
            .map(format_named_args)
            .collect::<Vec<_>>()
            .join(" && ")
    };

    let mut out = String::new();
    write!(out, "{}: {}", def.id, predicates).expect("string write cannot fail");
    for filter in &def.filters {
        write!(out, "\n  -> {}", format_named_args(filter)).expect("string write cannot fail");
    }
    write!(out, "\n  -> {};", format_backend(&def.backend)).expect("string write cannot fail");
    out
}

/// Renders a route definition document. The output parses back to the same
/// definitions.
pub fn print(defs: &[RouteDef]) -> String {
    let mut out = String::new();
    for def in defs {
        out.push_str(&print_route(def));
        out.push_str("\n\n");
    }
    out
}
