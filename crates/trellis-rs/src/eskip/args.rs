//! Argument validation helpers shared by predicate and filter specs.
//!
//! Specs validate their literal arguments once, at table-build time; runtime
//! execution never re-parses them. These helpers produce the uniform
//! `invalid_args` errors that the table manager counts per reason.

use super::ArgValue;
use crate::models::error::ConfigError;
use regex::Regex;

pub fn invalid_args(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidArgs {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Exactly `count` arguments, no more, no fewer.
pub fn expect_count(name: &str, args: &[ArgValue], count: usize) -> Result<(), ConfigError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(invalid_args(
            name,
            format!("expected {} argument(s), got {}", count, args.len()),
        ))
    }
}

pub fn expect_string<'a>(
    name: &str,
    args: &'a [ArgValue],
    idx: usize,
) -> Result<&'a str, ConfigError> {
    match args.get(idx) {
        Some(ArgValue::Str(s)) => Ok(s),
        Some(other) => Err(invalid_args(
            name,
            format!("argument {} must be a string, got {}", idx, other.type_name()),
        )),
        None => Err(invalid_args(name, format!("missing argument {}", idx))),
    }
}

/// A compiled pattern from either a regex literal or a string argument.
pub fn expect_pattern(name: &str, args: &[ArgValue], idx: usize) -> Result<Regex, ConfigError> {
    let source = match args.get(idx) {
        Some(ArgValue::Regex(r)) | Some(ArgValue::Str(r)) => r,
        Some(other) => {
            return Err(invalid_args(
                name,
                format!(
                    "argument {} must be a pattern, got {}",
                    idx,
                    other.type_name()
                ),
            ))
        }
        None => return Err(invalid_args(name, format!("missing argument {}", idx))),
    };
    Regex::new(source).map_err(|e| invalid_args(name, format!("invalid pattern: {}", e)))
}

pub fn expect_number(name: &str, args: &[ArgValue], idx: usize) -> Result<f64, ConfigError> {
    match args.get(idx) {
        Some(ArgValue::Number(n)) => Ok(*n),
        Some(other) => Err(invalid_args(
            name,
            format!("argument {} must be a number, got {}", idx, other.type_name()),
        )),
        None => Err(invalid_args(name, format!("missing argument {}", idx))),
    }
}
