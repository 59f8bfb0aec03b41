//! Built-in predicates.
//!
//! These implement the matching vocabulary that is not compiled into the
//! matcher's indexes: header, query, cookie, source address, traffic
//! splitting, constants, and JWT payload claims.

use super::{Predicate, PredicateSpec};
use crate::eskip::args::{expect_count, expect_number, expect_pattern, expect_string, invalid_args};
use crate::eskip::ArgValue;
use crate::models::error::ConfigError;
use crate::models::exchange::GatewayRequest;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;
use regex::Regex;
use std::net::IpAddr;
use std::sync::Arc;

/// All built-in predicate specs.
pub fn specs() -> Vec<Arc<dyn PredicateSpec>> {
    vec![
        Arc::new(TrueSpec),
        Arc::new(FalseSpec),
        Arc::new(HeaderSpec),
        Arc::new(HeaderRegexpSpec),
        Arc::new(QueryParamSpec),
        Arc::new(CookieSpec),
        Arc::new(SourceSpec { from_last: false }),
        Arc::new(SourceSpec { from_last: true }),
        Arc::new(TrafficSpec),
        Arc::new(JwtPayloadSpec { require_all: false }),
        Arc::new(JwtPayloadSpec { require_all: true }),
    ]
}

struct TruePredicate;

impl Predicate for TruePredicate {
    fn matches(&self, _req: &GatewayRequest) -> bool {
        true
    }
}

struct TrueSpec;

impl PredicateSpec for TrueSpec {
    fn name(&self) -> &'static str {
        "True"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        expect_count(self.name(), args, 0)?;
        Ok(Arc::new(TruePredicate))
    }
}

struct FalsePredicate;

impl Predicate for FalsePredicate {
    fn matches(&self, _req: &GatewayRequest) -> bool {
        false
    }
}

struct FalseSpec;

impl PredicateSpec for FalseSpec {
    fn name(&self) -> &'static str {
        "False"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        expect_count(self.name(), args, 0)?;
        Ok(Arc::new(FalsePredicate))
    }
}

/// `Header("X-Name", "value")`: the header is present with exactly this
/// value among its values.
struct HeaderPredicate {
    name: String,
    value: String,
}

impl Predicate for HeaderPredicate {
    fn matches(&self, req: &GatewayRequest) -> bool {
        req.headers
            .get_all(self.name.as_str())
            .any(|v| v.to_str().map(|s| s == self.value).unwrap_or(false))
    }
}

struct HeaderSpec;

impl PredicateSpec for HeaderSpec {
    fn name(&self) -> &'static str {
        "Header"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        expect_count(self.name(), args, 2)?;
        Ok(Arc::new(HeaderPredicate {
            name: expect_string(self.name(), args, 0)?.to_lowercase(),
            value: expect_string(self.name(), args, 1)?.to_string(),
        }))
    }
}

/// `HeaderRegexp("X-Name", /pattern/)`: some value of the header matches.
struct HeaderRegexpPredicate {
    name: String,
    pattern: Regex,
}

impl Predicate for HeaderRegexpPredicate {
    fn matches(&self, req: &GatewayRequest) -> bool {
        req.headers
            .get_all(self.name.as_str())
            .any(|v| v.to_str().map(|s| self.pattern.is_match(s)).unwrap_or(false))
    }
}

struct HeaderRegexpSpec;

impl PredicateSpec for HeaderRegexpSpec {
    fn name(&self) -> &'static str {
        "HeaderRegexp"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        expect_count(self.name(), args, 2)?;
        Ok(Arc::new(HeaderRegexpPredicate {
            name: expect_string(self.name(), args, 0)?.to_lowercase(),
            pattern: expect_pattern(self.name(), args, 1)?,
        }))
    }
}

/// `QueryParam("name")` or `QueryParam("name", /pattern/)`.
struct QueryParamPredicate {
    name: String,
    pattern: Option<Regex>,
}

impl Predicate for QueryParamPredicate {
    fn matches(&self, req: &GatewayRequest) -> bool {
        match (req.query_param(&self.name), &self.pattern) {
            (Some(value), Some(pattern)) => pattern.is_match(&value),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

struct QueryParamSpec;

impl PredicateSpec for QueryParamSpec {
    fn name(&self) -> &'static str {
        "QueryParam"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        let pattern = match args.len() {
            1 => None,
            2 => Some(expect_pattern(self.name(), args, 1)?),
            n => {
                return Err(invalid_args(
                    self.name(),
                    format!("expected 1 or 2 arguments, got {}", n),
                ))
            }
        };
        Ok(Arc::new(QueryParamPredicate {
            name: expect_string(self.name(), args, 0)?.to_string(),
            pattern,
        }))
    }
}

/// `Cookie("name", /pattern/)`: the cookie exists and its value matches.
struct CookiePredicate {
    name: String,
    pattern: Regex,
}

impl Predicate for CookiePredicate {
    fn matches(&self, req: &GatewayRequest) -> bool {
        req.cookie(&self.name)
            .map(|v| self.pattern.is_match(&v))
            .unwrap_or(false)
    }
}

struct CookieSpec;

impl PredicateSpec for CookieSpec {
    fn name(&self) -> &'static str {
        "Cookie"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        expect_count(self.name(), args, 2)?;
        Ok(Arc::new(CookiePredicate {
            name: expect_string(self.name(), args, 0)?.to_string(),
            pattern: expect_pattern(self.name(), args, 1)?,
        }))
    }
}

/// An IPv4 or IPv6 network in CIDR notation. A bare address is a full-length
/// prefix.
#[derive(Debug, Clone)]
pub(crate) struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub(crate) fn parse(s: &str) -> Result<Self, String> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| format!("invalid address: {}", s))?;
        let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix_part {
            Some(p) => p.parse().map_err(|_| format!("invalid prefix: {}", s))?,
            None => max_prefix,
        };
        if prefix > max_prefix {
            return Err(format!("prefix out of range: {}", s));
        }
        Ok(Self { addr, prefix })
    }

    pub(crate) fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                if self.prefix == 0 {
                    return true;
                }
                let mask = u32::MAX << (32 - self.prefix as u32);
                (u32::from(net) & mask) == (u32::from(addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                if self.prefix == 0 {
                    return true;
                }
                let mask = u128::MAX << (128 - self.prefix as u32);
                (u128::from(net) & mask) == (u128::from(addr) & mask)
            }
            _ => false,
        }
    }
}

/// `Source("10.0.0.0/8", ...)`: the client address is inside one of the
/// networks. `SourceFromLast` walks `X-Forwarded-For` right to left instead,
/// trusting the entry appended by the nearest proxy.
struct SourcePredicate {
    networks: Vec<Cidr>,
    from_last: bool,
}

impl Predicate for SourcePredicate {
    fn matches(&self, req: &GatewayRequest) -> bool {
        let ip = if self.from_last {
            req.source_ip_from_last()
        } else {
            req.source_ip()
        };
        match ip {
            Some(ip) => self.networks.iter().any(|n| n.contains(ip)),
            None => false,
        }
    }
}

struct SourceSpec {
    from_last: bool,
}

impl PredicateSpec for SourceSpec {
    fn name(&self) -> &'static str {
        if self.from_last {
            "SourceFromLast"
        } else {
            "Source"
        }
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        if args.is_empty() {
            return Err(invalid_args(self.name(), "expected at least one network"));
        }
        let mut networks = Vec::with_capacity(args.len());
        for i in 0..args.len() {
            let raw = expect_string(self.name(), args, i)?;
            networks.push(Cidr::parse(raw).map_err(|e| invalid_args(self.name(), e))?);
        }
        Ok(Arc::new(SourcePredicate {
            networks,
            from_last: self.from_last,
        }))
    }
}

/// `Traffic(0.25)` or `Traffic(0.25, "group-cookie", "A")`.
///
/// The plain form matches the configured fraction of requests at random. The
/// three-argument form is deterministic for clients that carry the group
/// cookie: it matches iff the cookie value equals the group, and only falls
/// back to the random draw for requests without the cookie.
struct TrafficPredicate {
    fraction: f64,
    cookie: Option<(String, String)>,
}

impl Predicate for TrafficPredicate {
    fn matches(&self, req: &GatewayRequest) -> bool {
        if let Some((name, group)) = &self.cookie {
            if let Some(value) = req.cookie(name) {
                return value == *group;
            }
        }
        rand::thread_rng().gen::<f64>() < self.fraction
    }
}

struct TrafficSpec;

impl PredicateSpec for TrafficSpec {
    fn name(&self) -> &'static str {
        "Traffic"
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        let fraction = expect_number(self.name(), args, 0)?;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(invalid_args(self.name(), "fraction must be within [0, 1]"));
        }
        let cookie = match args.len() {
            1 => None,
            3 => Some((
                expect_string(self.name(), args, 1)?.to_string(),
                expect_string(self.name(), args, 2)?.to_string(),
            )),
            n => {
                return Err(invalid_args(
                    self.name(),
                    format!("expected 1 or 3 arguments, got {}", n),
                ))
            }
        };
        Ok(Arc::new(TrafficPredicate { fraction, cookie }))
    }
}

/// Decodes the payload of a bearer token without verifying its signature.
fn bearer_claims(req: &GatewayRequest) -> Option<serde_json::Value> {
    let auth = req.header("authorization")?;
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?;
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn claim_equals(claims: &serde_json::Value, key: &str, expected: &str) -> bool {
    match claims.get(key) {
        Some(serde_json::Value::String(s)) => s == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

/// `JWTPayloadAnyKV("k1", "v1", "k2", "v2")` matches when any claim pair
/// holds; `JWTPayloadAllKV` requires all of them. The token payload is
/// decoded without signature verification.
struct JwtPayloadPredicate {
    pairs: Vec<(String, String)>,
    require_all: bool,
}

impl Predicate for JwtPayloadPredicate {
    fn matches(&self, req: &GatewayRequest) -> bool {
        let Some(claims) = bearer_claims(req) else {
            return false;
        };
        if self.require_all {
            self.pairs.iter().all(|(k, v)| claim_equals(&claims, k, v))
        } else {
            self.pairs.iter().any(|(k, v)| claim_equals(&claims, k, v))
        }
    }
}

struct JwtPayloadSpec {
    require_all: bool,
}

impl PredicateSpec for JwtPayloadSpec {
    fn name(&self) -> &'static str {
        if self.require_all {
            "JWTPayloadAllKV"
        } else {
            "JWTPayloadAnyKV"
        }
    }

    fn create(&self, args: &[ArgValue]) -> Result<Arc<dyn Predicate>, ConfigError> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(invalid_args(
                self.name(),
                "expected an even, non-zero number of key/value arguments",
            ));
        }
        let mut pairs = Vec::with_capacity(args.len() / 2);
        for i in (0..args.len()).step_by(2) {
            pairs.push((
                expect_string(self.name(), args, i)?.to_string(),
                expect_string(self.name(), args, i + 1)?.to_string(),
            ));
        }
        Ok(Arc::new(JwtPayloadPredicate {
            pairs,
            require_all: self.require_all,
        }))
    }
}
