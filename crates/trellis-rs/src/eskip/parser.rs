use super::lexer::{tokenize, Token};
use super::{ArgValue, BackendDef, NamedArgsDef, ParseError, RouteDef};

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
            input_len: input.len(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(self.input_len)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        match self.peek() {
            Some(t) if t == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => Err(self.error(format!(
                "expected {}, found {}",
                expected.describe(),
                t.describe()
            ))),
            None => Err(self.error(format!("expected {}, found end of input", expected.describe()))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            Some(t) => {
                self.pos -= 1;
                Err(self.error(format!("expected identifier, found {}", t.describe())))
            }
            None => Err(self.error("expected identifier, found end of input")),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn parse_routes(&mut self) -> Result<Vec<RouteDef>, ParseError> {
        let mut routes = Vec::new();
        while !self.at_end() {
            routes.push(self.parse_route()?);
        }
        Ok(routes)
    }

    fn parse_route(&mut self) -> Result<RouteDef, ParseError> {
        let id = self.expect_ident()?;
        self.expect(&Token::Colon)?;
        let predicates = self.parse_predicate_chain()?;

        self.expect(&Token::Arrow)?;
        let mut filters = Vec::new();
        let backend = loop {
            // A quoted string or '<' here is the backend; an identifier is
            // the next filter in the chain.
            match self.peek() {
                Some(Token::Str(_)) | Some(Token::Lt) => break self.parse_backend()?,
                Some(Token::Ident(_)) => {
                    filters.push(self.parse_named_args()?);
                    self.expect(&Token::Arrow)?;
                }
                Some(t) => {
                    let msg = format!("expected filter or backend, found {}", t.describe());
                    return Err(self.error(msg));
                }
                None => return Err(self.error("expected filter or backend, found end of input")),
            }
        };
        self.expect(&Token::Semi)?;

        Ok(RouteDef {
            id,
            predicates,
            filters,
            backend,
        })
    }

    fn parse_predicate_chain(&mut self) -> Result<Vec<NamedArgsDef>, ParseError> {
        if self.peek() == Some(&Token::Star) {
            self.pos += 1;
            return Ok(Vec::new());
        }
        let mut predicates = vec![self.parse_named_args()?];
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            predicates.push(self.parse_named_args()?);
        }
        Ok(predicates)
    }

    fn parse_named_args(&mut self) -> Result<NamedArgsDef, ParseError> {
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.parse_arg()?);
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                args.push(self.parse_arg()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(NamedArgsDef { name, args })
    }

    fn parse_arg(&mut self) -> Result<ArgValue, ParseError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(ArgValue::Str(s)),
            Some(Token::Regex(r)) => Ok(ArgValue::Regex(r)),
            Some(Token::Number(n)) => Ok(ArgValue::Number(n)),
            Some(Token::Ident(name)) if name == "true" => Ok(ArgValue::Bool(true)),
            Some(Token::Ident(name)) if name == "false" => Ok(ArgValue::Bool(false)),
            Some(t) => {
                self.pos -= 1;
                Err(self.error(format!("expected argument, found {}", t.describe())))
            }
            None => Err(self.error("expected argument, found end of input")),
        }
    }

    fn parse_backend(&mut self) -> Result<BackendDef, ParseError> {
        match self.advance() {
            Some(Token::Str(url)) => Ok(BackendDef::Network(url)),
            Some(Token::Lt) => {
                let name = self.expect_ident()?;
                let mut endpoints = Vec::new();
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Str(url)) => endpoints.push(url),
                        _ => {
                            return Err(self.error("expected endpoint URL string in backend"));
                        }
                    }
                }
                self.expect(&Token::Gt)?;
                match (name.as_str(), endpoints.is_empty()) {
                    ("shunt", true) => Ok(BackendDef::Shunt),
                    ("loopback", true) => Ok(BackendDef::Loopback),
                    ("dynamic", true) => Ok(BackendDef::Dynamic),
                    ("shunt" | "loopback" | "dynamic", false) => {
                        Err(self.error(format!("<{}> takes no endpoints", name)))
                    }
                    (_, true) => Err(self.error(format!(
                        "load balancer backend <{}> needs at least one endpoint",
                        name
                    ))),
                    (_, false) => Ok(BackendDef::LoadBalanced {
                        algorithm: name,
                        endpoints,
                    }),
                }
            }
            Some(t) => {
                self.pos -= 1;
                Err(self.error(format!("expected backend, found {}", t.describe())))
            }
            None => Err(self.error("expected backend, found end of input")),
        }
    }
}

/// Parses a document of route definitions.
pub fn parse(input: &str) -> Result<Vec<RouteDef>, ParseError> {
    Parser::new(input)?.parse_routes()
}

/// Parses exactly one route definition.
pub fn parse_one(input: &str) -> Result<RouteDef, ParseError> {
    let routes = parse(input)?;
    match routes.len() {
        1 => Ok(routes.into_iter().next().expect("length checked")),
        n => Err(ParseError {
            offset: 0,
            message: format!("expected exactly one route, found {}", n),
        }),
    }
}

/// Parses a bare filter chain such as `f1() -> f2(42)`, as used by the
/// default-filters configuration.
pub fn parse_filters(input: &str) -> Result<Vec<NamedArgsDef>, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut parser = Parser::new(trimmed)?;
    let mut filters = vec![parser.parse_named_args()?];
    while parser.peek() == Some(&Token::Arrow) {
        parser.pos += 1;
        filters.push(parser.parse_named_args()?);
    }
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input after filter chain"));
    }
    Ok(filters)
}

/// Parses a bare predicate chain such as `Host(/example/) && Method("GET")`.
pub fn parse_predicates(input: &str) -> Result<Vec<NamedArgsDef>, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut parser = Parser::new(trimmed)?;
    let predicates = parser.parse_predicate_chain()?;
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input after predicates"));
    }
    Ok(predicates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_route() {
        let def = parse_one(
            r#"catalog: Path("/api/:id") && Method("GET") -> status(200) -> "http://backend:8080";"#,
        )
        .unwrap();
        assert_eq!(def.id, "catalog");
        assert_eq!(def.predicates.len(), 2);
        assert_eq!(def.predicates[0].name, "Path");
        assert_eq!(def.filters.len(), 1);
        assert_eq!(def.filters[0].args, vec![ArgValue::Number(200.0)]);
        assert_eq!(
            def.backend,
            BackendDef::Network("http://backend:8080".into())
        );
    }

    #[test]
    fn parses_match_all_and_backend_variants() {
        let routes = parse(
            r#"
            a: * -> <shunt>;
            b: * -> <loopback>;
            c: * -> <dynamic>;
            d: * -> <roundRobin, "http://a", "http://b">;
            "#,
        )
        .unwrap();
        assert_eq!(routes.len(), 4);
        assert!(routes[0].predicates.is_empty());
        assert_eq!(routes[0].backend, BackendDef::Shunt);
        assert_eq!(routes[1].backend, BackendDef::Loopback);
        assert_eq!(routes[2].backend, BackendDef::Dynamic);
        assert_eq!(
            routes[3].backend,
            BackendDef::LoadBalanced {
                algorithm: "roundRobin".into(),
                endpoints: vec!["http://a".into(), "http://b".into()],
            }
        );
    }

    #[test]
    fn parses_regex_and_bool_args() {
        let def = parse_one(r#"r: Host(/^www[.]example[.]org$/) -> pass(true) -> <shunt>;"#)
            .unwrap();
        assert_eq!(
            def.predicates[0].args,
            vec![ArgValue::Regex("^www[.]example[.]org$".into())]
        );
        assert_eq!(def.filters[0].args, vec![ArgValue::Bool(true)]);
    }

    #[test]
    fn rejects_malformed_routes() {
        assert!(parse("r: -> <shunt>;").is_err());
        assert!(parse("r: * -> ;").is_err());
        assert!(parse(r#"r: * -> "http://a""#).is_err());
        assert!(parse("r: * -> <shunt, \"http://a\">;").is_err());
        assert!(parse("r: * -> <roundRobin>;").is_err());
    }

    #[test]
    fn parses_bare_filter_chains() {
        let filters = parse_filters(r#"setRequestHeader("X", "1") -> status(204)"#).unwrap();
        assert_eq!(filters.len(), 2);
        assert!(parse_filters("f() -> ").is_err());
        assert!(parse_filters("").unwrap().is_empty());
    }

    #[test]
    fn parses_bare_predicate_chains() {
        let predicates = parse_predicates(r#"Method("GET") && Header("X", "1")"#).unwrap();
        assert_eq!(predicates.len(), 2);
        assert!(parse_predicates("*").unwrap().is_empty());
    }
}
