use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Str(String),
    Regex(String),
    Number(f64),
    Colon,
    AndAnd,
    Arrow,
    LParen,
    RParen,
    Comma,
    Semi,
    Lt,
    Gt,
    Star,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier {}", name),
            Token::Str(_) => "string literal".to_string(),
            Token::Regex(_) => "regex literal".to_string(),
            Token::Number(_) => "number".to_string(),
            Token::Colon => "':'".to_string(),
            Token::AndAnd => "'&&'".to_string(),
            Token::Arrow => "'->'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Semi => "';'".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::Star => "'*'".to_string(),
        }
    }
}

fn error(offset: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        offset,
        message: message.into(),
    }
}

/// Scans the input into a token stream, each token carrying its byte offset.
pub(crate) fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b':' => {
                tokens.push((Token::Colon, i));
                i += 1;
            }
            b'(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            b')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            b',' => {
                tokens.push((Token::Comma, i));
                i += 1;
            }
            b';' => {
                tokens.push((Token::Semi, i));
                i += 1;
            }
            b'<' => {
                tokens.push((Token::Lt, i));
                i += 1;
            }
            b'>' => {
                tokens.push((Token::Gt, i));
                i += 1;
            }
            b'*' => {
                tokens.push((Token::Star, i));
                i += 1;
            }
            b'&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((Token::AndAnd, i));
                    i += 2;
                } else {
                    return Err(error(i, "expected '&&'"));
                }
            }
            b'-' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    tokens.push((Token::Arrow, i));
                    i += 2;
                } else if bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                    let (token, next) = scan_number(input, i)?;
                    tokens.push((token, i));
                    i = next;
                } else {
                    return Err(error(i, "expected '->' or a number"));
                }
            }
            b'"' => {
                let (token, next) = scan_string(input, i)?;
                tokens.push((token, i));
                i = next;
            }
            b'/' => {
                if bytes.get(i + 1) == Some(&b'/') {
                    // line comment
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                } else {
                    let (token, next) = scan_regex(input, i)?;
                    tokens.push((token, i));
                    i = next;
                }
            }
            _ if b.is_ascii_digit() => {
                let (token, next) = scan_number(input, i)?;
                tokens.push((token, i));
                i = next;
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((Token::Ident(input[start..i].to_string()), start));
            }
            _ => return Err(error(i, format!("unexpected character {:?}", b as char))),
        }
    }

    Ok(tokens)
}

fn scan_string(input: &str, start: usize) -> Result<(Token, usize), ParseError> {
    let bytes = input.as_bytes();
    let mut value = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Ok((Token::Str(value), i + 1)),
            b'\\' => {
                let escaped = bytes
                    .get(i + 1)
                    .ok_or_else(|| error(i, "unterminated escape in string literal"))?;
                match escaped {
                    b'"' => value.push('"'),
                    b'\\' => value.push('\\'),
                    b'n' => value.push('\n'),
                    b't' => value.push('\t'),
                    b'r' => value.push('\r'),
                    other => {
                        value.push('\\');
                        value.push(*other as char);
                    }
                }
                i += 2;
            }
            _ => {
                // Advance over a full UTF-8 code point.
                let ch = input[i..]
                    .chars()
                    .next()
                    .ok_or_else(|| error(i, "invalid UTF-8 in string literal"))?;
                value.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    Err(error(start, "unterminated string literal"))
}

fn scan_regex(input: &str, start: usize) -> Result<(Token, usize), ParseError> {
    let bytes = input.as_bytes();
    let mut value = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'/' => return Ok((Token::Regex(value), i + 1)),
            b'\\' => {
                let escaped = bytes
                    .get(i + 1)
                    .ok_or_else(|| error(i, "unterminated escape in regex literal"))?;
                if *escaped == b'/' {
                    value.push('/');
                } else {
                    value.push('\\');
                    value.push(*escaped as char);
                }
                i += 2;
            }
            _ => {
                let ch = input[i..]
                    .chars()
                    .next()
                    .ok_or_else(|| error(i, "invalid UTF-8 in regex literal"))?;
                value.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    Err(error(start, "unterminated regex literal"))
}

fn scan_number(input: &str, start: usize) -> Result<(Token, usize), ParseError> {
    let bytes = input.as_bytes();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text = &input[start..i];
    let value: f64 = text
        .parse()
        .map_err(|_| error(start, format!("invalid number: {}", text)))?;
    Ok((Token::Number(value), i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_route_shaped_input() {
        let tokens = tokenize(r#"r1: Path("/a") -> <shunt>;"#).unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Ident("r1".into()),
                Token::Colon,
                Token::Ident("Path".into()),
                Token::LParen,
                Token::Str("/a".into()),
                Token::RParen,
                Token::Arrow,
                Token::Lt,
                Token::Ident("shunt".into()),
                Token::Gt,
                Token::Semi,
            ]
        );
    }

    #[test]
    fn scans_literals() {
        let tokens = tokenize(r#"f(/^www\./, -2.5, "a\"b")"#).unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(kinds[2], Token::Regex(r"^www\.".into()));
        assert_eq!(kinds[4], Token::Number(-2.5));
        assert_eq!(kinds[6], Token::Str("a\"b".into()));
    }

    #[test]
    fn regex_slash_escape_is_unescaped() {
        let tokens = tokenize(r"f(/a\/b/)").unwrap();
        assert_eq!(tokens[2].0, Token::Regex("a/b".into()));
    }

    #[test]
    fn line_comments_are_skipped() {
        let tokens = tokenize("// a comment\nr: * -> <shunt>;").unwrap();
        assert_eq!(tokens[0].0, Token::Ident("r".into()));
    }

    #[test]
    fn reports_offsets_for_errors() {
        let err = tokenize(r#"r: Path("/a"#).unwrap_err();
        assert_eq!(err.offset, 8);
        assert!(tokenize("a & b").is_err());
    }
}
