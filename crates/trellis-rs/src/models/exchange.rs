use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::{Method, StatusCode};
use actix_web::{web::Bytes, HttpRequest, HttpResponse};
use std::net::IpAddr;

use crate::utils::path::{normalize_path, percent_decode};

/// The mutable request view that predicates read and filters transform.
///
/// The proxy engine builds one `GatewayRequest` per incoming exchange from
/// the actix request, with the path already normalized (unreserved
/// percent-escapes decoded, reserved ones such as `%2F` preserved). Filters
/// mutate it in place; the original snapshot stays available through the
/// filter context.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    /// Normalized request path.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer_ip: Option<IpAddr>,
    /// Host of the request, lowercased with any port stripped.
    pub host: String,
    pub scheme: String,
}

impl GatewayRequest {
    /// Builds the internal request view from an actix request plus its
    /// buffered body.
    pub fn from_http(req: &HttpRequest, body: Bytes) -> Self {
        let info = req.connection_info();
        let host = info
            .host()
            .split(':')
            .next()
            .unwrap_or("")
            .to_lowercase();
        let scheme = info.scheme().to_string();
        drop(info);

        Self {
            method: req.method().clone(),
            path: normalize_path(req.path()),
            query: req.query_string().to_string(),
            headers: req.headers().clone(),
            body,
            peer_ip: req.peer_addr().map(|a| a.ip()),
            host,
            scheme,
        }
    }

    /// First value of the named header as a string, if present and valid
    /// UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets a header, replacing any existing values. Invalid names or values
    /// are ignored.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    /// Appends a header value, keeping existing ones.
    pub fn append_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
    }

    pub fn remove_header(&mut self, name: &str) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.headers.remove(name);
        }
    }

    /// Percent-decoded value of the named query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        for pair in self.query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if percent_decode(k) == name {
                return Some(percent_decode(v));
            }
        }
        None
    }

    /// Value of the named cookie from the `Cookie` header(s).
    pub fn cookie(&self, name: &str) -> Option<String> {
        for value in self.headers.get_all("cookie") {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                let pair = pair.trim();
                if let Some((k, v)) = pair.split_once('=') {
                    if k == name {
                        return Some(v.to_string());
                    }
                }
            }
        }
        None
    }

    /// Client source address: the first parseable `X-Forwarded-For` entry,
    /// falling back to the peer address.
    pub fn source_ip(&self) -> Option<IpAddr> {
        if let Some(xff) = self.header("x-forwarded-for") {
            for entry in xff.split(',') {
                if let Ok(ip) = entry.trim().parse() {
                    return Some(ip);
                }
            }
        }
        self.peer_ip
    }

    /// Like [`source_ip`](Self::source_ip), but walks `X-Forwarded-For`
    /// right to left, trusting the entry closest to this proxy.
    pub fn source_ip_from_last(&self) -> Option<IpAddr> {
        if let Some(xff) = self.header("x-forwarded-for") {
            for entry in xff.split(',').rev() {
                if let Ok(ip) = entry.trim().parse() {
                    return Some(ip);
                }
            }
        }
        self.peer_ip
    }
}

/// The response of one proxied exchange, produced by the upstream call or by
/// filters serving directly.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// The default response for shunt routes whose filters set nothing.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    pub fn with_body(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn with_json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut resp = Self::with_body(status, Bytes::from(value.to_string()));
        resp.insert_header("content-type", "application/json");
        resp
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn insert_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    pub fn append_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
    }

    pub fn remove_header(&mut self, name: &str) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.headers.remove(name);
        }
    }

    /// Converts into the actix response written back to the client.
    pub fn into_http_response(self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status);
        for (name, value) in self.headers.iter() {
            builder.append_header((name.clone(), value.clone()));
        }
        builder.body(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_headers(pairs: &[(&str, &str)]) -> GatewayRequest {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        GatewayRequest {
            method: Method::GET,
            path: "/".to_string(),
            query: String::new(),
            headers,
            body: Bytes::new(),
            peer_ip: Some("10.0.0.9".parse().unwrap()),
            host: "example.org".to_string(),
            scheme: "http".to_string(),
        }
    }

    #[test]
    fn query_params_are_decoded() {
        let mut req = request_with_headers(&[]);
        req.query = "a=1&name=jo%20do&flag".to_string();
        assert_eq!(req.query_param("a").as_deref(), Some("1"));
        assert_eq!(req.query_param("name").as_deref(), Some("jo do"));
        assert_eq!(req.query_param("flag").as_deref(), Some(""));
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn cookies_are_parsed_from_the_cookie_header() {
        let req = request_with_headers(&[("cookie", "a=1; session=abc; b=2")]);
        assert_eq!(req.cookie("session").as_deref(), Some("abc"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn source_ip_prefers_forwarded_entries() {
        let req = request_with_headers(&[("x-forwarded-for", "1.2.3.4, 5.6.7.8")]);
        assert_eq!(req.source_ip(), Some("1.2.3.4".parse().unwrap()));
        assert_eq!(req.source_ip_from_last(), Some("5.6.7.8".parse().unwrap()));

        let bare = request_with_headers(&[]);
        assert_eq!(bare.source_ip(), Some("10.0.0.9".parse().unwrap()));
    }
}
