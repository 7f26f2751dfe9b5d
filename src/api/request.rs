use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request};
use serde_json::Value;
use std::net::SocketAddr;

use crate::api::error::ServerError;

/// Cookie that carries the browser session id
pub const SESSION_COOKIE: &str = "session";

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Everything the dispatcher reads from an inbound request, parsed once
#[derive(Debug, Clone)]
pub struct RequestData {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub json: Option<Value>,
    pub headers: HeaderMap,
    /// Client address used for rate limiting
    pub client: String,
}

impl RequestData {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            form: Vec::new(),
            json: None,
            headers: HeaderMap::new(),
            client: "unknown".to_string(),
        }
    }

    /// Consume the request and parse query string and body
    pub async fn from_request(
        request: Request<Body>,
        remote: Option<SocketAddr>,
    ) -> Result<Self, ServerError> {
        let (parts, body) = request.into_parts();

        let mut data = Self::new(parts.method, parts.uri.path());
        data.query = parts.uri.query().map(Self::parse_pairs).unwrap_or_default();
        data.client = client_address(&parts.headers, remote);

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        data.headers = parts.headers;

        let is_form = content_type.starts_with("application/x-www-form-urlencoded");
        let is_json = content_type.starts_with("application/json");
        if !is_form && !is_json {
            return Ok(data);
        }

        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| ServerError::BadRequest("Request body could not be read.".to_string()))?;

        if is_form {
            data.form = form_urlencoded_pairs(&bytes);
        } else if !bytes.is_empty() {
            let json = serde_json::from_slice(&bytes)
                .map_err(|_| ServerError::BadRequest("Request body is not valid JSON.".to_string()))?;
            data.json = Some(json);
        }

        Ok(data)
    }

    pub fn parse_pairs(input: &str) -> Vec<(String, String)> {
        form_urlencoded_pairs(input.as_bytes())
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        first_value(&self.query, name)
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        first_value(&self.form, name)
    }

    /// All values of a repeated form field
    pub fn form_values(&self, name: &str) -> Vec<&str> {
        self.form
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn json_value(&self, name: &str) -> Option<&Value> {
        self.json.as_ref().and_then(|body| body.get(name))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn session_id(&self) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .filter_map(|cookie| cookie.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }

    /// Query string with keys sorted, `?`-prefixed, empty when there is none
    pub fn sorted_query_string(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        let mut pairs: Vec<_> = self.query.iter().collect();
        pairs.sort();
        let joined = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("?{}", joined)
    }

    /// Path including the raw query string, used as a redirect target
    pub fn full_path(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }
}

fn form_urlencoded_pairs(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn first_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn client_address(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_form_body_is_parsed() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/select?seq_request_id=3")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, "theme=dark; session=abc123")
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(Body::from("library_ids=1&library_ids=2&note=a+b%21"))
            .unwrap();

        let data = RequestData::from_request(request, None).await.unwrap();
        assert_eq!(data.path, "/select");
        assert_eq!(data.query_value("seq_request_id"), Some("3"));
        assert_eq!(data.form_values("library_ids"), vec!["1", "2"]);
        assert_eq!(data.form_value("note"), Some("a b!"));
        assert_eq!(data.session_id().as_deref(), Some("abc123"));
        assert_eq!(data.client, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_json_body_is_parsed() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/ping")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"api_token": "t", "n": 1}"#))
            .unwrap();
        let remote: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        let data = RequestData::from_request(request, Some(remote)).await.unwrap();
        assert_eq!(data.json_value("n"), Some(&json!(1)));
        assert_eq!(data.client, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/ping")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let err = RequestData::from_request(request, None).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[test]
    fn test_sorted_query_string() {
        let mut data = RequestData::new(Method::GET, "/x");
        assert_eq!(data.sorted_query_string(), "");
        data.query = RequestData::parse_pairs("b=2&a=1");
        assert_eq!(data.sorted_query_string(), "?a=1&b=2");
        assert_eq!(data.full_path(), "/x?b=2&a=1");
    }
}
