//! Outgoing HTTP requests.

use bytes::Bytes;
use http::Method;
use http_body_util::Full;
use url::Url;

use crate::error::{Error, Result};

/// A single HTTP request.
///
/// Headers are kept in insertion order and written verbatim on HTTP/1.1.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl Request {
    /// Create a request, parsing `url`.
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self::from_url(method, Url::parse(url)?))
    }

    pub fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    /// Append a header. Repeated names are sent as repeated lines.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and its content type.
    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .header("Content-Type", "application/json")
            .body(body))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Convert into an `http::Request` for hyper, absolute-form URI.
    pub(crate) fn into_http(self) -> Result<http::Request<Full<Bytes>>> {
        let mut url = self.url;
        url.set_fragment(None);
        let uri: http::Uri = url
            .as_str()
            .parse()
            .map_err(|e| Error::http_protocol(format!("Invalid request URI: {}", e)))?;

        let mut builder = http::Request::builder().method(self.method).uri(uri);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .body(Full::new(self.body.unwrap_or_default()))
            .map_err(|e| Error::http_protocol(format!("Invalid request: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_header_order() {
        let req = Request::get("https://example.com/a?b=1")
            .unwrap()
            .header("X-B", "2")
            .header("X-A", "1")
            .header("X-B", "3");
        let names: Vec<&str> = req.headers().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["X-B", "X-A", "X-B"]);
        assert_eq!(req.method(), &Method::GET);
    }

    #[test]
    fn test_into_http_drops_fragment() {
        let req = Request::post("https://example.com/p#frag")
            .unwrap()
            .body("hi");
        let http = req.into_http().unwrap();
        assert_eq!(http.uri().to_string(), "https://example.com/p");
        assert_eq!(http.method(), &Method::POST);
    }

    #[test]
    fn test_into_http_rejects_bad_header() {
        let req = Request::get("https://example.com/")
            .unwrap()
            .header("Bad Name", "x");
        assert!(matches!(req.into_http(), Err(Error::HttpProtocol(_))));
    }

    #[test]
    fn test_json_body() {
        let req = Request::post("https://example.com/")
            .unwrap()
            .json(&serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(req.body_bytes().unwrap().as_ref(), br#"{"a":1}"#);
        assert_eq!(req.headers()[0].1, "application/json");
    }
}
