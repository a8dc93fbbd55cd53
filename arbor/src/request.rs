//! Request and response carriers.
//!
//! A connector (out of scope here) turns a byte stream into these carriers
//! and hands them to the top-level container's `invoke`. The engine only
//! routes them; it never parses wire formats.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An inbound request as seen by the dispatch tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The request method (e.g. "GET").
    pub method: String,
    /// The server name the request was addressed to (virtual-host key).
    pub server_name: String,
    /// The request path, starting with `/`.
    pub path: String,
    /// Attributes attached by valves while the request flows down the tree.
    #[serde(default)]
    attributes: HashMap<String, serde_json::Value>,
}

impl Request {
    /// Creates a request for the given server name and path.
    #[must_use]
    pub fn new(server_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            server_name: server_name.into(),
            path: path.into(),
            attributes: HashMap::new(),
        }
    }

    /// Sets the request method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Returns an attribute, if set.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Sets an attribute, replacing any previous value.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Removes an attribute.
    pub fn remove_attribute(&mut self, key: &str) {
        self.attributes.remove(key);
    }
}

/// The response being assembled while a request flows through the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The response status code.
    status: u16,
    /// Response headers.
    headers: HashMap<String, String>,
    /// The response body.
    body: Vec<u8>,
    /// True once a valve has finalized the response.
    committed: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: Vec::new(),
            committed: false,
        }
    }
}

impl Response {
    /// Creates an empty 200 response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Sets the status code. Ignored once committed.
    pub fn set_status(&mut self, status: u16) {
        if !self.committed {
            self.status = status;
        }
    }

    /// Returns a header, if set.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Sets a header. Ignored once committed.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if !self.committed {
            self.headers.insert(name.into(), value.into());
        }
    }

    /// Returns the body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replaces the body. Ignored once committed.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        if !self.committed {
            self.body = body.into();
        }
    }

    /// Returns true once the response has been finalized.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Finalizes the response; later mutations are ignored.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_attributes() {
        let mut req = Request::new("localhost", "/shop/cart");
        assert!(req.attribute("app.path").is_none());

        req.set_attribute("app.path", serde_json::json!("/shop"));
        assert_eq!(req.attribute("app.path"), Some(&serde_json::json!("/shop")));

        req.remove_attribute("app.path");
        assert!(req.attribute("app.path").is_none());
    }

    #[test]
    fn test_response_defaults() {
        let resp = Response::new();
        assert_eq!(resp.status(), 200);
        assert!(resp.body().is_empty());
        assert!(!resp.is_committed());
    }

    #[test]
    fn test_committed_response_is_frozen() {
        let mut resp = Response::new();
        resp.set_status(503);
        resp.set_body("unavailable");
        resp.commit();

        resp.set_status(200);
        resp.set_body("ok");
        resp.set_header("x-late", "ignored");

        assert_eq!(resp.status(), 503);
        assert_eq!(resp.body(), b"unavailable");
        assert!(resp.header("x-late").is_none());
    }
}
