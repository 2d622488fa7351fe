//! The per-message envelope carried in front of every request/response body.

use serde::{Deserialize, Serialize};

/// Message header: identifies which method is being invoked, correlates a
/// response with its request via `seq`, and carries a server-side error
/// message on failure responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// `"Service.Method"`.
    pub service_method: String,
    /// Client-assigned sequence number, unique per connection.
    pub seq: u64,
    /// Empty on requests and on successful responses; non-empty on failure
    /// responses.
    pub error: String,
}

impl Header {
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Header {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
