use quiver_core::executor::{HttpClient, HttpResponse, TransportError};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;

/// Blocking [`HttpClient`] over a shared `ureq` agent.
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl HttpClient for UreqClient {
    fn post(
        &mut self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &JsonValue,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.agent.post(url).timeout(timeout);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        // Error statuses are answers too; the oracle decides what they mean.
        let response = match request.send_string(&body.to_string()) {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(TransportError::new("post", url, err.to_string())),
        };
        let status = response.status();
        let body = response
            .into_string()
            .map_err(|e| TransportError::new("read body", url, e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}
