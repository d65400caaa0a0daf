//! Blocking HTTP transport for the prediction service.

use reqwest::blocking::Client;
use serde_json::Value;

use super::{PredictionConfig, PredictionTransport};
use crate::error::TransportError;

/// JSON-over-HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &PredictionConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| TransportError::Request {
            path: config.base_url.clone(),
            reason: format!("cannot build HTTP client: {e}"),
        })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl PredictionTransport for HttpTransport {
    fn post_json(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        let request_err = |e: reqwest::Error| TransportError::Request {
            path: path.to_string(),
            reason: e.to_string(),
        };

        tracing::trace!(path, %body, "POST");
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .map_err(request_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let text = resp.text().map_err(request_err)?;
        serde_json::from_str(&text).map_err(|source| TransportError::Body {
            path: path.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_and_path() {
        let t = HttpTransport::new(&PredictionConfig {
            base_url: "http://10.0.0.5:8000/".into(),
            timeout_ms: Some(500),
        })
        .unwrap();
        assert_eq!(t.base_url(), "http://10.0.0.5:8000");
        assert_eq!(t.url("/predictclub/2001"), "http://10.0.0.5:8000/predictclub/2001");
    }

    #[test]
    fn unreachable_service_is_a_request_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let t = HttpTransport::new(&PredictionConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_ms: Some(500),
        })
        .unwrap();
        let err = t.post_json("/predictlocation/2001", Value::Null).unwrap_err();
        assert!(matches!(err, TransportError::Request { .. }), "{err}");
    }
}
