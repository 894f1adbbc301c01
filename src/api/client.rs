use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

use super::types::*;
use super::{Transport, TransportError};

/// Blocking HTTP client for the triage backend.
pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        ApiClient {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn email_url(&self, prefix: &str, id: &EmailId) -> String {
        self.url(&format!("{}/{}", prefix, urlencoding::encode(id.as_str())))
    }

    fn read_json<T: DeserializeOwned>(
        response: Result<ureq::Response, ureq::Error>,
    ) -> Result<T, TransportError> {
        let response = response.map_err(map_ureq_error)?;
        let status = response.status();
        let body = response
            .into_string()
            .map_err(|e| TransportError::Parse(format!("Failed to read response: {}", e)))?;

        log::debug!(
            "[API] Response {} ({} bytes): {}",
            status,
            body.len(),
            truncate_str(&body, 500)
        );

        serde_json::from_str(&body).map_err(|e| {
            TransportError::Parse(format!(
                "Failed to parse response: {}. Response was: {}",
                e,
                truncate_str(&body, 200)
            ))
        })
    }
}

impl Transport for ApiClient {
    fn list_emails(&self, query: &InboxQuery) -> Result<Vec<EmailSummary>, TransportError> {
        log::debug!("[API] GET /emails ({:?})", query);
        let mut request = self
            .agent
            .get(&self.url("/emails"))
            .query("limit", &query.limit.to_string());
        if let Some(ref priority) = query.priority {
            request = request.query("priority", priority);
        }
        Self::read_json(request.call())
    }

    fn get_email(&self, id: &EmailId) -> Result<EmailDetail, TransportError> {
        log::debug!("[API] GET /emails/{}", id);
        Self::read_json(self.agent.get(&self.email_url("/emails", id)).call())
    }

    fn generate_draft(&self, id: &EmailId) -> Result<(), TransportError> {
        log::debug!("[API] POST /generate-draft/{}", id);
        // The response body carries the draft too, but callers re-read the
        // detail; only success matters here.
        self.agent
            .post(&self.email_url("/generate-draft", id))
            .call()
            .map(|_| ())
            .map_err(map_ureq_error)
    }

    fn send(&self, id: &EmailId, body: &str) -> Result<SendReceipt, TransportError> {
        log::debug!("[API] POST /send/{} ({} chars)", id, body.chars().count());
        Self::read_json(
            self.agent
                .post(&self.email_url("/send", id))
                .send_json(json!({ "override_body": body })),
        )
    }

    fn stats(&self) -> Result<InboxStats, TransportError> {
        log::debug!("[API] GET /stats");
        Self::read_json(self.agent.get(&self.url("/stats")).call())
    }
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            log::warn!("[API] HTTP error {}: {}", code, truncate_str(&body, 200));
            TransportError::Status {
                code,
                body: truncate_str(&body, 200).to_string(),
            }
        }
        ureq::Error::Transport(transport) => {
            log::warn!("[API] Connection error: {}", transport);
            TransportError::Http(transport.to_string())
        }
    }
}

fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 2), "he");
        assert_eq!(truncate_str("ééé", 2), "éé");
    }

    #[test]
    fn test_urls() {
        let client = ApiClient::new("http://localhost:8000/", Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(
            client.email_url("/generate-draft", &EmailId::from("7")),
            "http://localhost:8000/generate-draft/7"
        );
        assert_eq!(
            client.email_url("/emails", &EmailId::from("a/b c")),
            "http://localhost:8000/emails/a%2Fb%20c"
        );
        assert_eq!(
            client.email_url("/send", &EmailId::from("msg-7_a.b~")),
            "http://localhost:8000/send/msg-7_a.b~"
        );
    }

    #[test]
    fn test_display() {
        let err = TransportError::Status {
            code: 404,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "HTTP 404 error: (empty response)");
        assert_eq!(
            TransportError::Disconnected.to_string(),
            "backend channel closed"
        );
    }
}
