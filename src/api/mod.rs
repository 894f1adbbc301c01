pub mod client;
pub mod types;

use types::{EmailDetail, EmailId, EmailSummary, InboxQuery, InboxStats, SendReceipt};

/// Failure of a backend round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Http(String),
    Status { code: u16, body: String },
    Parse(String),
    /// The worker pool is gone; nothing can reach the backend any more.
    Disconnected,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Http(e) => write!(f, "HTTP error: {}", e),
            TransportError::Status { code, body } if body.is_empty() => {
                write!(f, "HTTP {} error: (empty response)", code)
            }
            TransportError::Status { code, body } => write!(f, "HTTP {} error: {}", code, body),
            TransportError::Parse(e) => write!(f, "Parse error: {}", e),
            TransportError::Disconnected => write!(f, "backend channel closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// The triage backend as seen from the client. Calls block; they are only
/// ever made from backend worker threads.
pub trait Transport: Send + Sync {
    fn list_emails(&self, query: &InboxQuery) -> Result<Vec<EmailSummary>, TransportError>;
    fn get_email(&self, id: &EmailId) -> Result<EmailDetail, TransportError>;
    fn generate_draft(&self, id: &EmailId) -> Result<(), TransportError>;
    fn send(&self, id: &EmailId, body: &str) -> Result<SendReceipt, TransportError>;
    fn stats(&self) -> Result<InboxStats, TransportError>;
}
