use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Opaque email identifier. The backend hands out integers; anything it
/// sends is kept verbatim as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EmailId(String);

impl EmailId {
    pub fn new(id: impl Into<String>) -> Self {
        EmailId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EmailId {
    fn from(s: &str) -> Self {
        EmailId(s.to_string())
    }
}

impl<'de> Deserialize<'de> for EmailId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Unsigned(u64),
            Signed(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Unsigned(n) => EmailId(n.to_string()),
            RawId::Signed(n) => EmailId(n.to_string()),
            RawId::Text(s) => EmailId(s),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Accepts both `low|normal|high` and the backend's
    /// `Urgent`/`Not urgent` labels. Anything else is `Normal`.
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "urgent" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

fn de_priority<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Priority, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| Priority::from_wire(&s)).unwrap_or_default())
}

fn de_sentiment<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Sentiment, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| Sentiment::from_wire(&s)).unwrap_or_default())
}

fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default())
}

// Inbox row as returned by GET /emails
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmailSummary {
    pub id: EmailId,
    #[serde(default, deserialize_with = "de_text")]
    pub subject: String,
    #[serde(default, deserialize_with = "de_text")]
    pub sender: String,
    #[serde(default, deserialize_with = "de_priority")]
    pub priority: Priority,
    #[serde(default, deserialize_with = "de_sentiment")]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub resolved: bool,
}

// Full record as returned by GET /emails/{id}
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmailDetail {
    pub id: EmailId,
    #[serde(default, deserialize_with = "de_text")]
    pub subject: String,
    #[serde(default, deserialize_with = "de_text")]
    pub sender: String,
    #[serde(default, deserialize_with = "de_text")]
    pub body: String,
    #[serde(default)]
    pub draft: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SendReceipt {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct InboxStats {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub resolved: u64,
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub by_priority: BTreeMap<String, u64>,
    #[serde(default)]
    pub by_sentiment: BTreeMap<String, u64>,
}

/// Server-side filter for GET /emails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxQuery {
    pub priority: Option<String>,
    pub limit: u32,
}

impl Default for InboxQuery {
    fn default() -> Self {
        InboxQuery {
            priority: None,
            limit: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_from_backend_labels() {
        let rows: Vec<EmailSummary> = serde_json::from_value(json!([
            {"id": 1, "subject": "Hi", "sender": "a@example.com",
             "priority": "Urgent", "sentiment": "Negative",
             "body": "ignored", "received_at": "2024-03-01T10:00:00", "resolved": true},
            {"id": 2, "subject": "Bye", "sender": "b@example.com",
             "priority": "Not urgent", "sentiment": null},
        ]))
        .unwrap();

        assert_eq!(rows[0].id, EmailId::from("1"));
        assert_eq!(rows[0].priority, Priority::High);
        assert_eq!(rows[0].sentiment, Sentiment::Negative);
        assert!(rows[0].resolved);
        assert_eq!(rows[0].received_at.as_deref(), Some("2024-03-01T10:00:00"));

        assert_eq!(rows[1].priority, Priority::Normal);
        assert_eq!(rows[1].sentiment, Sentiment::Neutral);
        assert!(!rows[1].resolved);
    }

    #[test]
    fn test_priority_and_sentiment_spellings() {
        assert_eq!(Priority::from_wire("HIGH"), Priority::High);
        assert_eq!(Priority::from_wire("low"), Priority::Low);
        assert_eq!(Priority::from_wire(" urgent "), Priority::High);
        assert_eq!(Priority::from_wire("whenever"), Priority::Normal);
        assert_eq!(Sentiment::from_wire("Positive"), Sentiment::Positive);
        assert_eq!(Sentiment::from_wire("meh"), Sentiment::Neutral);
    }

    #[test]
    fn test_string_ids_are_kept_verbatim() {
        let detail: EmailDetail =
            serde_json::from_value(json!({"id": "msg-7", "body": "hello"})).unwrap();
        assert_eq!(detail.id.as_str(), "msg-7");
        assert_eq!(detail.subject, "");
        assert_eq!(detail.draft, None);
        assert_eq!(serde_json::to_value(&detail.id).unwrap(), json!("msg-7"));
    }

    #[test]
    fn test_detail_null_fields() {
        let detail: EmailDetail = serde_json::from_value(json!({
            "id": 3, "subject": null, "sender": "c@example.com", "body": "text", "draft": null
        }))
        .unwrap();
        assert_eq!(detail.subject, "");
        assert_eq!(detail.draft, None);
    }

    #[test]
    fn test_stats_shape() {
        let stats: InboxStats = serde_json::from_value(json!({
            "total": 3, "resolved": 1, "pending": 2,
            "by_priority": {"Urgent": 1, "Not urgent": 2},
            "by_sentiment": {"Positive": 0, "Neutral": 2, "Negative": 1}
        }))
        .unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_priority.get("Urgent"), Some(&1));
        assert_eq!(stats.by_sentiment.get("Negative"), Some(&1));
    }
}
