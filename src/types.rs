use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accepted webhook delivery, as written to the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "id")]
    pub delivery_id: String,
    #[serde(rename = "event")]
    pub event_type: String,
    pub action: String,
    pub issue_number: Option<u64>,
    #[serde(with = "utc_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.delivery_id, &self.action)
    }
}

/// Key under which a delivery is recorded in the duplicate index.
pub fn dedup_key(delivery_id: &str, action: &str) -> String {
    format!("{delivery_id}:{action}")
}

/// Second-precision UTC timestamps, e.g. "2024-05-01T12:00:00Z".
pub mod utc_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

// ─── Normalized resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub labels: Vec<String>,
    pub html_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub comments: u64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub html_url: String,
    pub created_at: String,
}

/// One page of a listing, with the upstream pagination and validator headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuePage {
    pub issues: Vec<Issue>,
    pub link: Option<String>,
    pub etag: Option<String>,
}

// ─── Request parameters ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub body: String,
}

/// Filters for a listing; also the fingerprint of its ETag cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListQuery {
    pub state: String,
    pub labels: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            state: "open".to_string(),
            labels: None,
            page: 1,
            per_page: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn event_serializes_to_log_record_shape() {
        let event = WebhookEvent {
            delivery_id: "delivery-1".to_string(),
            event_type: "issues".to_string(),
            action: "opened".to_string(),
            issue_number: Some(7),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 9).unwrap(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "delivery-1",
                "event": "issues",
                "action": "opened",
                "issue_number": 7,
                "timestamp": "2024-05-01T12:00:09Z",
            })
        );

        let back: WebhookEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.dedup_key(), "delivery-1:opened");
    }

    #[test]
    fn missing_issue_number_is_written_as_null() {
        let line = r#"{"id":"d","event":"ping","action":"","issue_number":null,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let event: WebhookEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.issue_number, None);
        assert_eq!(serde_json::to_string(&event).unwrap(), line);
    }

    #[test]
    fn unset_optional_fields_are_dropped() {
        let update = IssueUpdate {
            state: Some("closed".to_string()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&update).unwrap(), r#"{"state":"closed"}"#);
    }
}
