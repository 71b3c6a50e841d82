//! Plain read-only session summaries handed to the hosting application.
//!
//! The engine does not persist anything; once a run finishes it produces one
//! [`SummaryRecord`] and the surrounding app decides what to do with it
//! (display, export, upload).

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use super::platform::{platform_string, timezone_string};
use super::qc::QualityFlags;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRecord {
    pub id: String,
    /// Task identifier, e.g. `"cpt-letter"` or `"cpt-shape"`.
    pub task: String,
    /// RFC 3339 UTC timestamp of record creation.
    pub created_at: String,
    pub client: ClientInfo,
    pub metrics: serde_json::Value,
    pub interpretation: serde_json::Value,
    pub qc: QualityFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SummaryRecord {
    pub fn new(
        task: &str,
        metrics: serde_json::Value,
        interpretation: serde_json::Value,
        qc: QualityFlags,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.to_string(),
            created_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            client: ClientInfo::capture(),
            metrics,
            interpretation,
            qc,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    pub platform: String,
    pub tz: String,
}

impl ClientInfo {
    pub fn capture() -> Self {
        Self {
            platform: platform_string(),
            tz: timezone_string(),
        }
    }
}
