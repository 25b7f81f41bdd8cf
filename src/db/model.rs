use crate::model::{BuildStage, BuildStatus, SiteStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub tenant_id: String,
    pub name: Option<String>,
    pub status: SiteStatus,
    pub prev_status: Option<SiteStatus>,
    pub frozen_at: Option<DateTime<Utc>>,
    pub theme_config: Option<String>,
    pub supports_fragment_patch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRevision {
    pub id: String,
    pub site_id: String,
    pub content: String,
}

/// The build status query result exposed at the service boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatusView {
    pub build_id: String,
    pub site_id: String,
    pub status: BuildStatus,
    pub stage: Option<BuildStage>,
    pub percent: i64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub retry_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
