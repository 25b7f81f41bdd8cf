//! Domain types shared across the queue, pipeline and persistence layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message pattern for build requests on the build queue.
pub const PATTERN_BUILD_QUEUED: &str = "build_queued";
/// Message pattern for upstream catalog change notifications.
pub const PATTERN_CATALOG_CHANGED: &str = "catalog_changed";
/// Message pattern for billing-driven tenant freezes.
pub const PATTERN_TENANT_FREEZE: &str = "tenant_freeze";
/// Message pattern for billing-driven tenant unfreezes.
pub const PATTERN_TENANT_UNFREEZE: &str = "tenant_unfreeze";

/// Trigger reason for a user-initiated publish.
pub const TRIGGER_PUBLISH: &str = "publish";
/// Trigger reason for debounced automated rebuilds.
pub const TRIGGER_CATALOG_CHANGE: &str = "catalog_change";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Running,
    Failed,
    Uploaded,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Running => "running",
            BuildStatus::Failed => "failed",
            BuildStatus::Uploaded => "uploaded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(BuildStatus::Queued),
            "running" => Some(BuildStatus::Running),
            "failed" => Some(BuildStatus::Failed),
            "uploaded" => Some(BuildStatus::Uploaded),
            _ => None,
        }
    }

    /// Status is strictly forward-moving: queued → running → {failed|uploaded}.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        matches!(
            (self, next),
            (BuildStatus::Queued, BuildStatus::Running)
                | (BuildStatus::Running, BuildStatus::Failed)
                | (BuildStatus::Running, BuildStatus::Uploaded)
        )
    }
}

/// The seven pipeline stages, in execution order, each with a fixed
/// progress checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Merge,
    Generate,
    FetchData,
    AstroBuild,
    Zip,
    Upload,
    Deploy,
}

impl BuildStage {
    pub const ALL: [BuildStage; 7] = [
        BuildStage::Merge,
        BuildStage::Generate,
        BuildStage::FetchData,
        BuildStage::AstroBuild,
        BuildStage::Zip,
        BuildStage::Upload,
        BuildStage::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStage::Merge => "merge",
            BuildStage::Generate => "generate",
            BuildStage::FetchData => "fetch_data",
            BuildStage::AstroBuild => "astro_build",
            BuildStage::Zip => "zip",
            BuildStage::Upload => "upload",
            BuildStage::Deploy => "deploy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merge" => Some(BuildStage::Merge),
            "generate" => Some(BuildStage::Generate),
            "fetch_data" => Some(BuildStage::FetchData),
            "astro_build" => Some(BuildStage::AstroBuild),
            "zip" => Some(BuildStage::Zip),
            "upload" => Some(BuildStage::Upload),
            "deploy" => Some(BuildStage::Deploy),
            _ => None,
        }
    }

    /// Fixed progress checkpoint reached once this stage completes.
    pub fn percent(&self) -> u8 {
        match self {
            BuildStage::Merge => 10,
            BuildStage::Generate => 25,
            BuildStage::FetchData => 40,
            BuildStage::AstroBuild => 70,
            BuildStage::Zip => 80,
            BuildStage::Upload => 90,
            BuildStage::Deploy => 100,
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Draft,
    Production,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Draft => "draft",
            BuildMode::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(BuildMode::Draft),
            "production" => Some(BuildMode::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Draft,
    Published,
    Frozen,
    Archived,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Draft => "draft",
            SiteStatus::Published => "published",
            SiteStatus::Frozen => "frozen",
            SiteStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(SiteStatus::Draft),
            "published" => Some(SiteStatus::Published),
            "frozen" => Some(SiteStatus::Frozen),
            "archived" => Some(SiteStatus::Archived),
            _ => None,
        }
    }
}

/// Wire envelope carried by every broker delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueMessage {
    pub pattern: String,
    pub data: serde_json::Value,
}

impl QueueMessage {
    pub fn new(pattern: &str, data: serde_json::Value) -> Self {
        Self {
            pattern: pattern.to_string(),
            data,
        }
    }
}

/// Payload of a `build_queued` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub tenant_id: String,
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    pub mode: BuildMode,
    pub trigger: String,
    /// Union of product ids behind a debounced rebuild, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_products: Option<Vec<String>>,
}

/// Payload of a `catalog_changed` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub event: String,
    pub tenant_id: String,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

/// Payload of a `tenant_freeze` / `tenant_unfreeze` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantRequest {
    pub tenant_id: String,
}

/// One x-death style record: which retry tier a message passed through,
/// and how many times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeathEntry {
    pub queue: String,
    pub reason: String,
    pub count: u32,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_percents_strictly_increase() {
        let percents: Vec<u8> = BuildStage::ALL.iter().map(|s| s.percent()).collect();
        assert_eq!(percents, vec![10, 25, 40, 70, 80, 90, 100]);
        for pair in percents.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(BuildStage::ALL[0], BuildStage::Merge);
        assert_eq!(BuildStage::ALL[6], BuildStage::Deploy);
    }

    #[test]
    fn stage_round_trips_through_names() {
        for stage in BuildStage::ALL {
            assert_eq!(BuildStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(BuildStage::parse("unknown"), None);
    }

    #[test]
    fn status_only_moves_forward() {
        assert!(BuildStatus::Queued.can_transition_to(BuildStatus::Running));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Failed));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Uploaded));
        assert!(!BuildStatus::Uploaded.can_transition_to(BuildStatus::Running));
        assert!(!BuildStatus::Failed.can_transition_to(BuildStatus::Queued));
        assert!(!BuildStatus::Queued.can_transition_to(BuildStatus::Uploaded));
    }

    #[test]
    fn build_request_wire_shape_is_camel_case() {
        let req = BuildRequest {
            tenant_id: "t1".into(),
            site_id: "s1".into(),
            build_id: None,
            mode: BuildMode::Production,
            trigger: TRIGGER_PUBLISH.into(),
            changed_products: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["tenantId"], "t1");
        assert_eq!(value["siteId"], "s1");
        assert_eq!(value["mode"], "production");
        assert!(value.get("buildId").is_none());
    }
}
