use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Products and collections returned by the catalog RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub products: Vec<Value>,
    #[serde(default)]
    pub collections: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Trial,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlements {
    pub plan: PlanTier,
}

impl Default for Entitlements {
    fn default() -> Self {
        Self {
            plan: PlanTier::Free,
        }
    }
}
