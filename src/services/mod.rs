//! Collaborator seams: every external service the orchestrator talks to is
//! behind an object-safe async trait, injected at construction time. The
//! production implementations live in [`http`]; tests swap in recording
//! doubles.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub mod http;
pub mod model;
pub mod patch;

pub use http::{HttpBillingClient, HttpBlobStore, HttpCatalogClient, HttpDeployClient};
pub use model::{CatalogData, Entitlements, PlanTier};
pub use patch::BlobFragmentPatcher;

/// Missing or unusable external credentials/endpoints. Routed straight to
/// the dead-letter queue by the consumer: retrying cannot fix it.
#[derive(Debug, Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);

/// Catalog/product RPC used by the `fetch_data` stage.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Fetch products and collections for a site. A timeout is an error,
    /// never a silent empty result.
    async fn fetch_catalog(&self, tenant_id: &str, site_id: &str) -> Result<CatalogData>;
}

/// Blob store used by the `upload` stage and the fragment patcher.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a file from disk; returns the public URL.
    async fn upload_file(&self, key: &str, path: &Path, content_type: Option<&str>)
        -> Result<String>;
    /// Upload an in-memory buffer; returns the public URL.
    async fn upload_buffer(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>)
        -> Result<String>;
    /// Remove every object under a key prefix.
    async fn remove_prefix(&self, prefix: &str) -> Result<()>;
    async fn remove_object(&self, key: &str) -> Result<()>;
    /// Whether any object exists under the site's public prefix.
    async fn check_site_files(&self, prefix: &str) -> Result<bool>;
}

/// Deployment/app-restart RPC.
#[async_trait]
pub trait DeployService: Send + Sync {
    /// Best-effort downstream restart so proxies pick up fresh content.
    async fn deploy(&self, site_id: &str) -> Result<()>;
    async fn toggle_maintenance(&self, site_id: &str, enabled: bool) -> Result<()>;
}

/// Billing RPC, consulted for publish priorities.
#[async_trait]
pub trait BillingService: Send + Sync {
    async fn get_entitlements(&self, tenant_id: &str) -> Result<Entitlements>;
}

/// Lighter-weight alternative to a full rebuild for sites that support
/// in-place fragment patching.
#[async_trait]
pub trait FragmentPatcher: Send + Sync {
    async fn patch_site(&self, tenant_id: &str, site_id: &str, product_ids: &[String])
        -> Result<()>;
}
