//! Production fragment patcher: regenerates the changed product fragments
//! from fresh catalog data and writes them in place under the site's public
//! prefix, skipping the full build pipeline.

use super::{BlobStore, CatalogService, FragmentPatcher};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct BlobFragmentPatcher {
    catalog: Arc<dyn CatalogService>,
    blob: Arc<dyn BlobStore>,
}

impl BlobFragmentPatcher {
    pub fn new(catalog: Arc<dyn CatalogService>, blob: Arc<dyn BlobStore>) -> Self {
        Self { catalog, blob }
    }
}

#[async_trait]
impl FragmentPatcher for BlobFragmentPatcher {
    async fn patch_site(
        &self,
        tenant_id: &str,
        site_id: &str,
        product_ids: &[String],
    ) -> Result<()> {
        let data = self.catalog.fetch_catalog(tenant_id, site_id).await?;
        let mut patched = 0usize;
        for product in &data.products {
            let Some(id) = product.get("id").and_then(Value::as_str) else {
                continue;
            };
            if !product_ids.iter().any(|p| p == id) {
                continue;
            }
            let key = format!("sites/{site_id}/fragments/products/{id}.json");
            let bytes = serde_json::to_vec(product)?;
            self.blob
                .upload_buffer(&key, bytes, Some("application/json"))
                .await?;
            patched += 1;
        }
        debug!(site_id, patched, requested = product_ids.len(), "site fragments patched");
        Ok(())
    }
}
