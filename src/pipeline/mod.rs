//! The seven-stage build pipeline executor.
//!
//! Stages run strictly in order; each completed stage emits a progress
//! report (broadcast event plus a spawned, never-awaited row update). Any
//! stage failure aborts the remainder and propagates to the consumer for
//! retry classification. The transient build directory is a drop-guarded
//! resource, removed on success and failure alike.

pub mod scaffold;
pub mod toolchain;

pub use toolchain::{CommandToolchain, Toolchain};

use crate::db::{self, Pool};
use crate::events::{Event, EventBus};
use crate::model::{BuildMode, BuildStage};
use crate::services::{BlobStore, CatalogService, DeployService};
use anyhow::{anyhow, bail, Context, Result};
use scaffold::{content_type_for, generate_project, write_catalog_data, zip_dir, WorkDir};
use serde_json::{json, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A pipeline stage failure, tagged for retry classification.
#[derive(Debug, Error)]
#[error("build stage '{stage}' failed: {cause}")]
pub struct StageFailure {
    pub stage: BuildStage,
    pub cause: anyhow::Error,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub artifact_url: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Root under which per-build work directories are created.
    pub work_root: PathBuf,
    pub bucket: String,
}

#[derive(Debug, Clone, Copy)]
struct JobCtx<'a> {
    tenant_id: &'a str,
    site_id: &'a str,
    build_id: &'a str,
    mode: BuildMode,
}

struct MergedConfig {
    value: Value,
}

pub struct Executor {
    pool: Pool,
    catalog: Arc<dyn CatalogService>,
    blob: Arc<dyn BlobStore>,
    deploy: Arc<dyn DeployService>,
    toolchain: Arc<dyn Toolchain>,
    events: EventBus,
    settings: Settings,
}

impl Executor {
    pub fn new(
        pool: Pool,
        catalog: Arc<dyn CatalogService>,
        blob: Arc<dyn BlobStore>,
        deploy: Arc<dyn DeployService>,
        toolchain: Arc<dyn Toolchain>,
        events: EventBus,
        settings: Settings,
    ) -> Self {
        Self {
            pool,
            catalog,
            blob,
            deploy,
            toolchain,
            events,
            settings,
        }
    }

    /// Run all seven stages for one build attempt. The job row must already
    /// be `running`.
    pub async fn run(
        &self,
        tenant_id: &str,
        site_id: &str,
        build_id: &str,
        mode: BuildMode,
    ) -> Result<BuildOutcome, StageFailure> {
        let ctx = JobCtx {
            tenant_id,
            site_id,
            build_id,
            mode,
        };
        info!(build_id, site_id, mode = mode.as_str(), "starting build pipeline");

        let work = match WorkDir::create(&self.settings.work_root, build_id).await {
            Ok(work) => work,
            Err(cause) => {
                return Err(StageFailure {
                    stage: BuildStage::Merge,
                    cause,
                })
            }
        };
        let project = work.path().to_path_buf();

        let merged = self
            .stage(ctx, BuildStage::Merge, "revision resolved and config merged", async {
                self.merge_config(ctx).await
            })
            .await?;

        self.stage(ctx, BuildStage::Generate, "static project generated", async {
            generate_project(&project, &merged.value).await
        })
        .await?;

        self.stage(ctx, BuildStage::FetchData, "catalog data fetched", async {
            let data = self
                .catalog
                .fetch_catalog(ctx.tenant_id, ctx.site_id)
                .await?;
            write_catalog_data(&project, &data).await
        })
        .await?;

        let out_dir = self
            .stage(ctx, BuildStage::AstroBuild, "toolchain build completed", async {
                self.toolchain.install(&project).await?;
                self.toolchain.build(&project).await
            })
            .await?;

        let archive_path = work.path().join("site.zip");
        self.stage(ctx, BuildStage::Zip, "artifact packaged", async {
            let src = out_dir.clone();
            let dest = archive_path.clone();
            tokio::task::spawn_blocking(move || zip_dir(&src, &dest))
                .await
                .context("archive task failed")?
        })
        .await?;

        let site_prefix = format!("sites/{}", ctx.site_id);
        let artifact_key = format!("builds/{}/site.zip", ctx.build_id);
        let artifact_url = self
            .stage(ctx, BuildStage::Upload, "artifact and site files uploaded", async {
                self.upload_outputs(&out_dir, &archive_path, &site_prefix, &artifact_key)
                    .await
            })
            .await?;

        self.stage(ctx, BuildStage::Deploy, "build uploaded and deployed", async {
            let marked = db::mark_job_uploaded(
                &self.pool,
                ctx.build_id,
                &artifact_url,
                &self.settings.bucket,
                &site_prefix,
            )
            .await?;
            if !marked {
                bail!("job '{}' was not in running status", ctx.build_id);
            }
            self.events.emit(Event::BuildPublished {
                build_id: ctx.build_id.to_string(),
                tenant_id: ctx.tenant_id.to_string(),
                site_id: ctx.site_id.to_string(),
                artifact_url: artifact_url.clone(),
            });
            // Downstream restart is best-effort: the artifact is already live.
            if let Err(err) = self.deploy.deploy(ctx.site_id).await {
                warn!(?err, site_id = ctx.site_id, "downstream restart failed");
            }
            Ok(())
        })
        .await?;

        info!(build_id, site_id, %artifact_url, "build pipeline finished");
        drop(work);
        Ok(BuildOutcome { artifact_url })
    }

    /// Run one stage body; on success report the stage's fixed checkpoint,
    /// on failure tag the error with the stage.
    async fn stage<T, F>(
        &self,
        ctx: JobCtx<'_>,
        stage: BuildStage,
        note: &str,
        body: F,
    ) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<T>>,
    {
        match body.await {
            Ok(value) => {
                self.report(ctx, stage, note);
                Ok(value)
            }
            Err(cause) => Err(StageFailure { stage, cause }),
        }
    }

    /// Progress is a side channel: the broadcast goes out synchronously,
    /// the row update is spawned and never awaited. A persistence failure
    /// is logged and swallowed.
    fn report(&self, ctx: JobCtx<'_>, stage: BuildStage, note: &str) {
        let percent = stage.percent();
        debug!(build_id = ctx.build_id, %stage, percent, "stage complete");
        self.events.emit(Event::BuildProgress {
            build_id: ctx.build_id.to_string(),
            site_id: ctx.site_id.to_string(),
            stage,
            percent,
            message: note.to_string(),
        });

        let pool = self.pool.clone();
        let build_id = ctx.build_id.to_string();
        let note = note.to_string();
        tokio::spawn(async move {
            if let Err(err) = db::update_job_progress(&pool, &build_id, stage, percent, &note).await
            {
                warn!(?err, build_id, "failed to persist build progress");
            }
        });
    }

    /// Resolve the current revision (creating a default empty one when the
    /// site has none) and merge it with the site's theme config.
    async fn merge_config(&self, ctx: JobCtx<'_>) -> Result<MergedConfig> {
        let site = db::get_site(&self.pool, ctx.site_id)
            .await?
            .ok_or_else(|| anyhow!("site '{}' not found", ctx.site_id))?;

        let revision = match db::latest_revision(&self.pool, ctx.site_id).await? {
            Some(revision) => revision,
            None => {
                debug!(site_id = ctx.site_id, "no revision yet, creating default");
                db::create_revision(&self.pool, ctx.site_id, "{}").await?
            }
        };
        db::set_job_revision(&self.pool, ctx.build_id, &revision.id).await?;

        let revision_content: Value =
            serde_json::from_str(&revision.content).unwrap_or_else(|_| json!({}));
        let theme: Value = site
            .theme_config
            .as_deref()
            .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| json!({})))
            .unwrap_or_else(|| json!({}));

        Ok(MergedConfig {
            value: json!({
                "site": { "id": site.id, "name": site.name, "tenantId": site.tenant_id },
                "mode": ctx.mode,
                "theme": theme,
                "revision": revision_content,
            }),
        })
    }

    /// Clear the per-site public prefix (stale files must never be served
    /// next to new ones), then upload the built files and the archive.
    async fn upload_outputs(
        &self,
        out_dir: &Path,
        archive_path: &Path,
        site_prefix: &str,
        artifact_key: &str,
    ) -> Result<String> {
        match self.blob.check_site_files(site_prefix).await {
            Ok(false) => {}
            // Present, or the probe itself failed: clear either way.
            _ => self.blob.remove_prefix(site_prefix).await?,
        }

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(out_dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        for path in &files {
            let rel = path
                .strip_prefix(out_dir)
                .context("built file escaped the output directory")?;
            let key = format!(
                "{site_prefix}/{}",
                rel.to_string_lossy().replace('\\', "/")
            );
            self.blob
                .upload_file(&key, path, content_type_for(path))
                .await?;
        }

        let bytes = tokio::fs::read(archive_path)
            .await
            .context("failed to read packaged archive")?;
        let artifact_url = self
            .blob
            .upload_buffer(artifact_key, bytes, Some("application/zip"))
            .await?;
        Ok(artifact_url)
    }
}
