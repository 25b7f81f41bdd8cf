use super::model::{BuildStatusView, Site, SiteRevision};
use crate::model::{BuildMode, BuildStage, BuildStatus, SiteStatus};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// build_jobs

#[instrument(skip_all)]
pub async fn create_build_job(
    pool: &Pool,
    tenant_id: &str,
    site_id: &str,
    mode: BuildMode,
    trigger: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO build_jobs (id, tenant_id, site_id, status, mode, trigger_reason) \
         VALUES (?, ?, ?, 'queued', ?, ?)",
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(site_id)
    .bind(mode.as_str())
    .bind(trigger)
    .execute(pool)
    .await?;
    Ok(id)
}

/// True while the job row is still awaiting its first attempt.
#[instrument(skip_all)]
pub async fn job_is_pending(pool: &Pool, build_id: &str) -> Result<bool> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM build_jobs WHERE id = ?")
            .bind(build_id)
            .fetch_optional(pool)
            .await?;
    Ok(status.as_deref() == Some("queued"))
}

#[instrument(skip_all)]
pub async fn set_job_retry_count(pool: &Pool, build_id: &str, retry_count: u32) -> Result<()> {
    sqlx::query("UPDATE build_jobs SET retry_count = ? WHERE id = ?")
        .bind(retry_count as i64)
        .bind(build_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Transition queued → running. `started_at` is set exactly once; a row in
/// any other status is left untouched (status only moves forward).
#[instrument(skip_all)]
pub async fn mark_job_running(pool: &Pool, build_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE build_jobs SET status = 'running', \
         started_at = COALESCE(started_at, CURRENT_TIMESTAMP) \
         WHERE id = ? AND status = 'queued'",
    )
    .bind(build_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Best-effort progress write; percent never decreases thanks to the
/// `MAX(percent, ?)` guard, and only running jobs are touched.
#[instrument(skip_all)]
pub async fn update_job_progress(
    pool: &Pool,
    build_id: &str,
    stage: BuildStage,
    percent: u8,
    message: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE build_jobs SET stage = ?, percent = MAX(percent, ?), message = ? \
         WHERE id = ? AND status = 'running'",
    )
    .bind(stage.as_str())
    .bind(percent as i64)
    .bind(message)
    .bind(build_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_job_revision(pool: &Pool, build_id: &str, revision_id: &str) -> Result<()> {
    sqlx::query("UPDATE build_jobs SET revision_id = ? WHERE id = ?")
        .bind(revision_id)
        .bind(build_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn mark_job_failed(
    pool: &Pool,
    build_id: &str,
    stage: Option<BuildStage>,
    error: &str,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE build_jobs SET status = 'failed', stage = COALESCE(?, stage), error = ?, \
         completed_at = COALESCE(completed_at, CURRENT_TIMESTAMP) \
         WHERE id = ? AND status = 'running'",
    )
    .bind(stage.map(|s| s.as_str()))
    .bind(error)
    .bind(build_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Terminal success: uploaded, percent 100, artifact coordinates recorded.
#[instrument(skip_all)]
pub async fn mark_job_uploaded(
    pool: &Pool,
    build_id: &str,
    artifact_url: &str,
    storage_bucket: &str,
    storage_key_prefix: &str,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE build_jobs SET status = 'uploaded', stage = 'deploy', percent = 100, \
         artifact_url = ?, storage_bucket = ?, storage_key_prefix = ?, \
         completed_at = COALESCE(completed_at, CURRENT_TIMESTAMP) \
         WHERE id = ? AND status = 'running'",
    )
    .bind(artifact_url)
    .bind(storage_bucket)
    .bind(storage_key_prefix)
    .bind(build_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn get_build_status(pool: &Pool, build_id: &str) -> Result<Option<BuildStatusView>> {
    let row = sqlx::query(
        "SELECT id, site_id, status, stage, percent, message, error, retry_count, \
         started_at, completed_at FROM build_jobs WHERE id = ?",
    )
    .bind(build_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status_str: String = row.get("status");
    let status = BuildStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown build status '{status_str}'"))?;
    let stage = row
        .get::<Option<String>, _>("stage")
        .as_deref()
        .and_then(BuildStage::parse);

    Ok(Some(BuildStatusView {
        build_id: row.get("id"),
        site_id: row.get("site_id"),
        status,
        stage,
        percent: row.get("percent"),
        message: row.get("message"),
        error: row.get("error"),
        retry_count: row.get("retry_count"),
        started_at: row.get::<Option<DateTime<Utc>>, _>("started_at"),
        completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
    }))
}

// ---------------------------------------------------------------------------
// sites

fn site_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Site> {
    let status_str: String = row.get("status");
    let status = SiteStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown site status '{status_str}'"))?;
    let prev_status = row
        .get::<Option<String>, _>("prev_status")
        .as_deref()
        .and_then(SiteStatus::parse);
    Ok(Site {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        status,
        prev_status,
        frozen_at: row.get::<Option<DateTime<Utc>>, _>("frozen_at"),
        theme_config: row.get("theme_config"),
        supports_fragment_patch: row.get::<i64, _>("supports_fragment_patch") != 0,
    })
}

#[instrument(skip_all)]
pub async fn create_site(
    pool: &Pool,
    id: &str,
    tenant_id: &str,
    name: Option<&str>,
    status: SiteStatus,
    theme_config: Option<&str>,
    supports_fragment_patch: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO sites (id, tenant_id, name, status, theme_config, supports_fragment_patch) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(name)
    .bind(status.as_str())
    .bind(theme_config)
    .bind(supports_fragment_patch as i64)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_site(pool: &Pool, site_id: &str) -> Result<Option<Site>> {
    let row = sqlx::query(
        "SELECT id, tenant_id, name, status, prev_status, frozen_at, theme_config, \
         supports_fragment_patch FROM sites WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(site_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(site_from_row).transpose()
}

/// Published, non-deleted sites of a tenant. Frozen/draft/archived sites
/// are excluded here so they never enter the debounce maps.
#[instrument(skip_all)]
pub async fn list_published_sites(pool: &Pool, tenant_id: &str) -> Result<Vec<Site>> {
    let rows = sqlx::query(
        "SELECT id, tenant_id, name, status, prev_status, frozen_at, theme_config, \
         supports_fragment_patch FROM sites \
         WHERE tenant_id = ? AND deleted_at IS NULL AND status = 'published' \
         ORDER BY id",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(site_from_row).collect()
}

/// Bulk freeze: every active, non-frozen site of the tenant captures its
/// current status into `prev_status` and flips to frozen. Returns the ids
/// of affected sites; idempotent (a second call affects nothing).
#[instrument(skip_all)]
pub async fn freeze_tenant_sites(pool: &Pool, tenant_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "UPDATE sites SET prev_status = status, status = 'frozen', \
         frozen_at = CURRENT_TIMESTAMP \
         WHERE tenant_id = ? AND deleted_at IS NULL AND status != 'frozen' \
         RETURNING id",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

/// Reverse of [`freeze_tenant_sites`]: only currently-frozen sites are
/// touched, each restored to its captured status (draft when none was
/// captured), with `prev_status`/`frozen_at` cleared.
#[instrument(skip_all)]
pub async fn unfreeze_tenant_sites(pool: &Pool, tenant_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "UPDATE sites SET status = COALESCE(prev_status, 'draft'), prev_status = NULL, \
         frozen_at = NULL \
         WHERE tenant_id = ? AND deleted_at IS NULL AND status = 'frozen' \
         RETURNING id",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

// ---------------------------------------------------------------------------
// site_revisions

#[instrument(skip_all)]
pub async fn latest_revision(pool: &Pool, site_id: &str) -> Result<Option<SiteRevision>> {
    let row = sqlx::query(
        "SELECT id, site_id, content FROM site_revisions WHERE site_id = ? \
         ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(site_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| SiteRevision {
        id: r.get("id"),
        site_id: r.get("site_id"),
        content: r.get("content"),
    }))
}

#[instrument(skip_all)]
pub async fn create_revision(pool: &Pool, site_id: &str, content: &str) -> Result<SiteRevision> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO site_revisions (id, site_id, content) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(site_id)
        .bind(content)
        .execute(pool)
        .await?;
    Ok(SiteRevision {
        id,
        site_id: site_id.to_string(),
        content: content.to_string(),
    })
}
