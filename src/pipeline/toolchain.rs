//! The external static-site build toolchain, driven as a subprocess.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Seam over the opaque build toolchain so tests can fake the expensive
/// subprocess step.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Install project dependencies inside the generated project.
    async fn install(&self, project_dir: &Path) -> Result<()>;
    /// Run the build; returns the directory holding the built output.
    async fn build(&self, project_dir: &Path) -> Result<PathBuf>;
}

/// Runs configured install/build commands with a wall-clock timeout, so a
/// hung subprocess cannot pin a consumer slot indefinitely.
pub struct CommandToolchain {
    install_command: Vec<String>,
    build_command: Vec<String>,
    output_dir: String,
    timeout: Duration,
}

impl CommandToolchain {
    pub fn new(
        install_command: Vec<String>,
        build_command: Vec<String>,
        output_dir: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            install_command,
            build_command,
            output_dir: output_dir.to_string(),
            timeout,
        }
    }

    async fn run(&self, argv: &[String], dir: &Path) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .context("toolchain command is empty")?;
        debug!(%program, dir = %dir.display(), "running toolchain command");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program)
                .args(args)
                .current_dir(dir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| anyhow!("toolchain command '{program}' timed out after {:?}", self.timeout))?
        .with_context(|| format!("failed to spawn toolchain command '{program}'"))?;

        if !output.status.success() {
            bail!(
                "toolchain command '{program}' exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            );
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim_end();
    match trimmed.char_indices().rev().nth(799) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    async fn install(&self, project_dir: &Path) -> Result<()> {
        self.run(&self.install_command, project_dir).await
    }

    async fn build(&self, project_dir: &Path) -> Result<PathBuf> {
        self.run(&self.build_command, project_dir).await?;
        let out = project_dir.join(&self.output_dir);
        if tokio::fs::metadata(&out).await.is_err() {
            bail!(
                "toolchain produced no output directory at '{}'",
                out.display()
            );
        }
        Ok(out)
    }
}
