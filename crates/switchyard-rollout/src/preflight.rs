//! Pre-deployment checks, run concurrently before anything is mutated.
//!
//! Every check runs to completion even when another fails, so the caller
//! gets the whole list of problems in one pass.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use switchyard_core::SwitchyardConfig;
use switchyard_migrate::SchemaDatabase;

use crate::error::PreflightFailure;
use crate::options::DeployOptions;

/// What a check gets to look at.
pub struct PreflightContext<'a> {
    pub version: &'a str,
    pub options: &'a DeployOptions,
    pub config: &'a SwitchyardConfig,
}

#[async_trait]
pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &PreflightContext<'_>) -> anyhow::Result<()>;
}

/// Run every check and collect each failure.
pub async fn run_checks(
    checks: &[Arc<dyn PreflightCheck>],
    ctx: &PreflightContext<'_>,
) -> Vec<PreflightFailure> {
    let results = join_all(checks.iter().map(|check| async move {
        let outcome = check.run(ctx).await;
        (check.name().to_string(), outcome)
    }))
    .await;

    results
        .into_iter()
        .filter_map(|(check, outcome)| match outcome {
            Ok(()) => {
                debug!(%check, "preflight check passed");
                None
            }
            Err(e) => {
                warn!(%check, error = %e, "preflight check failed");
                Some(PreflightFailure {
                    check,
                    reason: format!("{e:#}"),
                })
            }
        })
        .collect()
}

/// The standard checks for a service's configuration.
pub fn default_checks(config: &SwitchyardConfig, database: Arc<dyn SchemaDatabase>) -> Vec<Arc<dyn PreflightCheck>> {
    let mut checks: Vec<Arc<dyn PreflightCheck>> = vec![
        Arc::new(DatabaseConnectivityCheck::new(database)),
        Arc::new(DependencyCheck::new(config.preflight.dependencies.clone())),
        Arc::new(ConfigurationCheck),
        Arc::new(SecretsCheck::new(config.preflight.required_secrets.clone())),
    ];
    if let Some(path) = &config.preflight.disk_path {
        checks.insert(
            0,
            Arc::new(DiskSpaceCheck::new(path.clone(), config.preflight.min_free_bytes)),
        );
    }
    checks
}

/// Free space on the filesystem holding `path`.
pub struct DiskSpaceCheck {
    path: PathBuf,
    min_free_bytes: u64,
}

impl DiskSpaceCheck {
    pub fn new(path: PathBuf, min_free_bytes: u64) -> Self {
        Self { path, min_free_bytes }
    }
}

fn free_bytes(path: PathBuf) -> anyhow::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(&path)?;
    // `fsblkcnt_t` is a `u32` on macOS but a `u64` on Linux.
    #[allow(clippy::useless_conversion)]
    let blocks = u64::from(stat.blocks_available());
    #[allow(clippy::useless_conversion)]
    let fragment = u64::from(stat.fragment_size());
    Ok(blocks * fragment)
}

#[async_trait]
impl PreflightCheck for DiskSpaceCheck {
    fn name(&self) -> &str {
        "disk_space"
    }

    async fn run(&self, _ctx: &PreflightContext<'_>) -> anyhow::Result<()> {
        let path = self.path.clone();
        let free = tokio::task::spawn_blocking(move || free_bytes(path)).await??;
        if free < self.min_free_bytes {
            anyhow::bail!(
                "{} has {free} bytes free, need {}",
                self.path.display(),
                self.min_free_bytes
            );
        }
        Ok(())
    }
}

pub struct DatabaseConnectivityCheck {
    database: Arc<dyn SchemaDatabase>,
}

impl DatabaseConnectivityCheck {
    pub fn new(database: Arc<dyn SchemaDatabase>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl PreflightCheck for DatabaseConnectivityCheck {
    fn name(&self) -> &str {
        "database_connectivity"
    }

    async fn run(&self, _ctx: &PreflightContext<'_>) -> anyhow::Result<()> {
        self.database.ping().await
    }
}

/// Every `host:port` dependency must resolve.
pub struct DependencyCheck {
    dependencies: Vec<String>,
}

impl DependencyCheck {
    pub fn new(dependencies: Vec<String>) -> Self {
        Self { dependencies }
    }
}

#[async_trait]
impl PreflightCheck for DependencyCheck {
    fn name(&self) -> &str {
        "dependencies"
    }

    async fn run(&self, _ctx: &PreflightContext<'_>) -> anyhow::Result<()> {
        let lookups = join_all(self.dependencies.iter().map(|dep| async move {
            let resolved = tokio::net::lookup_host(dep.as_str()).await;
            (dep, resolved.map(|mut addrs| addrs.next().is_some()))
        }))
        .await;

        let unresolved: Vec<String> = lookups
            .into_iter()
            .filter_map(|(dep, resolved)| match resolved {
                Ok(true) => None,
                Ok(false) => Some(format!("{dep}: no addresses")),
                Err(e) => Some(format!("{dep}: {e}")),
            })
            .collect();
        if !unresolved.is_empty() {
            anyhow::bail!("unresolved: {}", unresolved.join(", "));
        }
        Ok(())
    }
}

/// Options and configuration agree with each other.
pub struct ConfigurationCheck;

#[async_trait]
impl PreflightCheck for ConfigurationCheck {
    fn name(&self) -> &str {
        "configuration"
    }

    async fn run(&self, ctx: &PreflightContext<'_>) -> anyhow::Result<()> {
        ctx.config.validate()?;
        let problems = ctx.options.problems();
        if !problems.is_empty() {
            anyhow::bail!("{}", problems.join("; "));
        }
        Ok(())
    }
}

/// Required secrets are present and non-empty in the deploy's env map.
pub struct SecretsCheck {
    required: Vec<String>,
}

impl SecretsCheck {
    pub fn new(required: Vec<String>) -> Self {
        Self { required }
    }
}

#[async_trait]
impl PreflightCheck for SecretsCheck {
    fn name(&self) -> &str {
        "secrets"
    }

    async fn run(&self, ctx: &PreflightContext<'_>) -> anyhow::Result<()> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|name| ctx.options.env.get(*name).is_none_or(|v| v.trim().is_empty()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("missing or empty: {}", missing.join(", "));
        }
        Ok(())
    }
}
