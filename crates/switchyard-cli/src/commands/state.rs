use std::path::Path;

use switchyard_state::DeploymentState;
use tracing::warn;

use super::open_store;

pub fn show(data_dir: &Path, service: &str) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    match store.get_deployment(service)? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => anyhow::bail!("no deployment recorded for {service}"),
    }
    Ok(())
}

pub fn list(data_dir: &Path) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    let records = store.list_deployments()?;
    if records.is_empty() {
        println!("No deployments recorded.");
    }
    for record in &records {
        println!("{}", one_line(record));
    }
    Ok(())
}

/// Drop a record left behind by an orchestrator that died mid-deploy.
///
/// A running deployment is only dropped with `force`.
pub fn forget(data_dir: &Path, service: &str, force: bool) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    let Some(record) = store.get_deployment(service)? else {
        anyhow::bail!("no deployment recorded for {service}");
    };
    if record.in_progress {
        if !force {
            anyhow::bail!(
                "{service} is mid-deploy to {} (use --force if no orchestrator is running)",
                record.target_version
            );
        }
        warn!(%service, target = %record.target_version, phase = ?record.phase, "dropping in-progress deployment record");
    }
    store.delete_deployment(service)?;
    println!("✓ Forgot deployment record for {service}");
    Ok(())
}

fn one_line(record: &DeploymentState) -> String {
    let status = if record.in_progress { "running" } else { "idle" };
    format!(
        "{:<20} {:<8} {:<12} live={} phase={:?}",
        record.service, status, record.current_version, record.live_environment, record.phase
    )
}
