use std::path::Path;

use switchyard_core::SwitchyardConfig;
use tracing::{debug, info};

pub fn check(path: &Path) -> anyhow::Result<()> {
    debug!(path = %path.display(), "checking config");
    let config = SwitchyardConfig::from_file(path)?;
    config.validate()?;
    println!("{}", summary(&config)?);
    Ok(())
}

pub fn init(service: &str, output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", output.display());
    }
    let config = SwitchyardConfig::scaffold(service);
    std::fs::write(output, config.to_toml_string()?)?;
    info!(%service, output = %output.display(), "config scaffolded");
    println!("✓ Generated {}", output.display());
    Ok(())
}

fn summary(config: &SwitchyardConfig) -> anyhow::Result<String> {
    let timings = config.timings()?;
    let svc = &config.service;
    Ok(format!(
        "✓ {} is valid\n  \
         Strategy:     {}\n  \
         Route:        {}\n  \
         Environments: {} / {} (canary: {})\n  \
         Health:       every {:?}, give up after {:?}\n  \
         Monitoring:   sample every {:?}, bake {:?}\n  \
         Deadline:     {:?}",
        svc.name,
        svc.default_strategy,
        svc.route,
        svc.stable_environment,
        svc.candidate_environment,
        svc.canary_environment,
        timings.health_interval,
        timings.health_timeout,
        timings.sample_interval,
        timings.bake_time,
        timings.deployment_timeout,
    ))
}
