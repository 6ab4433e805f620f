use std::path::Path;

use anyhow::Context as _;
use switchyard_state::{TargetingRule, ToggleConfig};
use switchyard_toggle::{Context, FeatureToggleStore, context_bucket, evaluate};
use tracing::debug;

use super::open_store;

pub fn set(
    data_dir: &Path,
    name: &str,
    enabled: bool,
    percentage: u8,
    rules: Option<&str>,
) -> anyhow::Result<()> {
    let targeting_rules: Option<Vec<TargetingRule>> = rules
        .map(|json| serde_json::from_str(json).context("parsing --rules"))
        .transpose()?;
    let store = FeatureToggleStore::new(open_store(data_dir)?);
    let toggle = store.set_toggle(
        name,
        ToggleConfig {
            enabled,
            rollout_percentage: percentage,
            targeting_rules,
        },
        None,
    )?;
    println!("✓ {name} v{} ({})", toggle.version, describe(enabled, percentage));
    Ok(())
}

pub fn get(data_dir: &Path, name: &str) -> anyhow::Result<()> {
    let store = FeatureToggleStore::new(open_store(data_dir)?);
    match store.get_toggle(name)? {
        Some(toggle) => println!("{}", serde_json::to_string_pretty(&toggle)?),
        None => anyhow::bail!("toggle {name} not found"),
    }
    Ok(())
}

pub fn eval(data_dir: &Path, name: &str, context: &str) -> anyhow::Result<()> {
    let context: Context = serde_json::from_str(context).context("parsing --context")?;
    let store = FeatureToggleStore::new(open_store(data_dir)?);
    let Some(toggle) = store.get_toggle(name)? else {
        anyhow::bail!("toggle {name} not found");
    };
    let on = evaluate(&toggle, &context);
    debug!(%name, bucket = context_bucket(&context), on, "toggle evaluated");
    println!("{}", if on { "on" } else { "off" });
    Ok(())
}

pub fn list(data_dir: &Path) -> anyhow::Result<()> {
    let store = FeatureToggleStore::new(open_store(data_dir)?);
    for toggle in store.list()? {
        let release = toggle.release.as_deref().unwrap_or("-");
        println!(
            "{:<24} {:<16} release={release}",
            toggle.name,
            describe(toggle.enabled, toggle.rollout_percentage)
        );
    }
    Ok(())
}

fn describe(enabled: bool, percentage: u8) -> String {
    if enabled {
        format!("on for {percentage}%")
    } else {
        "off".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let rules = r#"[{"attribute": "plan", "operator": "equals", "value": "enterprise"}]"#;

        set(dir.path(), "bulk-export", true, 100, Some(rules)).unwrap();

        let store = FeatureToggleStore::new(open_store(dir.path()).unwrap());
        let toggle = store.get_toggle("bulk-export").unwrap().unwrap();
        assert!(toggle.enabled);
        assert_eq!(toggle.targeting_rules.as_ref().map(Vec::len), Some(1));
        assert_eq!(toggle.release, None);
        drop(store);
        eval(dir.path(), "bulk-export", r#"{"plan": "enterprise"}"#).unwrap();
    }

    #[test]
    fn bad_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(set(dir.path(), "x", true, 100, Some("not json")).is_err());
        assert!(set(dir.path(), "x", true, 150, None).is_err());
        assert!(eval(dir.path(), "missing", "{}").is_err());
    }

    #[test]
    fn description() {
        assert_eq!(describe(true, 25), "on for 25%");
        assert_eq!(describe(false, 25), "off");
    }
}
