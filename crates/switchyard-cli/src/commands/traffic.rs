use std::path::Path;

use switchyard_state::TrafficWeights;
use tracing::warn;

use super::open_store;

pub fn show(data_dir: &Path, route: &str) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    match store.get_route_weights(route)? {
        Some(weights) => {
            if !weights.is_complete() {
                warn!(%route, %weights, "stored weights do not sum to 100");
            }
            println!("{}", render(route, &weights));
        }
        None => println!("No weights recorded for route {route}."),
    }
    Ok(())
}

fn render(route: &str, weights: &TrafficWeights) -> String {
    let mut out = format!("Route {route}:");
    for (env, weight) in weights.iter() {
        let bar = "█".repeat(usize::from(weight) / 5);
        out.push_str(&format!("\n  {env:<12} {weight:>3}% {bar}"));
    }
    out
}
