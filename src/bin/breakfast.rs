//! Runs the breakfast demo.
//!
//! Usage: `breakfast [config.yaml]`. Prints the episode report as JSON.

use anyhow::Result;
use fanin::breakfast::{make_breakfast, KitchenTimings};
use fanin::CoordinatorConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CoordinatorConfig::from_yaml_file(&path)?,
        None => CoordinatorConfig::default().with_name("breakfast"),
    };

    let output = make_breakfast(config, KitchenTimings::default()).await?;
    info!("Served: {}", serde_json::to_string(&output.value)?);
    println!("{}", output.report.to_json_pretty()?);
    Ok(())
}
