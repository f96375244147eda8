use anyhow::{bail, Result};
use serde::Serialize;
use storage_gateway_core::{GatewayConfig, Registry};
use tracing::info;

#[derive(Debug, Serialize)]
struct BackendSummary {
    name: String,
    kind: String,
    prefix: String,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    bind_address: String,
    part_size: usize,
    backends: Vec<BackendSummary>,
}

impl CheckReport {
    fn print(&self) {
        println!("\n=== Gateway Configuration ===\n");
        println!("Bind Address: {}", self.bind_address);
        println!("Part Size:    {} bytes", self.part_size);
        println!("\nBackends:");
        for backend in &self.backends {
            println!("  {:<16} {:<12} {}", backend.name, backend.kind, backend.prefix);
        }
        println!("\nResult: VALID");
    }
}

pub async fn run(config_path: &str, format: &str) -> Result<()> {
    info!("Checking configuration: {}", config_path);
    let config = GatewayConfig::load(config_path).await?;
    let registry = Registry::from_config(&config, None)?;

    let report = CheckReport {
        bind_address: config.server.bind_address.to_string(),
        part_size: config.server.part_size,
        backends: registry
            .registrations()
            .iter()
            .map(|r| BackendSummary {
                name: r.name.clone(),
                kind: r.backend.kind().to_string(),
                prefix: r.prefix.to_string(),
            })
            .collect(),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => report.print(),
        other => bail!("unsupported output format: {}", other),
    }
    Ok(())
}
