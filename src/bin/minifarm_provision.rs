//! minifarm-provision - create the farm's resource tree on a CSE

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Duration;

use minifarm_agent::provision::{provision, ProvisionPlan};
use minifarm_agent::{HttpRemoteStore, StoreConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// CSE base URL.
    #[arg(long, env = "MINIFARM_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,
    /// Originator; also granted full access by the created policy.
    #[arg(long, env = "MINIFARM_ORIGIN", default_value = "SRaspberryPi_AI")]
    origin: String,
    #[arg(long, default_value = "TinyIoT")]
    cse: String,
    #[arg(long, default_value = "TinyFarm")]
    ae: String,
    /// Artifact path for the species model.
    #[arg(long, default_value = "/home/pi/minifarm/best.onnx")]
    species_model: String,
    /// Artifact path for the health model.
    #[arg(long, default_value = "/home/pi/minifarm/last.onnx")]
    health_model: String,
    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    url::Url::parse(&args.base_url)
        .map_err(|e| anyhow!("invalid CSE base url '{}': {}", args.base_url, e))?;

    let store = HttpRemoteStore::new(StoreConfig {
        base_url: args.base_url.clone(),
        origin: args.origin.clone(),
        timeout: Some(Duration::from_secs(args.timeout_secs.max(1))),
    });
    let plan = ProvisionPlan::farm(
        &args.cse,
        &args.ae,
        &args.origin,
        &args.species_model,
        &args.health_model,
    );

    log::info!("provisioning /{}/{} on {}", args.cse, args.ae, args.base_url);
    let report = provision(&store, &plan)?;
    log::info!(
        "done: {} created, {} already present, access policy {}",
        report.created.len(),
        report.existing.len(),
        report.acp_ri
    );
    Ok(())
}
