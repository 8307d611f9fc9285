//! minifarm-agent - scheduled plant detection with a live camera stream
//!
//! Without arguments the agent runs detection at the configured hours.
//! `minifarm-agent test_camera` runs once immediately and exits.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use minifarm_agent::{
    Agent, AgentConfig, Camera, HttpRemoteStore, Interval, LocalClock, Scheduler, Shutdown,
    StreamServer,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run detection once now, then exit.
    #[value(name = "test_camera")]
    TestCamera,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Optional one-shot mode.
    #[arg(value_enum)]
    mode: Option<Mode>,
    /// TOML config file.
    #[arg(long, env = "MINIFARM_CONFIG")]
    config: Option<PathBuf>,
    /// Skip the MJPEG stream server.
    #[arg(long)]
    no_stream: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = AgentConfig::load(args.config.as_deref())?;
    log::info!(
        "minifarm-agent {} -> CSE {} as {}",
        env!("CARGO_PKG_VERSION"),
        cfg.store.base_url,
        cfg.store.origin
    );
    log::info!("deployment: {}", cfg.deployment_path);

    let camera = Camera::open(&cfg.camera)
        .with_context(|| format!("open camera {}", cfg.camera.device))?;

    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || handler_shutdown.trigger())
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let stream = if cfg.stream_enabled && !args.no_stream {
        Some(StreamServer::new(camera.clone(), cfg.stream.clone()).spawn()?)
    } else {
        None
    };

    let store = Arc::new(HttpRemoteStore::new(cfg.store.clone()));
    let agent = Agent::new(camera, store, &cfg);

    let mut scheduler = match args.mode {
        Some(Mode::TestCamera) => {
            log::info!("test_camera: running detection once");
            Scheduler::immediate()
        }
        None => {
            log::info!(
                "scheduled at hours {:?}, checking every {}s",
                cfg.trigger_hours,
                cfg.check_interval.as_secs()
            );
            Scheduler::scheduled(cfg.trigger_hours.iter().copied())
        }
    };
    let mut interval = Interval::new(cfg.check_interval);
    let stats = agent.run_scheduled(&mut scheduler, &mut interval, &LocalClock, &shutdown);
    log::info!(
        "stopping: {} checks, {} runs, {} failed",
        stats.checks,
        stats.runs,
        stats.failures
    );

    if let Some(stream) = stream {
        stream.stop()?;
    }
    if scheduler.is_done() && stats.failures > 0 {
        return Err(anyhow!("detection run failed"));
    }
    Ok(())
}
