mod config;
mod errors;
mod logging;
mod mcp;
mod sandbox;
mod security;
mod server;
mod tools;

#[cfg(test)]
mod tests;

use crate::config::Config;
use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut root_override: Option<PathBuf> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() { eprintln!("--config requires a path"); std::process::exit(2); }
                config_path = Some(PathBuf::from(&args[i]));
            }
            "--root" => {
                i += 1;
                if i >= args.len() { eprintln!("--root requires a directory"); std::process::exit(2); }
                root_override = Some(PathBuf::from(&args[i]));
            }
            other => { eprintln!("unknown argument: {other}"); std::process::exit(2); }
        }
        i += 1;
    }

    let mut cfg = Config::discover(config_path.as_deref()).context("loading config")?;
    if root_override.is_some() {
        cfg.root.root_dir = root_override;
    }
    cfg.validate().context("validating config")?;

    let root = cfg.root_registry()?;
    let resolver = sandbox::PathResolver::new(root.clone());
    let registry = mcp::registry::ToolRegistry::new(&cfg, &resolver)?;

    let addr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port);
    info!(
        addr = %addr,
        base_path = %cfg.server.base_path,
        allowed_root = %root.get().display(),
        tools = ?registry.list_names(),
        "confine ready"
    );

    server::serve(server::AppState::new(cfg, root, registry)).await
}
