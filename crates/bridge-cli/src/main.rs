use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use bridge_core::{LinkConfig, Session};

#[derive(Debug, Parser)]
#[command(name = "bridge", version, about = "Autopilot companion-computer bridge")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate configuration without opening the link.
    Doctor,
    /// Start the session and the HTTP/realtime surface.
    Run,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    link: LinkCfg,
    http: HttpCfg,
}

#[derive(Debug, serde::Deserialize)]
struct LinkCfg {
    device: String,
    baud: u32,
    #[serde(default = "default_sys_id")]
    sys_id: u8,
    #[serde(default = "default_comp_id")]
    comp_id: u8,
    #[serde(default)]
    connect_on_startup: bool,
}

fn default_sys_id() -> u8 {
    255
}

fn default_comp_id() -> u8 {
    1
}

#[derive(Debug, serde::Deserialize)]
struct HttpCfg {
    bind: String,
}

impl From<&LinkCfg> for LinkConfig {
    fn from(c: &LinkCfg) -> Self {
        Self { device: c.device.clone(), baud: c.baud, sys_id: c.sys_id, comp_id: c.comp_id }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => {
            if let Err(e) = run(&cfg).await {
                tracing::error!("run: {:#}", e);
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    anyhow::ensure!(!cfg.link.device.is_empty(), "link.device missing");
    anyhow::ensure!(cfg.link.baud > 0, "link.baud invalid");
    anyhow::ensure!(!cfg.http.bind.is_empty(), "http.bind missing");
    cfg.http.bind.parse::<std::net::SocketAddr>().context("http.bind is not a valid address")?;

    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let session = Arc::new(Session::new(LinkConfig::from(&cfg.link)));

    if cfg.link.connect_on_startup {
        session.connect().await.map_err(|e| anyhow::anyhow!("{}", e.message)).context("connect at startup")?;
    }

    let addr: std::net::SocketAddr = cfg.http.bind.parse().context("http.bind is not a valid address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind http listener")?;
    info!(%addr, "http surface listening");

    let app = bridge_api::router(session.clone());

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("run: shutdown signal received");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await.context("http server")?;

    session.disconnect().await.map_err(|e| anyhow::anyhow!("{}", e.message)).context("disconnect on shutdown")?;
    info!("run: stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_toml() {
        let dir = std::env::temp_dir();
        let path = dir.join("bridge_cli_test_bad_config.toml");
        std::fs::write(&path, "not = [valid toml").unwrap();
        let result = load_config(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn loads_minimal_config() {
        let dir = std::env::temp_dir();
        let path = dir.join("bridge_cli_test_good_config.toml");
        std::fs::write(
            &path,
            r#"
            [link]
            device = "/dev/serial0"
            baud = 921600

            [http]
            bind = "127.0.0.1:8080"
            "#,
        )
        .unwrap();
        let cfg = load_config(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.link.sys_id, 255);
        assert_eq!(cfg.link.comp_id, 1);
        assert!(!cfg.link.connect_on_startup);
    }
}
