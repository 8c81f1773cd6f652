mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use toolmux::transport::{http, stdio};
use toolmux::{Dispatcher, ModuleLoader, RpcService, SystemService, ToolRegistry};

use crate::config::{build_model, GatewayConfig, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "toolmux-gateway")]
#[command(version)]
#[command(about = "Serve the toolmux registry and plan dispatcher over JSON-RPC")]
struct Cli {
    /// Gateway config file (TOML). Defaults to ./toolmux.toml when present.
    #[arg(long, env = "TOOLMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the HTTP transport, overriding `bind_addr`.
    #[arg(long)]
    bind: Option<String>,

    /// Tools document (YAML), overriding `tools_config`.
    #[arg(long, env = "TOOLMUX_TOOLS")]
    tools: Option<PathBuf>,

    /// Serve line-delimited JSON-RPC on stdin/stdout instead of HTTP.
    #[arg(long)]
    stdio: bool,

    /// Fail startup if the tools document cannot be loaded.
    #[arg(long)]
    strict: bool,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn resolve_config(&self) -> anyhow::Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::load(path, true)?,
            None => GatewayConfig::load(&PathBuf::from(DEFAULT_CONFIG_FILE), false)?,
        };
        if let Some(bind) = &self.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(tools) = &self.tools {
            config.tools_config = Some(tools.clone());
        }
        if self.strict {
            config.strict_load = true;
        }
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries responses in stdio mode
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let config = cli.resolve_config()?;

    let registry = Arc::new(ToolRegistry::new());
    if config.builtin_tools {
        SystemService::install(&registry);
    }

    let loader = Arc::new(ModuleLoader::new().context("failed to initialise module runtime")?);
    if let Some(path) = &config.tools_config {
        match loader.load_file(path, &registry) {
            Ok(summary) => info!(
                "Registered {} dynamic tools from {} services",
                summary.tools, summary.services
            ),
            Err(e) if config.strict_load => {
                return Err(anyhow::Error::new(e).context(format!("failed to load tools from {}", path.display())));
            }
            Err(e) => error!("Failed to register dynamic tools from {}: {}", path.display(), e),
        }
    }

    let model = build_model(&config.model)?;
    let dispatcher = Arc::new(Dispatcher::new(registry, model).with_config(config.dispatcher_config()));

    let mut service = RpcService::new(dispatcher);
    if config.allow_remote_registration {
        info!("Remote tool registration enabled");
        service = service.with_remote_registration(loader);
    }

    if cli.stdio {
        stdio::serve_stdio(&service).await?;
    } else {
        http::serve(service, &config.bind_addr)
            .await
            .with_context(|| format!("HTTP server on {} failed", config.bind_addr))?;
    }
    Ok(())
}
