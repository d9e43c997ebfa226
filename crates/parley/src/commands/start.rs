//! Start command - launches the Parley server.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use parley_config::ParleyConfig;
use parley_pool::PoolConfig;
use parley_server::{AppState, BargeInConfig, RegistryConfig, Server, ServerConfig};
use parley_session::{MemoryStore, SessionConfig};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Address to bind to, e.g. 0.0.0.0:8090 (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Maximum concurrent connections (overrides config)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Disable the connection limit
    #[arg(long)]
    pub no_limit: bool,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.loaded.config.clone();
    apply_overrides(&mut config, &args);
    config.validate()?;

    let server_config = server_config(&config)?;
    let session_config = session_config(&config);
    let addr = server_config.bind_address;

    if ctx.verbose {
        for path in ctx.loaded.loaded_from() {
            println!("Config: {}", path.display());
        }
    }

    let state = AppState::new(server_config, session_config, Arc::new(MemoryStore::new()))
        .with_pool_configs(pool_configs(&config));

    // Pools need a domain factory, which only an embedding application has.
    for name in state.unattached_pools() {
        tracing::warn!(
            pool = %name,
            "Pool configured but no resource factory is attached; it stays idle"
        );
    }

    let server = Server::from_state(state);

    println!("Parley server starting on http://{}", addr);
    println!("Press Ctrl+C to stop");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await?;

    println!("Parley server stopped");
    Ok(())
}

fn apply_overrides(config: &mut ParleyConfig, args: &StartArgs) {
    if let Some(ref bind) = args.bind {
        let mut server = config.server();
        server.bind = bind.clone();
        config.server = Some(server);
    }

    if args.max_connections.is_some() || args.no_limit {
        let mut connections = config.connections();
        if let Some(max) = args.max_connections {
            connections.max_connections = max;
        }
        if args.no_limit {
            connections.limit_enabled = false;
        }
        config.connections = Some(connections);
    }
}

/// Build the server's runtime config from the `[server]`, `[connections]`
/// and `[barge_in]` sections.
pub fn server_config(config: &ParleyConfig) -> Result<ServerConfig> {
    let server = config.server();
    let connections = config.connections();
    let barge_in = config.barge_in();

    let registry = RegistryConfig::new()
        .with_max_connections(connections.max_connections)
        .with_limit_enabled(connections.limit_enabled)
        .with_queue_capacity(connections.queue_capacity)
        .with_close_grace(connections.close_grace());

    Ok(ServerConfig::new()
        .with_bind_address(server.bind_address()?)
        .with_max_ws_message_size(server.max_ws_message_size)
        .with_registry(registry)
        .with_barge_in(
            BargeInConfig::new()
                .with_debounce(barge_in.debounce())
                .with_task_grace(barge_in.task_grace()),
        ))
}

pub fn session_config(config: &ParleyConfig) -> SessionConfig {
    let section = config.session();

    let mut session = SessionConfig::new()
        .with_max_age(section.max_age())
        .with_sweep_interval(section.sweep_interval());
    session = match section.store_ttl() {
        Some(ttl) => session.with_store_ttl(ttl),
        None => session.without_store_ttl(),
    };
    if let Some(interval) = section.auto_refresh() {
        session = session.with_auto_refresh(interval);
    }
    session
}

/// One [`PoolConfig`] per `[pools.<name>]` section, in name order.
pub fn pool_configs(config: &ParleyConfig) -> Vec<PoolConfig> {
    config
        .pools
        .iter()
        .map(|(name, section)| {
            let mut pool = PoolConfig::new(name.clone())
                .with_size(section.size)
                .with_max_dedicated(section.max_dedicated)
                .with_session_awareness(section.session_aware)
                .with_max_age(section.max_age())
                .with_max_prewarm_backoff(section.max_prewarm_backoff());
            if let Some(interval) = section.prewarm_interval() {
                pool = pool.with_prewarm_interval(interval);
            }
            if let Some(interval) = section.cleanup_interval() {
                pool = pool.with_cleanup_interval(interval);
            }
            pool
        })
        .collect()
}
