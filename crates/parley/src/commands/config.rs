//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};

use parley_config::{ConfigPaths, ParleyConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the merged configuration and the files it came from
    Show,

    /// Show which config files are checked and their precedence
    Which,

    /// Write a config file with every default spelled out
    Init {
        /// Create project-local config (./parley.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local, force } => cmd_init(local, force),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;

    if ctx.json_output {
        let sources: Vec<String> = loaded
            .loaded_from()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let output = serde_json::json!({
            "sources": sources,
            "warnings": loaded.warnings,
            "pools_note": (!loaded.config.pools.is_empty()).then_some(POOLS_NOTE),
            "config": effective(&loaded.config),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("# Parley Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("# No config files loaded (using defaults)\n");
    } else {
        println!("# Config files:");
        for source in &sources {
            println!("#   {}", source.display());
        }
        println!();
    }

    for w in &loaded.warnings {
        println!("# warning: {}", w);
    }

    if let Err(e) = loaded.config.validate() {
        println!("# invalid: {}\n", e);
    }

    if !loaded.config.pools.is_empty() {
        println!("# {}\n", POOLS_NOTE);
    }

    print!("{}", effective(&loaded.config).to_toml()?);
    Ok(())
}

/// `parley start` has no resource factories of its own.
const POOLS_NOTE: &str =
    "[pools.*] sections apply only once an embedding application attaches a factory";

/// Every section filled in, so `show` prints the values actually in effect.
fn effective(config: &ParleyConfig) -> ParleyConfig {
    ParleyConfig {
        server: Some(config.server()),
        connections: Some(config.connections()),
        session: Some(config.session()),
        barge_in: Some(config.barge_in()),
        pools: config.pools.clone(),
        logging: Some(config.logging()),
    }
}

fn cmd_which(ctx: &Context) -> Result<()> {
    println!("Config file search order (later overrides earlier):\n");

    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    Ok(())
}

fn cmd_init(local: bool, force: bool) -> Result<()> {
    let paths = ConfigPaths::discover();
    let path = if local {
        paths.project_file()
    } else {
        paths
            .user_file()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    effective(&ParleyConfig::new()).save(&path)?;
    println!("Created {}", path.display());
    Ok(())
}

fn cmd_path() -> Result<()> {
    match ConfigPaths::discover().user_file() {
        Some(path) => println!("{}", path.display()),
        None => anyhow::bail!("Could not determine config directory"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_fills_every_section() {
        let config = ParleyConfig::from_toml("[barge_in]\ndebounce_ms = 5").unwrap();
        let full = effective(&config);

        assert!(full.server.is_some());
        assert!(full.connections.is_some());
        assert!(full.session.is_some());
        assert!(full.logging.is_some());
        assert_eq!(full.barge_in().debounce_ms, 5);

        let text = full.to_toml().unwrap();
        assert!(text.contains("[connections]"));
        assert!(text.contains("debounce_ms = 5"));
    }
}
