//! Status command - shows live connection, session and pool statistics.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;
use crate::client::{Client, Stats};

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show per-session and per-topic connection counts
    #[arg(short, long)]
    pub detailed: bool,
}

/// Status response for JSON output.
#[derive(Debug, Serialize)]
struct StatusOutput {
    running: bool,
    version: Option<String>,
    server_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<Stats>,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let client = Client::new(&ctx.server_url)?;

    let probe = async {
        let health = client.health().await?;
        let stats = client.stats().await?;
        anyhow::Ok((health.version, stats))
    };

    match probe.await {
        Ok((version, stats)) => {
            if ctx.json_output {
                let output = StatusOutput {
                    running: true,
                    version: Some(version),
                    server_url: ctx.server_url.clone(),
                    stats: Some(stats),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_running(&version, &stats, args.detailed, ctx);
            }
        }
        Err(e) => {
            if ctx.json_output {
                let output = StatusOutput {
                    running: false,
                    version: None,
                    server_url: ctx.server_url.clone(),
                    stats: None,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let red = Style::new().red();
                let dim = Style::new().dim();

                println!();
                println!("{}", style("Parley Server Status").bold());
                println!("{}", dim.apply_to("─".repeat(40)));
                println!();
                println!(
                    "  {} {}",
                    dim.apply_to("Status:"),
                    red.apply_to("● not running")
                );
                println!("  {} {}", dim.apply_to("Server:"), ctx.server_url);

                if ctx.verbose {
                    println!();
                    println!("  {} {}", dim.apply_to("Error:"), e);
                }

                println!();
                println!("  {}", dim.apply_to("Start the server with: parley start"));
                println!();
            }
        }
    }

    Ok(())
}

fn print_running(version: &str, stats: &Stats, detailed: bool, ctx: &Context) {
    let green = Style::new().green();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();

    println!();
    println!("{}", style("Parley Server Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!(
        "  {} {}",
        dim.apply_to("Status:"),
        green.apply_to("● running")
    );
    println!("  {} {}", dim.apply_to("Version:"), version);
    println!("  {} {}", dim.apply_to("Server:"), ctx.server_url);
    println!("  {} {}s", dim.apply_to("Uptime:"), stats.uptime_secs);
    println!();

    let conns = &stats.connections;
    let limit = if conns.limit_enabled {
        conns.max_connections.to_string()
    } else {
        "unlimited".to_string()
    };
    println!(
        "  {} {} / {}",
        dim.apply_to("Connections:"),
        conns.connections,
        limit
    );
    if conns.rejected_count > 0 {
        println!(
            "  {} {}",
            dim.apply_to("Rejected:"),
            yellow.apply_to(conns.rejected_count)
        );
    }
    if conns.dropped_messages > 0 {
        println!(
            "  {} {}",
            dim.apply_to("Dropped messages:"),
            yellow.apply_to(conns.dropped_messages)
        );
    }
    println!("  {} {}", dim.apply_to("Sessions:"), stats.sessions);
    println!(
        "  {} {} handled, {} suppressed",
        dim.apply_to("Barge-in:"),
        stats.barge_in.handled,
        stats.barge_in.suppressed
    );

    if !stats.pools.is_empty() {
        println!();
        println!("  {}", dim.apply_to("Pools:"));
        for pool in &stats.pools {
            println!(
                "    {:<12} warm {}/{}  dedicated {}/{}",
                pool.name,
                pool.warm_available,
                pool.warm_capacity,
                pool.dedicated_active,
                pool.dedicated_capacity
            );
        }
    }

    if detailed {
        println!();
        println!("{}", dim.apply_to("─".repeat(40)));
        for (label, counts) in [("Sessions", &conns.by_session), ("Topics", &conns.by_topic)] {
            println!();
            println!("  {}", dim.apply_to(format!("{}:", label)));
            if counts.is_empty() {
                println!("    {}", dim.apply_to("(none)"));
            }
            for (key, count) in counts {
                println!("    {:<24} {}", key, count);
            }
        }
    }

    println!();
}
