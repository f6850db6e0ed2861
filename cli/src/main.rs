//! chainpilot CLI — check endpoint liveness and follow block heights.
//!
//! Usage:
//! ```bash
//! # Probe every endpoint of every configured chain
//! chainpilot health
//!
//! # Latest height of one chain, read through a live endpoint
//! chainpilot height --chain osmosis
//!
//! # Node and sync status reported by each endpoint of a chain
//! chainpilot status --chain osmosis
//!
//! # Print the next 10 heights as they are produced
//! chainpilot watch --chain osmosis --count 10 --stream
//!
//! # Print the sample configuration
//! chainpilot config > chainpilot.yaml
//! ```

mod logging;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};

use chainpilot_core::{ChainConfig, ChainEndpoint, ChainPilot, PilotConfig, PilotError};
use chainpilot_http::wire::StatusResult;
use chainpilot_http::HttpEndpoint;
use chainpilot_ws::{websocket_url, StreamingEndpoint};

const WATCH_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "health" => cmd_health(&args[2..]).await,
        "height" => cmd_height(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "watch" => cmd_watch(&args[2..]).await,
        "config" => cmd_config(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("chainpilot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainpilot {}", env!("CARGO_PKG_VERSION"));
    println!("Track live endpoints and block heights of replicated chains\n");
    println!("USAGE:");
    println!("    chainpilot <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    health     Probe every endpoint and print its liveness");
    println!("    height     Latest block height of a chain");
    println!("    status     Node and sync status of each endpoint of a chain");
    println!("    watch      Print new block heights until interrupted");
    println!("    config     Print the configuration as YAML");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --config <PATH>      YAML or JSON config file  [default: built-in sample]");
    println!("    --chain <NAME>       Chain to use  [default: default_chain from config]");
    println!("    --count <N>          watch: stop after N heights");
    println!("    --stream             watch: derive WebSocket feeds from rpc_addrs");
    println!("    --log-level <LEVEL>  Override log.level from config");
    println!("    --json-logs          Emit JSON structured logs");
}

/// Load the config named by `--config`, apply logging flags and install the
/// subscriber.
fn load_config(args: &[String]) -> anyhow::Result<PilotConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => PilotConfig::from_path(&path).with_context(|| format!("loading {path}"))?,
        None => PilotConfig::default_config(),
    };
    if let Some(level) = parse_flag(args, "--log-level") {
        config.log.level = level;
    }
    if has_flag(args, "--json-logs") {
        config.log.json = true;
    }
    logging::init_tracing(&config.log);
    Ok(config)
}

fn build_pilot(config: PilotConfig, stream: bool) -> anyhow::Result<ChainPilot> {
    let pilot = ChainPilot::new(config, |_, chain| endpoints(chain, stream))?;
    Ok(pilot)
}

/// HTTP endpoints for `chain`. `ws_addrs` pair with `rpc_addrs` by position;
/// with `stream` set, endpoints without one get a feed at the RPC host's
/// `/websocket` path.
fn endpoints(chain: &ChainConfig, stream: bool) -> Result<Vec<Arc<dyn ChainEndpoint>>, PilotError> {
    let mut endpoints: Vec<Arc<dyn ChainEndpoint>> = Vec::with_capacity(chain.rpc_addrs.len());
    for (i, http) in HttpEndpoint::for_chain(chain)?.into_iter().enumerate() {
        let ws = chain
            .ws_addrs
            .get(i)
            .cloned()
            .or_else(|| stream.then(|| websocket_url(http.url())));
        endpoints.push(match ws {
            Some(ws) => StreamingEndpoint::arc(http, ws),
            None => Arc::new(http),
        });
    }
    Ok(endpoints)
}

fn chain_arg(args: &[String], config: &PilotConfig) -> anyhow::Result<String> {
    if let Some(chain) = parse_flag(args, "--chain") {
        config.chain(&chain)?;
        return Ok(chain);
    }
    match config.default_chain_name() {
        Some(chain) => Ok(chain.to_string()),
        None => bail!("--chain is required when the config has no default_chain"),
    }
}

async fn cmd_health(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let chains: Vec<String> = match parse_flag(args, "--chain") {
        Some(chain) => vec![chain],
        None => config.chains.keys().cloned().collect(),
    };
    let pilot = build_pilot(config, false)?;

    for chain in &chains {
        let chain_id = &pilot.config().chain(chain)?.chain_id;
        let report = pilot.monitor().tick(chain).await;
        println!("{chain} ({chain_id}): {}/{} healthy", report.healthy, report.probed);
        for status in pilot.endpoint_status(chain)? {
            println!("  {:<48} {}", status.url, status.health);
        }
    }
    Ok(())
}

async fn cmd_height(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let chain = chain_arg(args, &config)?;
    let pilot = build_pilot(config, false)?;

    pilot.monitor().tick(&chain).await;
    let endpoint = pilot.select_endpoint(&chain)?;

    let start = Instant::now();
    let height = endpoint
        .latest_height()
        .await
        .with_context(|| format!("querying {}", endpoint.url()))?;
    let latency = start.elapsed();

    println!("  Chain:    {chain}");
    println!("  Endpoint: {}", endpoint.url());
    println!("  Height:   {height}");
    println!("  Latency:  {}ms", latency.as_millis());
    Ok(())
}

async fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let chain = chain_arg(args, &config)?;
    let chain_config = config.chain(&chain)?;

    println!("{chain} ({}):", chain_config.chain_id);
    for endpoint in HttpEndpoint::for_chain(chain_config)? {
        match endpoint.status().await {
            Ok(status) => print!("{}", format_status(endpoint.url(), &status)),
            Err(e) => println!("  {:<48} unreachable: {e}", endpoint.url()),
        }
    }
    Ok(())
}

fn format_status(url: &str, status: &StatusResult) -> String {
    let node = &status.node_info;
    let sync = &status.sync_info;
    let mut out = format!("  {url}\n");
    out.push_str(&format!("    Network:  {}\n", node.network));
    out.push_str(&format!("    Moniker:  {}\n", node.moniker));
    out.push_str(&format!("    Version:  {}\n", node.version));
    out.push_str(&format!("    Height:   {}\n", sync.latest_block_height));
    out.push_str(&format!("    Time:     {}\n", sync.latest_block_time));
    if sync.catching_up {
        out.push_str("    Syncing:  catching up\n");
    }
    out
}

async fn cmd_watch(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let chain = chain_arg(args, &config)?;
    let count = match parse_flag(args, "--count") {
        Some(n) => Some(n.parse::<usize>().with_context(|| format!("invalid --count {n}"))?),
        None => None,
    };
    let pilot = build_pilot(config, has_flag(args, "--stream"))?;

    let mut heights = pilot.watch(&chain, WATCH_CAPACITY)?;
    pilot.start();
    tracing::info!(chain = %chain, "watching block heights");

    let mut seen = 0usize;
    loop {
        if count.is_some_and(|n| seen >= n) {
            break;
        }
        tokio::select! {
            height = heights.recv() => match height {
                Some(height) => {
                    println!("{chain} {height}");
                    seen += 1;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if heights.dropped() > 0 {
        tracing::warn!(chain = %chain, dropped = heights.dropped(), "heights dropped by a slow reader");
    }
    pilot.stop().await;
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let config = match parse_flag(args, "--config") {
        Some(path) => PilotConfig::from_path(&path).with_context(|| format!("loading {path}"))?,
        None => PilotConfig::default_config(),
    };
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags() {
        let a = args(&["--chain", "osmosis", "--stream", "--count"]);
        assert_eq!(parse_flag(&a, "--chain").as_deref(), Some("osmosis"));
        assert_eq!(parse_flag(&a, "--count"), None);
        assert!(has_flag(&a, "--stream"));
        assert!(!has_flag(&a, "--json-logs"));
    }

    #[test]
    fn chain_defaults_to_config() {
        let config = PilotConfig::default_config();
        assert_eq!(chain_arg(&[], &config).unwrap(), "cosmoshub");
        assert_eq!(chain_arg(&args(&["--chain", "osmosis"]), &config).unwrap(), "osmosis");
        assert!(chain_arg(&args(&["--chain", "juno"]), &config).is_err());
    }

    #[test]
    fn ws_addrs_pair_by_position() {
        let mut chain = ChainConfig::new(
            "osmosis-1",
            vec!["https://a.example:443".into(), "https://b.example:443".into()],
        );
        chain.ws_addrs = vec!["wss://a.example/websocket".into()];

        let eps = endpoints(&chain, false).unwrap();
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].url(), "https://a.example:443");
        assert_eq!(eps[1].url(), "https://b.example:443");
    }

    #[test]
    fn status_lists_node_and_sync_info() {
        let status: StatusResult = serde_json::from_value(serde_json::json!({
            "node_info": { "network": "osmosis-1", "moniker": "node-a", "version": "0.37.2" },
            "sync_info": {
                "latest_block_height": "987",
                "latest_block_time": "2024-03-01T12:00:00Z",
                "catching_up": true
            }
        }))
        .unwrap();

        let out = format_status("https://a.example:443", &status);
        assert!(out.starts_with("  https://a.example:443\n"));
        assert!(out.contains("Network:  osmosis-1"));
        assert!(out.contains("Moniker:  node-a"));
        assert!(out.contains("Height:   987"));
        assert!(out.contains("Time:     2024-03-01T12:00:00Z"));
        assert!(out.contains("catching up"));
    }
}
