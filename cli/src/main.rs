//! chainsocket CLI — issue calls and tail subscriptions over a WebSocket.
//!
//! Usage:
//! ```bash
//! # Send a JSON-RPC call
//! chainsocket call --url wss://ethereum-rpc.publicnode.com --method eth_blockNumber
//!
//! # Print the next five block headers
//! chainsocket subscribe --url wss://ethereum-rpc.publicnode.com --kind newHeads --count 5
//! ```

use std::env;
use std::process;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainsocket_core::events::{SubscriptionEvent, SubscriptionKind, SyncStatus};
use chainsocket_ws::{ConnectionState, WsClientConfig, WsRpcClient, NORMAL_CLOSURE};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    init_tracing(&args[2..]);

    let result = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "subscribe" => cmd_subscribe(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainsocket {}", env!("CARGO_PKG_VERSION"));
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
    println!("chainsocket {}", env!("CARGO_PKG_VERSION"));
    println!("Persistent JSON-RPC over WebSocket\n");
    println!("USAGE:");
    println!("    chainsocket <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    call       Send a JSON-RPC call and print the result");
    println!("    subscribe  Print events from an eth_subscribe stream");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --url <URL>           WebSocket endpoint (ws:// or wss://)  [required]");
    println!("    --config <PATH>       JSON client config file");
    println!("    --log-level <LEVEL>   trace | debug | info | warn | error  [default: warn]");
    println!("    --json-logs           Emit logs as JSON\n");
    println!("CALL FLAGS:");
    println!("    --method <METHOD>     JSON-RPC method  [required]");
    println!("    --params <JSON>       JSON array of params  [default: []]\n");
    println!("SUBSCRIBE FLAGS:");
    println!("    --kind <KIND>         newHeads | newPendingTransactions | syncing  [default: newHeads]");
    println!("    --count <N>           Stop after N events  [default: unlimited]");
}

/// Logs go to stderr so command output stays pipeable. `RUST_LOG` wins over
/// `--log-level` when set.
fn init_tracing(args: &[String]) {
    let level = parse_flag(args, "--log-level").unwrap_or_else(|| "warn".into());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if has_flag(args, "--json-logs") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(args: &[String]) -> Result<WsClientConfig> {
    match parse_flag(args, "--config") {
        Some(path) => WsClientConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}")),
        None => Ok(WsClientConfig::default()),
    }
}

async fn connect(args: &[String]) -> Result<WsRpcClient> {
    let url = parse_flag(args, "--url").context("--url is required")?;
    let client = WsRpcClient::new(&url, load_config(args)?);
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {url}"))?;
    Ok(client)
}

async fn cmd_call(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").context("--method is required")?;
    let params: Value = match parse_flag(args, "--params") {
        Some(raw) => serde_json::from_str(&raw).context("--params must be JSON")?,
        None => Value::Array(vec![]),
    };
    if !params.is_array() {
        bail!("--params must be a JSON array");
    }

    let client = connect(args).await?;
    let result: Value = client.call(&method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    client.disconnect(NORMAL_CLOSURE).await;
    Ok(())
}

async fn cmd_subscribe(args: &[String]) -> Result<()> {
    let kind: SubscriptionKind = parse_flag(args, "--kind")
        .as_deref()
        .unwrap_or("newHeads")
        .parse()
        .map_err(anyhow::Error::msg)?;
    let count = match parse_flag(args, "--count") {
        Some(n) => Some(n.parse::<usize>().context("--count must be a number")?),
        None => None,
    };

    let client = connect(args).await?;
    let (mut id, mut stream) = client.subscribe(kind).await?;
    eprintln!("Subscribed to {kind} ({id})");

    let mut seen = 0usize;
    while count.map_or(true, |n| seen < n) {
        tokio::select! {
            event = stream.recv() => match event {
                Some(event) => {
                    print_event(&event);
                    seen += 1;
                }
                // The socket dropped; wait for the reconnect and subscribe again.
                None => {
                    eprintln!("Connection lost, waiting for reconnect");
                    tokio::select! {
                        reopened = client.reconnected() => reopened.context("reconnect abandoned")?,
                        _ = tokio::signal::ctrl_c() => break,
                    }
                    (id, stream) = client.subscribe(kind).await?;
                    eprintln!("Resubscribed to {kind} ({id})");
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if client.state() == ConnectionState::Open && client.unsubscribe(&id).await.is_err() {
        tracing::debug!(subscription = %id, "unsubscribe failed");
    }
    client.disconnect(NORMAL_CLOSURE).await;
    Ok(())
}

fn print_event(event: &SubscriptionEvent) {
    match event {
        SubscriptionEvent::NewHead(head) => {
            println!("block {} {} ts={}", head.number, head.hash, head.timestamp)
        }
        SubscriptionEvent::PendingTransaction(hash) => println!("{hash}"),
        SubscriptionEvent::SyncStatus(status) => println!("{}", sync_json(status)),
    }
}

fn sync_json(status: &SyncStatus) -> Value {
    match status {
        SyncStatus::NotSyncing => serde_json::json!({"syncing": false}),
        SyncStatus::Syncing(p) => serde_json::json!({
            "syncing": true,
            "startingBlock": p.starting_block,
            "currentBlock": p.current_block,
            "highestBlock": p.highest_block,
        }),
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
