// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use anyhow::Context;
use courtier::config::{load_and_validate_config, RuntimeBuilder};
use courtier::network::SerialTcpClient;
use courtier::payloads::Multiply;
use std::env;
use std::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_ITEMS: usize = 10;

fn usage(program: &str) {
    eprintln!("Usage: {} serve <config.yaml|config.toml> [items]", program);
    eprintln!("       {} client <config.yaml|config.toml>", program);
    eprintln!("Example: {} serve configs/local.yaml 20", program);
    eprintln!("Example: {} client configs/remote.toml", program);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("courtier");

    match (args.get(1).map(String::as_str), args.get(2)) {
        (Some("serve"), Some(config)) => {
            let items = match args.get(3) {
                Some(n) => n
                    .parse()
                    .with_context(|| format!("'{}' is not a number of items", n))?,
                None => DEFAULT_ITEMS,
            };
            serve(config, items)
        }
        (Some("client"), Some(config)) => client(config),
        _ => {
            usage(program);
            std::process::exit(1);
        }
    }
}

/// Starts the configured consumers, runs `items` multiplications through
/// an executor and prints the results.
fn serve(config: &str, items: usize) -> anyhow::Result<()> {
    let cfg = load_and_validate_config(config)?;
    let runtime = RuntimeBuilder::from_config::<Multiply>(&cfg)?;

    println!("🚀 Courtier broker");
    println!("═══════════════════");
    println!("Config: {}", config);
    if let Some(address) = runtime.tcp_server().and_then(|server| server.local_addr()) {
        println!("Waiting for clients on {}", address);
    }
    println!();

    let mut executor = runtime.executor()?;
    let mut batch: Vec<_> = (0..items)
        .map(|i| Multiply::doubling(i as f64).into_item())
        .collect();

    let started = Instant::now();
    let status = executor.work_on(&mut batch, true)?;

    for item in &batch {
        match item.stored_result(0) {
            Ok(result) if item.is_processed() => {
                println!("  {} x {} = {}", item.payload().value, item.payload().factor, result)
            }
            _ if item.has_errors() => {
                println!("  {} failed: {}", item.payload().value, item.error_description())
            }
            _ => println!("  {} never came back", item.payload().value),
        }
    }

    let report = executor.last_report();
    println!();
    println!(
        "{} {} of {} item(s) in {:?}, {} failure(s), {} resubmission round(s)",
        if status.is_complete { "✅" } else { "⚠️" },
        report.returned,
        report.expected,
        started.elapsed(),
        report.erroneous,
        report.resubmissions
    );
    drop(executor);
    runtime.shutdown();
    Ok(())
}

/// Processes work from a remote broker until the server goes away or a
/// configured limit is reached.
fn client(config: &str) -> anyhow::Result<()> {
    let cfg = load_and_validate_config(config)?;
    let mut client: SerialTcpClient<Multiply> = SerialTcpClient::new(cfg.tcp_client.to_options());

    let report = client.run()?;
    println!(
        "Client finished ({}) after {} item(s) in {:?}",
        report.reason, report.processed, report.elapsed
    );
    Ok(())
}
