use std::{
    env,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use ferris_depth_engine::{snapshot::RestSnapshotSource, Config, StreamManager};
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod view;


use cli::{parse_args, print_usage, CliOptions, ParseResult};
use view::{build_depth_frame, build_waiting_frame, TerminalRenderer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(ParseResult::Help) => {
            print_usage();
            return Ok(());
        }
        Ok(ParseResult::Run(options)) => options,
        Err(err) => {
            eprintln!("error: {err}\n");
            print_usage();
            std::process::exit(2);
        }
    };

    let mut config = Config::from_env().context("failed to load configuration")?;
    options.apply(&mut config);

    run_stream(config, options).await
}

async fn run_stream(config: Config, options: CliOptions) -> anyhow::Result<()> {
    let source = Arc::new(RestSnapshotSource::new(
        config.rest_base_url.clone(),
        config.request_timeout_ms,
    )?);

    println!(
        "symbol={} rows={} group=x{} ws_url={} rest_url={}",
        config.symbol,
        config.display_rows,
        config.grouping_multiplier,
        config.ws_base_url,
        config.rest_base_url,
    );
    if let Some(duration_secs) = options.duration_secs {
        println!("will stop after {duration_secs}s");
    }
    println!("press Ctrl+C to stop\n");

    let symbol = config.symbol.clone();
    let rows = config.display_rows;
    let handle = StreamManager::spawn(config, source);

    let mut projection_rx = handle.projection();
    let mut trades_rx = handle.trades();
    let status_rx = handle.status();

    let mut renderer = TerminalRenderer::new()?;
    renderer.render(&build_waiting_frame(&symbol, "waiting for feed"))?;

    let started_at = Instant::now();
    let stop_reason = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                break "received Ctrl+C";
            }
            changed = projection_rx.changed() => {
                if changed.is_err() {
                    break "feed stopped";
                }

                let projection = projection_rx.borrow_and_update().clone();
                let trades = trades_rx.borrow_and_update().clone();
                let status = status_rx.borrow().clone();

                let frame = build_depth_frame(&symbol, &projection, &status, &trades, rows);
                renderer.render(&frame)?;

                if let Some(duration_secs) = options.duration_secs {
                    if started_at.elapsed() >= Duration::from_secs(duration_secs) {
                        break "reached configured stop condition";
                    }
                }
            }
        }
    };

    drop(renderer);
    println!("stopped: {stop_reason}");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();
}
