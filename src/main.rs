use clap::Parser;
use std::sync::Arc;

use latency_dash::config::ServerArgs;
use latency_dash::error::AppResult;
use latency_dash::hub::Hub;
use latency_dash::metrics::Aggregator;
use latency_dash::{generator, logger, pipeline, server, shutdown, AppState};

#[tokio::main]
async fn main() {
    let args = ServerArgs::parse();
    logger::init_logging(args.verbose);

    if let Err(err) = run(args).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: ServerArgs) -> AppResult<()> {
    let shutdown_tx = shutdown::channel();

    // ── 1. Aggregation core ──────────────────────────────────────
    let (aggregator, events) = Aggregator::new(args.aggregator_config());
    let aggregator = Arc::new(aggregator);
    let hub = Arc::new(Hub::new(aggregator.clone(), args.consumer_buffer));

    let pipeline_task = tokio::spawn(pipeline::run(
        aggregator.clone(),
        hub.clone(),
        events,
        shutdown_tx.subscribe(),
    ));
    let sweeper_task = tokio::spawn(pipeline::run_sweeper(
        aggregator.clone(),
        args.sweep_interval(),
        shutdown_tx.subscribe(),
    ));

    // ── 2. Synthetic producers ───────────────────────────────────
    let generators = if args.no_demo {
        Vec::new()
    } else {
        generator::spawn_all(aggregator.clone(), generator::demo_configs(), &shutdown_tx)
    };

    // ── 3. Router ────────────────────────────────────────────────
    let state = Arc::new(AppState::new(aggregator, hub, shutdown_tx.clone()));
    let app = server::create_router(state, &args.static_dir);

    // ── 4. Bind & serve ──────────────────────────────────────────
    let addr = args.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        %addr,
        window = args.window_capacity,
        queue = args.queue_capacity,
        grace_secs = args.grace_period_secs,
        demo = !args.no_demo,
        "server listening"
    );
    tracing::info!("Consumers  → ws://{}/ws", addr);
    tracing::info!("Ingest     → POST http://{}/api/events", addr);
    tracing::info!("Status SSE → http://{}/api/status/stream", addr);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down server...");
        }
        let _ = signal_tx.send(());
    });

    server::serve(listener, app, &shutdown_tx).await?;

    // ── 5. Drain background tasks ────────────────────────────────
    let _ = shutdown_tx.send(());
    pipeline_task.await?;
    sweeper_task.await?;
    for handle in generators {
        handle.await?;
    }
    Ok(())
}
