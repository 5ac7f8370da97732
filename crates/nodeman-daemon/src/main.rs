//! nodeman-daemon entry point.
//!
//! This file is intentionally thin: it loads env configuration, sets up
//! tracing, builds the store and trace clients, and hands off to the driver.
//! Store client construction is the one fatal failure — it aborts with a
//! non-zero exit before any state-machine logic runs.

use std::sync::Arc;

use anyhow::Context;

use nodeman_daemon::{config::DriverConfig, driver};
use nodeman_store::ConsulKv;
use nodeman_trace::{TraceClient, TraceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let store = ConsulKv::from_env().context("phase store client construction failed")?;
    let trace = TraceClient::new(TraceConfig::from_env());
    let config = DriverConfig::from_env();

    driver::run(Arc::new(store), trace, config).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
