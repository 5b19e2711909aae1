mod app_state;
mod config;
mod database;
mod fingerprint;
mod icy;
mod logging;
mod prediction;
mod resolver;
mod scan;
mod stations;
mod titles;

use std::env;

use anyhow::Context;
use serde_json::json;

use app_state::AppState;
use config::Config;
use logging::init_logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logger = init_logger("nowplaying-service-rs");

    let config = Config::load().context("failed to load configuration")?;

    if matches!(env::args().nth(1).as_deref(), Some("check-config")) {
        logger.info(
            "config.check_passed",
            serde_json::to_value(&config).unwrap_or_else(|_| json!({ "status": "ok" })),
        );
        return Ok(());
    }

    let state = AppState::initialize(config.clone())
        .await
        .context("failed to initialize application state")?;
    state
        .ping_postgres()
        .await
        .context("postgres ping failed")?;

    let orchestrator = state.orchestrator();

    if matches!(env::args().nth(1).as_deref(), Some("scan-once")) {
        let summary = orchestrator.run_cycle().await;
        logger.info(
            "scan.once_completed",
            json!({
                "scanned": summary.scanned,
                "detected": summary.detected,
                "predicted": summary.predicted,
            }),
        );
        return Ok(());
    }

    logger.info(
        "scanner.initialized",
        json!({
            "intervalSeconds": config.scan.interval_seconds,
            "concurrency": config.scan.concurrency,
            "fingerprintEnabled": config.fingerprint.enabled,
            "placeholderRulesVersion": titles::PLACEHOLDER_RULES_VERSION,
        }),
    );

    tokio::select! {
        _ = orchestrator.run() => {}
        _ = tokio::signal::ctrl_c() => {
            logger.info("scanner.shutdown", json!({ "reason": "interrupt" }));
        }
    }

    Ok(())
}
