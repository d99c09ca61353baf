use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use trading_agent_runtime::Executor;
use trading_agents::{AnomalyDetectorAgent, PortfolioOptimizerAgent, RiskMonitorAgent, SignalValidatorAgent};
use trading_core_types::{Config, CoreError, LlmProviderConfig};
use trading_gateway::{AiProvider, GatewayHandle};
use trading_kv::{KvStore, RedisKvStore};
use trading_orchestrator::Orchestrator;

/// How often the orchestrator polls every registered agent's `health_check`
/// action (see `Orchestrator::check_agent_health`).
const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

fn setup_log() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};
    if tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .is_err()
    {}
}

fn ai_provider(llm: LlmProviderConfig) -> AiProvider {
    match llm {
        LlmProviderConfig::Anthropic { api_key, model } => AiProvider::Anthropic { api_key, model },
        LlmProviderConfig::Zai { api_key, model, endpoint } => AiProvider::Zai { api_key, model, endpoint },
    }
}

#[tokio::main]
#[allow(clippy::result_large_err)]
async fn main() -> Result<(), CoreError> {
    dotenvy::dotenv().ok();
    setup_log();

    let config = Config::from_env()?;
    info!(kv_url = %config.kv_url, "starting trading core");

    let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&config.kv_url).await?);
    let gateway = Arc::new(GatewayHandle::new(ai_provider(config.llm_provider), kv.clone()));

    // The five specialist agents (C3) all exist in this workspace, but
    // `MarketRegimeAgent` additionally requires a real `Arc<dyn ExchangeClient>`
    // to construct. No production implementation of that trait exists anywhere
    // in this codebase (only test doubles), and exchange connectivity is
    // explicitly out of scope for this core: it assumes a candle-feed and an
    // exchange-client abstraction already exist elsewhere. So this process
    // wires and runs the four agents that only need the gateway and the KV
    // store, and leaves regime detection (and any strategy tick loop that
    // would depend on it) to whatever process supplies a real exchange
    // client.
    let signal_validator: Arc<dyn Executor> =
        Arc::new(SignalValidatorAgent::new(gateway.clone(), kv.clone()));
    let anomaly_detector: Arc<dyn Executor> =
        Arc::new(AnomalyDetectorAgent::new(gateway.clone(), kv.clone()));
    let risk_monitor: Arc<dyn Executor> = Arc::new(RiskMonitorAgent::new(gateway.clone(), kv.clone()));
    let portfolio_optimizer: Arc<dyn Executor> =
        Arc::new(PortfolioOptimizerAgent::new(gateway.clone(), kv.clone()));

    let orchestrator = Arc::new(Orchestrator::new(kv.clone()));
    orchestrator.register_agent("signal_validator", signal_validator);
    orchestrator.register_agent("anomaly_detector", anomaly_detector);
    orchestrator.register_agent("risk_monitor", risk_monitor);
    orchestrator.register_agent("portfolio_optimizer", portfolio_optimizer);

    orchestrator.clone().subscribe_to_events().await?;

    let health_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let health = health_orchestrator.check_agent_health().await;
            for (agent_id, status) in health {
                if !status.is_healthy {
                    warn!(agent_id, error_count = status.error_count, "agent unhealthy");
                }
            }
        }
    });

    info!("trading core ready");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    Ok(())
}
