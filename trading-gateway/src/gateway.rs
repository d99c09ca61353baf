use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use trading_core_types::{CoreError, MarketEvent};
use trading_kv::KvStore;

use crate::cache::{PromptCache, PromptKind, ResponseCache};
use crate::cost::CostTracker;
use crate::event_gate::{EventGate, GateDecision};
use crate::provider::AiProvider;
use crate::sampler::SmartSampler;

/// System prompts are static per agent type; a day's TTL is long enough that
/// a busy agent never rebuilds the same prompt text twice in practice.
const SYSTEM_PROMPT_CACHE_TTL_SECS: u64 = 86_400;

/// Per-agent-type canned fallback returned whenever the sampler or event
/// gate skips a call and no cached response is available.
fn default_response_for(agent_type: &str) -> Value {
    match agent_type {
        "signal_validator" => serde_json::json!({"response": "HOLD"}),
        "anomaly_detector" => serde_json::json!({"response": "NO_ANOMALY"}),
        "risk_monitor" => serde_json::json!({"response": "NORMAL"}),
        _ => serde_json::json!({"response": "HOLD"}),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallOutcome {
    pub response: Value,
    pub cost_usd: f64,
    pub cache_hit: bool,
    pub sampled: bool,
    pub skip_reason: Option<String>,
}

/// The single way the rest of the core is allowed to talk to an LLM. Runs
/// the sampler, response cache, provider call and cost tracker in sequence,
/// returning as soon as one stage can answer the call.
pub struct GatewayHandle {
    provider: AiProvider,
    client: reqwest::Client,
    sampler: SmartSampler,
    event_gate: EventGate,
    response_cache: ResponseCache,
    prompt_cache: PromptCache,
    cost_tracker: CostTracker,
}

impl GatewayHandle {
    pub fn new(provider: AiProvider, kv: Arc<dyn KvStore>) -> Self {
        Self {
            provider,
            client: reqwest::Client::new(),
            sampler: SmartSampler::new(),
            event_gate: EventGate::new(),
            response_cache: ResponseCache::new(kv.clone()),
            prompt_cache: PromptCache::new(kv.clone()),
            cost_tracker: CostTracker::new(kv),
        }
    }

    pub fn prompt_cache(&self) -> &PromptCache {
        &self.prompt_cache
    }

    /// Looks up the agent's system prompt in the prompt cache first; on a
    /// miss, stores the caller-supplied prompt under that key for next time.
    async fn resolved_system_prompt(
        &self,
        agent_type: &str,
        system_prompt: Option<&str>,
    ) -> Result<Option<String>, CoreError> {
        let Some(prompt) = system_prompt else {
            return Ok(None);
        };
        let cache_query = serde_json::json!({"agent_type": agent_type});
        if let Some(cached) = self.prompt_cache.get(PromptKind::SystemPrompt, &cache_query).await? {
            return Ok(Some(cached));
        }
        self.prompt_cache
            .set(PromptKind::SystemPrompt, &cache_query, prompt, SYSTEM_PROMPT_CACHE_TTL_SECS)
            .await?;
        Ok(Some(prompt.to_string()))
    }

    pub fn cost_tracker(&self) -> &CostTracker {
        &self.cost_tracker
    }

    pub async fn check_budget(
        &self,
        daily_budget_usd: f64,
        monthly_budget_usd: f64,
    ) -> Result<crate::cost::BudgetStatus, CoreError> {
        self.cost_tracker
            .check_budget(daily_budget_usd, monthly_budget_usd)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn call_ai(
        &self,
        agent_type: &str,
        symbol: Option<&str>,
        prompt: &str,
        system_prompt: Option<&str>,
        response_type: &str,
        query: &Value,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CallOutcome, CoreError> {
        let decision = self.sampler.should_sample(agent_type, symbol, query).await;

        if !decision.should_call {
            if let Some(cached) = self.response_cache.get(response_type, query).await? {
                return Ok(CallOutcome {
                    response: cached,
                    cost_usd: 0.0,
                    cache_hit: true,
                    sampled: false,
                    skip_reason: Some(decision.reason),
                });
            }
            return Ok(CallOutcome {
                response: default_response_for(agent_type),
                cost_usd: 0.0,
                cache_hit: false,
                sampled: false,
                skip_reason: Some(decision.reason),
            });
        }

        if ResponseCache::should_cache(query) {
            if let Some(cached) = self.response_cache.get(response_type, query).await? {
                return Ok(CallOutcome {
                    response: cached,
                    cost_usd: 0.0,
                    cache_hit: true,
                    sampled: true,
                    skip_reason: None,
                });
            }
        }

        let cached_system_prompt = self.resolved_system_prompt(agent_type, system_prompt).await?;

        let provider_response = match self
            .provider
            .call(&self.client, prompt, cached_system_prompt.as_deref(), temperature, max_tokens)
            .await
        {
            Ok(r) => {
                self.sampler.notify_success();
                r
            }
            Err(CoreError::LlmRateLimited) => {
                self.sampler.notify_rate_limit();
                return Ok(CallOutcome {
                    response: default_response_for(agent_type),
                    cost_usd: 0.0,
                    cache_hit: false,
                    sampled: true,
                    skip_reason: Some("rate_limited".to_string()),
                });
            }
            Err(_other) => {
                return Ok(CallOutcome {
                    response: default_response_for(agent_type),
                    cost_usd: 0.0,
                    cache_hit: false,
                    sampled: true,
                    skip_reason: Some("provider_error".to_string()),
                });
            }
        };

        let parsed = crate::provider::extract_json(&provider_response.text);
        let response: Value =
            serde_json::from_str(parsed).unwrap_or_else(|_| serde_json::json!({"response": provider_response.text}));

        let cost_info = self
            .cost_tracker
            .track_api_call(self.provider.model(), agent_type, provider_response.usage)
            .await?;

        if ResponseCache::should_cache(query) {
            let wrapped = serde_json::json!({"response": response});
            self.response_cache.set(response_type, query, &wrapped).await?;
        }

        Ok(CallOutcome {
            response,
            cost_usd: cost_info.total_cost_usd,
            cache_hit: false,
            sampled: true,
            skip_reason: None,
        })
    }

    /// Runs the event-driven pre-gate before the regular sampling pipeline;
    /// `BATCH` events return the canned default immediately (the batch
    /// itself is flushed and processed by the caller once ready).
    #[allow(clippy::too_many_arguments)]
    pub async fn call_ai_with_event(
        &self,
        event: &MarketEvent,
        agent_type: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        response_type: &str,
        query: &Value,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CallOutcome, CoreError> {
        match self.event_gate.should_trigger(event).await {
            GateDecision::Skip | GateDecision::Batch => Ok(CallOutcome {
                response: default_response_for(agent_type),
                cost_usd: 0.0,
                cache_hit: false,
                sampled: false,
                skip_reason: Some("event_gate".to_string()),
            }),
            GateDecision::Trigger => {
                self.call_ai(
                    agent_type,
                    Some(&event.symbol),
                    prompt,
                    system_prompt,
                    response_type,
                    query,
                    temperature,
                    max_tokens,
                )
                .await
            }
        }
    }
}
