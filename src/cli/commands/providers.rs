//! Providers Command
//!
//! Show each backend's configuration and today's routing state, and
//! optionally health-check the configured backends, refiner included.

use serde::Serialize;

use crate::cli::ui::{Output, budget};
use crate::cli::util::{CommandContext, is_json};
use crate::types::{ProviderKind, Result};

#[derive(Debug, Serialize)]
struct ProviderStatus {
    provider: ProviderKind,
    enabled: bool,
    has_api_key: bool,
    tier_position: Option<usize>,
    refiner: bool,
    eligibility: String,
    spent_usd: f64,
    daily_budget_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthy: Option<bool>,
}

pub async fn run(check: bool, format: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let gateway = ctx.orchestrator.gateway();
    let cost = ctx.orchestrator.cost_control();

    let health: Vec<(ProviderKind, bool)> = if check {
        gateway.health_report().await
    } else {
        Vec::new()
    };

    let mut statuses = Vec::new();
    for kind in ProviderKind::BACKENDS {
        let Some(backend) = ctx.config.providers.get(kind) else {
            continue;
        };
        let eligibility = cost.eligibility(kind)?;
        statuses.push(ProviderStatus {
            provider: kind,
            enabled: backend.enabled,
            has_api_key: backend.has_api_key(),
            tier_position: gateway
                .tiers()
                .iter()
                .position(|t| t.kind() == kind)
                .map(|i| i + 1),
            refiner: gateway.refiner().is_some_and(|r| r.kind() == kind),
            eligibility: eligibility.describe(),
            spent_usd: cost.spend_today(kind)?,
            daily_budget_usd: cost.policy(kind).daily_budget_usd,
            healthy: health.iter().find(|(k, _)| *k == kind).map(|(_, ok)| *ok),
        });
    }

    if is_json(format) {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    let output = Output::new();
    output.section(&format!("Providers ({} UTC)", cost.today()));
    for status in &statuses {
        println!();
        println!("  {}", console::style(status.provider).bold());
        let configured = match (status.enabled, status.has_api_key) {
            (false, _) => "disabled in config".to_string(),
            (true, false) => "no API key".to_string(),
            (true, true) => match status.tier_position {
                Some(pos) => format!("tier {}", pos),
                None => "not in tier order".to_string(),
            },
        };
        output.field("routing", configured);
        if status.refiner {
            output.field("refinement", "yes");
        }
        output.field("today", &status.eligibility);
        output.field("spend", budget(status.spent_usd, status.daily_budget_usd));
        match status.healthy {
            Some(true) => output.success("health check passed"),
            Some(false) => output.error("health check failed"),
            None => {}
        }
    }

    Ok(())
}
