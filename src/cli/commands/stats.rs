//! Stats Command
//!
//! Daily usage per provider plus cache totals.

use chrono::NaiveDate;

use crate::cli::ui::{Output, budget, usd};
use crate::cli::util::{CommandContext, is_json};
use crate::types::Result;

pub fn run(date: Option<NaiveDate>, format: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let summary = ctx.orchestrator.cost_control().daily_summary(date)?;
    let cache = ctx.orchestrator.cache().stats()?;

    if is_json(format) {
        let status = serde_json::json!({
            "usage": summary,
            "latches": summary.latches.iter().map(|l| serde_json::json!({
                "provider": l.provider,
                "reason": l.reason,
                "latched_at": l.latched_at,
            })).collect::<Vec<_>>(),
            "cache": {
                "entries": cache.total_entries,
                "refined": cache.refined_entries,
                "chars": cache.total_chars,
                "by_provider": cache
                    .by_provider
                    .iter()
                    .cloned()
                    .collect::<std::collections::BTreeMap<_, _>>(),
                "oldest_access": cache.oldest_access,
            }
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let output = Output::new();
    output.section(&format!("Usage for {} (UTC)", summary.date));
    if summary.providers.is_empty() {
        output.info("No usage recorded");
    }
    for line in &summary.providers {
        println!();
        println!("  {}", console::style(line.provider).bold());
        output.field(
            "requests",
            format!(
                "{} ({} refinements)",
                line.request_count, line.refinement_requests
            ),
        );
        output.field("characters", line.char_count);
        if line.token_input > 0 || line.token_output > 0 {
            output.field(
                "tokens",
                format!("{} in / {} out", line.token_input, line.token_output),
            );
        }
        output.field("spend", budget(line.cost_usd, line.daily_budget_usd));
        if line.budget_exceeded {
            output.warning("daily budget reached");
        }
        if line.quota_latched {
            output.warning("quota exhausted for today");
        }
    }
    println!();
    output.field("total requests", summary.total_requests);
    output.field("total spend", usd(summary.total_cost_usd));

    output.section("Cache");
    output.field("entries", cache.total_entries);
    output.field("refined", cache.refined_entries);
    output.field("characters", cache.total_chars);
    for (provider, count) in &cache.by_provider {
        output.field(&format!("from {}", provider), count);
    }
    if let Some(oldest) = cache.oldest_access {
        output.field("oldest access", oldest.format("%Y-%m-%d %H:%M"));
    }

    Ok(())
}
