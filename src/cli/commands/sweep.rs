//! Sweep Command
//!
//! Remove cache entries not read within the retention window, plus any
//! entries past their expiry.

use chrono::Duration;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::{Clock, Result, SystemClock};

pub fn run(days: Option<u32>, dry_run: bool) -> Result<()> {
    let ctx = CommandContext::load()?;
    let days = days.unwrap_or(ctx.config.cache.expire_after_days);
    let cutoff = SystemClock.now() - Duration::days(i64::from(days));
    let output = Output::new();
    let cache = ctx.orchestrator.cache();

    if dry_run {
        let stale = cache.count_stale(cutoff)?;
        output.info(&format!(
            "{} entries would be removed (not read in {} days or expired)",
            stale, days
        ));
        return Ok(());
    }

    let removed = cache.sweep(cutoff)?;
    output.success(&format!("Removed {} cache entries", removed));
    Ok(())
}
