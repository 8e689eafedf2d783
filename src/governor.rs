use crate::config::Config;
use crate::fetcher::MAX_FOLLOWING_PAGE_SIZE;
use chrono::Local;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Calls needed to page through `following_count` records
pub fn estimate_calls(following_count: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    u32::try_from(following_count.div_ceil(page_size)).unwrap_or(u32::MAX)
}

/// Outcome of charging one account against the call budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub calls_required: u32,
    /// Pause to take before fetching, when the budget was exhausted
    pub cooldown: Option<Duration>,
}

/// Local estimate of the upstream call quota.
///
/// Each account is charged `ceil(following_count / page_size)` calls. When
/// the charge would push the running total past the budget, a single
/// cooldown is taken and the total restarts from zero. Server quota headers
/// are not consulted.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    budget: u32,
    page_size: u32,
    cooldown: Duration,
    calls_spent: u32,
    cooldowns: u32,
}

impl RateGovernor {
    /// `page_size` is clamped like the following-list pager clamps it, so
    /// estimates count the pages actually requested
    pub fn new(budget: u32, page_size: u32, cooldown: Duration) -> Self {
        Self {
            budget,
            page_size: page_size.clamp(1, MAX_FOLLOWING_PAGE_SIZE),
            cooldown,
            calls_spent: 0,
            cooldowns: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.call_budget(), config.page_size(), config.cooldown())
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Estimated calls charged since the last cooldown
    pub fn calls_spent(&self) -> u32 {
        self.calls_spent
    }

    /// Cooldowns taken so far
    pub fn cooldowns(&self) -> u32 {
        self.cooldowns
    }

    /// Charge an account and decide whether a cooldown must precede it
    pub fn reserve(&mut self, following_count: u64) -> Admission {
        let calls_required = estimate_calls(following_count, self.page_size);

        if calls_required > self.budget {
            warn!(
                "A single account needs {} calls, more than the budget of {}",
                calls_required, self.budget
            );
        }

        let cooldown = if self.calls_spent.saturating_add(calls_required) > self.budget {
            self.calls_spent = 0;
            self.cooldowns += 1;
            Some(self.cooldown)
        } else {
            None
        };

        self.calls_spent = self.calls_spent.saturating_add(calls_required);
        debug!(
            "Reserved {} calls, {}/{} spent in this window",
            calls_required, self.calls_spent, self.budget
        );

        Admission {
            calls_required,
            cooldown,
        }
    }

    /// Reserve calls for an account, sleeping through the cooldown if one is due
    pub async fn admit(&mut self, following_count: u64) -> Admission {
        let admission = self.reserve(following_count);

        if let Some(pause) = admission.cooldown {
            let resume_at = chrono::Duration::from_std(pause)
                .ok()
                .map(|pause| Local::now() + pause);
            match resume_at {
                Some(resume_at) => info!(
                    "Call budget reached, sleeping for {}s. Will restart at {}",
                    pause.as_secs(),
                    resume_at.format("%H:%M")
                ),
                None => info!("Call budget reached, sleeping for {}s", pause.as_secs()),
            }
            sleep(pause).await;
        }

        admission
    }
}
