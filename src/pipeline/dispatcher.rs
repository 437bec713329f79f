//! Alert gating: thresholds, cooldowns, daily caps
//!
//! Each alert class runs the same three checks in order:
//! 1. trigger threshold met
//! 2. subject not cooling down (solo: per ticker, cluster: global)
//! 3. class daily count below the cap (UTC day)
//!
//! Any failed check is a silent suppression. A dispatch starts the cooldown and
//! spends one unit of the daily cap whether or not delivery later succeeds.

use super::config::AlertPolicy;
use super::types::{Alert, AlertClass, ClusterSignal, ScoreResult, TradeEvent};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};

/// Observable gate state for one alert subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    CoolingDown { until: DateTime<Utc> },
    DailyCapped { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SuppressReason {
    BelowThreshold,
    CoolingDown { until: DateTime<Utc> },
    DailyCapped,
    DebugDisabled,
    NotSampled,
    DebugRateLimited,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Dispatch(Alert),
    Suppressed(SuppressReason),
}

impl Decision {
    pub fn alert(self) -> Option<Alert> {
        match self {
            Decision::Dispatch(alert) => Some(alert),
            Decision::Suppressed(_) => None,
        }
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(self, Decision::Dispatch(_))
    }
}

#[derive(Debug, Clone, Default)]
struct DayCounter {
    day: Option<NaiveDate>,
    count: u32,
}

impl DayCounter {
    fn count_on(&mut self, day: NaiveDate) -> u32 {
        if self.day != Some(day) {
            self.day = Some(day);
            self.count = 0;
        }
        self.count
    }

    fn increment(&mut self, day: NaiveDate) {
        self.count_on(day);
        self.count = self.count.saturating_add(1);
    }
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

#[derive(Debug, Default)]
struct DebugSampler {
    seen: u64,
    sent: VecDeque<DateTime<Utc>>,
}

pub struct AlertDispatcher {
    policy: AlertPolicy,
    solo_last_sent: HashMap<String, DateTime<Utc>>,
    cluster_last_sent: Option<DateTime<Utc>>,
    daily: HashMap<AlertClass, DayCounter>,
    sampler: DebugSampler,
}

impl AlertDispatcher {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            solo_last_sent: HashMap::new(),
            cluster_last_sent: None,
            daily: HashMap::new(),
            sampler: DebugSampler::default(),
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    pub fn evaluate_solo(
        &mut self,
        trade: &TradeEvent,
        result: &ScoreResult,
        now: DateTime<Utc>,
    ) -> Decision {
        if result.score < self.policy.solo_threshold {
            return Decision::Suppressed(SuppressReason::BelowThreshold);
        }

        let cooldown = Duration::seconds(self.policy.solo_cooldown_secs);
        if let Some(until) = cooling_until(self.solo_last_sent.get(&result.ticker), cooldown, now) {
            return Decision::Suppressed(SuppressReason::CoolingDown { until });
        }
        if self.is_capped(AlertClass::Solo, now) {
            return Decision::Suppressed(SuppressReason::DailyCapped);
        }

        self.solo_last_sent.insert(result.ticker.clone(), now);
        self.spend(AlertClass::Solo, now);

        let reasons = result.reasons().join(", ");
        Decision::Dispatch(Alert {
            class: AlertClass::Solo,
            tickers: vec![result.ticker.clone()],
            score: result.score,
            at: now,
            summary: format!(
                "{} {} x{} @ ${} | score {:.0} | {}",
                trade.ticker,
                trade.side.as_str().to_uppercase(),
                trade.size,
                trade.price,
                result.score,
                reasons
            ),
        })
    }

    pub fn evaluate_cluster(&mut self, signal: &ClusterSignal, now: DateTime<Utc>) -> Decision {
        if signal.max_score < self.policy.cluster_threshold {
            return Decision::Suppressed(SuppressReason::BelowThreshold);
        }

        let cooldown = Duration::seconds(self.policy.cluster_cooldown_secs);
        if let Some(until) = cooling_until(self.cluster_last_sent.as_ref(), cooldown, now) {
            return Decision::Suppressed(SuppressReason::CoolingDown { until });
        }
        if self.is_capped(AlertClass::Cluster, now) {
            return Decision::Suppressed(SuppressReason::DailyCapped);
        }

        self.cluster_last_sent = Some(now);
        self.spend(AlertClass::Cluster, now);

        let tickers: Vec<String> = signal.tickers.iter().cloned().collect();
        Decision::Dispatch(Alert {
            class: AlertClass::Cluster,
            summary: format!(
                "{} markets spiking together: {} | max score {:.0} over {} trades",
                tickers.len(),
                tickers.join(", "),
                signal.max_score,
                signal.entries
            ),
            tickers,
            score: signal.max_score,
            at: now,
        })
    }

    /// Count a trade toward debug sampling; true if it is a debug candidate.
    /// Called for every trade so the sampling cadence is independent of other alerts.
    pub fn sample_debug(&mut self, trade: &TradeEvent) -> bool {
        let debug = &self.policy.debug;
        if !debug.enabled {
            return false;
        }
        self.sampler.seen = self.sampler.seen.wrapping_add(1);
        self.sampler.seen % debug.sample_every == 0 || trade.size >= debug.min_contracts
    }

    pub fn evaluate_debug(
        &mut self,
        trade: &TradeEvent,
        result: &ScoreResult,
        sampled: bool,
        now: DateTime<Utc>,
    ) -> Decision {
        if !self.policy.debug.enabled {
            return Decision::Suppressed(SuppressReason::DebugDisabled);
        }
        if !sampled {
            return Decision::Suppressed(SuppressReason::NotSampled);
        }

        self.expire_debug_sends(now);
        if self.sampler.sent.len() >= self.policy.debug.max_per_minute as usize {
            return Decision::Suppressed(SuppressReason::DebugRateLimited);
        }
        if self.is_capped(AlertClass::Debug, now) {
            return Decision::Suppressed(SuppressReason::DailyCapped);
        }

        self.sampler.sent.push_back(now);
        self.spend(AlertClass::Debug, now);

        Decision::Dispatch(Alert {
            class: AlertClass::Debug,
            tickers: vec![trade.ticker.clone()],
            score: result.score,
            at: now,
            summary: format!(
                "[debug] {} {} x{} @ ${} | score {:.1}",
                trade.ticker,
                trade.side.as_str().to_uppercase(),
                trade.size,
                trade.price,
                result.score
            ),
        })
    }

    /// Gate state for a class; `subject` is the ticker for the solo class
    pub fn gate_state(
        &mut self,
        class: AlertClass,
        subject: Option<&str>,
        now: DateTime<Utc>,
    ) -> GateState {
        if self.is_capped(class, now) {
            return GateState::DailyCapped {
                until: next_utc_midnight(now),
            };
        }

        let cooling = match class {
            AlertClass::Solo => cooling_until(
                subject.and_then(|t| self.solo_last_sent.get(t)),
                Duration::seconds(self.policy.solo_cooldown_secs),
                now,
            ),
            AlertClass::Cluster => cooling_until(
                self.cluster_last_sent.as_ref(),
                Duration::seconds(self.policy.cluster_cooldown_secs),
                now,
            ),
            AlertClass::Debug => {
                self.expire_debug_sends(now);
                if self.sampler.sent.len() >= self.policy.debug.max_per_minute as usize {
                    self.sampler.sent.front().map(|t| *t + Duration::seconds(60))
                } else {
                    None
                }
            }
        };

        match cooling {
            Some(until) => GateState::CoolingDown { until },
            None => GateState::Idle,
        }
    }

    pub fn sent_today(&mut self, class: AlertClass, now: DateTime<Utc>) -> u32 {
        self.daily
            .entry(class)
            .or_default()
            .count_on(now.date_naive())
    }

    /// Forget solo cooldowns that have elapsed. Returns the number removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cooldown = Duration::seconds(self.policy.solo_cooldown_secs);
        let before = self.solo_last_sent.len();
        self.solo_last_sent.retain(|_, sent| *sent + cooldown > now);
        self.expire_debug_sends(now);
        before - self.solo_last_sent.len()
    }

    pub fn tracked_cooldowns(&self) -> usize {
        self.solo_last_sent.len()
    }

    fn is_capped(&mut self, class: AlertClass, now: DateTime<Utc>) -> bool {
        self.sent_today(class, now) >= self.policy.daily_cap
    }

    fn spend(&mut self, class: AlertClass, now: DateTime<Utc>) {
        self.daily
            .entry(class)
            .or_default()
            .increment(now.date_naive());
    }

    fn expire_debug_sends(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(60);
        while self.sampler.sent.front().is_some_and(|t| *t <= cutoff) {
            self.sampler.sent.pop_front();
        }
    }
}

fn cooling_until(
    last_sent: Option<&DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let until = *last_sent? + cooldown;
    (now < until).then_some(until)
}
