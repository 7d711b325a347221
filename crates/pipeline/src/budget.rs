//! The budget ledger: the single source of truth for model spend.
//!
//! Three ceilings are enforced at once: tokens per episode (one run), tokens
//! per UTC day, and USD per UTC month. Every model call is bracketed by a
//! [`BudgetLedger::reserve`] before dispatch and a [`BudgetLedger::commit`]
//! with the actual usage afterwards.
//!
//! Reservations are check-and-increment under one lock: a granted reservation
//! holds its estimate against all three scopes until it is committed or
//! dropped, so concurrent runs cannot jointly overspend a ceiling.
//!
//! The ledger is a cheap-to-clone handle; clones share state. It is passed
//! explicitly into the router and orchestrator, never stored globally.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BudgetCeilings;
use crate::errors::{BudgetDenial, DenialReason};
use crate::model::UsageRecord;
use crate::{MonthKey, RunId, TaskClass, Timestamp, TokenCost, TokenCount};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" for day and month scoping.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ---------------------------------------------------------------------------
// Public value types
// ---------------------------------------------------------------------------

/// A budget scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BudgetScope {
    /// One run's episode ceiling.
    Episode(RunId),
    /// The current UTC day.
    Day,
    /// The current UTC month.
    Month,
}

/// Projected size of a model call, reserved before dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Upper-bound token estimate (prompt plus completion budget).
    pub tokens: TokenCount,
    /// Spend of `tokens` at the target backend's prices.
    pub cost: TokenCost,
}

/// Headroom left in a scope. Episode and day ceilings are in tokens; the
/// month ceiling is a spend budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Remaining {
    /// Tokens still available.
    Tokens(TokenCount),
    /// USD still available.
    Spend(TokenCost),
}

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUsage {
    /// Committed tokens.
    pub tokens: TokenCount,
    /// Committed spend.
    pub cost: TokenCost,
    /// Invocations recorded.
    pub calls: usize,
}

/// Day and month usage against their ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// The UTC day summarised.
    pub day: NaiveDate,
    /// Tokens committed today.
    pub daily_tokens: TokenCount,
    /// Daily token ceiling.
    pub daily_limit: TokenCount,
    /// Spend committed today.
    pub daily_cost: TokenCost,
    /// The UTC month summarised.
    pub month: MonthKey,
    /// Tokens committed this month.
    pub monthly_tokens: TokenCount,
    /// Spend committed this month.
    pub monthly_cost: TokenCost,
    /// Monthly spend budget.
    pub monthly_budget: TokenCost,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    used_tokens: TokenCount,
    used_cost: TokenCost,
    reserved_tokens: TokenCount,
    reserved_cost: TokenCost,
}

impl Tally {
    fn held_tokens(&self) -> TokenCount {
        self.used_tokens + self.reserved_tokens
    }

    fn held_cost(&self) -> TokenCost {
        self.used_cost + self.reserved_cost
    }

    fn hold(&mut self, estimate: Estimate) {
        self.reserved_tokens += estimate.tokens;
        self.reserved_cost += estimate.cost;
    }

    fn release(&mut self, estimate: Estimate) {
        self.reserved_tokens = self.reserved_tokens.saturating_sub(estimate.tokens);
        self.reserved_cost = self.reserved_cost.saturating_sub(estimate.cost);
    }

    fn charge(&mut self, tokens: TokenCount, cost: TokenCost) {
        self.used_tokens += tokens;
        self.used_cost += cost;
    }
}

#[derive(Debug)]
struct LedgerState {
    episodes: HashMap<RunId, Tally>,
    day_key: NaiveDate,
    day: Tally,
    month_key: MonthKey,
    month: Tally,
    records: Vec<UsageRecord>,
    warned_day: Option<NaiveDate>,
    warned_month: Option<MonthKey>,
}

impl LedgerState {
    fn new(now: Timestamp) -> Self {
        Self {
            episodes: HashMap::new(),
            day_key: now.day(),
            day: Tally::default(),
            month_key: now.month(),
            month: Tally::default(),
            records: Vec::new(),
            warned_day: None,
            warned_month: None,
        }
    }

    /// Starts fresh day/month tallies when the calendar has moved on.
    fn roll(&mut self, now: Timestamp) {
        if now.day() != self.day_key {
            self.day_key = now.day();
            self.day = Tally::default();
        }
        if now.month() != self.month_key {
            self.month_key = now.month();
            self.month = Tally::default();
        }
    }
}

fn lock(state: &Mutex<LedgerState>) -> MutexGuard<'_, LedgerState> {
    // Tally updates have no fallible step, so a poisoned lock still guards
    // consistent state.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Tracks model spend against episode, day, and month ceilings.
#[derive(Clone)]
pub struct BudgetLedger {
    state: Arc<Mutex<LedgerState>>,
    ceilings: BudgetCeilings,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BudgetLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetLedger")
            .field("ceilings", &self.ceilings)
            .finish_non_exhaustive()
    }
}

impl BudgetLedger {
    /// Creates an empty ledger using the system clock.
    pub fn new(ceilings: BudgetCeilings) -> Self {
        Self::with_clock(ceilings, Arc::new(SystemClock))
    }

    /// Creates an empty ledger with an explicit clock.
    pub fn with_clock(ceilings: BudgetCeilings, clock: Arc<dyn Clock>) -> Self {
        let state = LedgerState::new(clock.now());
        Self {
            state: Arc::new(Mutex::new(state)),
            ceilings,
            clock,
        }
    }

    /// The ceilings this ledger enforces.
    pub fn ceilings(&self) -> &BudgetCeilings {
        &self.ceilings
    }

    /// Folds usage recorded by earlier processes into the current day and
    /// month tallies so ceilings hold across restarts. Records outside the
    /// current day/month are ignored; seeded records are not returned by
    /// [`BudgetLedger::records`].
    pub fn seed<'a>(&self, history: impl IntoIterator<Item = &'a UsageRecord>) {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.roll(now);
        let mut seeded = 0usize;
        for record in history {
            let (tokens, cost) = (record.total_tokens(), record.cost);
            if record.recorded_at.month() == state.month_key {
                state.month.charge(tokens, cost);
                seeded += 1;
            }
            if record.recorded_at.day() == state.day_key {
                state.day.charge(tokens, cost);
            }
        }
        debug!(
            seeded,
            daily_tokens = %state.day.used_tokens,
            monthly_cost = %state.month.used_cost,
            "Seeded budget ledger from usage history"
        );
    }

    /// Reserves `estimate` for a call made on behalf of `run`.
    ///
    /// Checks the episode, day, and month ceilings together and either holds
    /// the estimate against all three or refuses with the most restrictive
    /// denial: the scope whose headroom covers the smallest fraction of the
    /// request, ties resolved episode, then day, then month. A scope that is
    /// already exhausted refuses every request, including zero-sized ones.
    pub fn reserve(
        &self,
        run: RunId,
        task_class: TaskClass,
        estimate: Estimate,
    ) -> Result<Reservation, BudgetDenial> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.roll(now);

        let episode = state.episodes.get(&run).copied().unwrap_or_default();
        let checks = [
            (
                DenialReason::EpisodeLimit,
                token_check(&episode, self.ceilings.episode_tokens, estimate.tokens),
                format!(
                    "episode {}/{} tokens, requested {}",
                    episode.held_tokens(),
                    self.ceilings.episode_tokens,
                    estimate.tokens
                ),
            ),
            (
                DenialReason::DailyLimit,
                token_check(&state.day, self.ceilings.daily_tokens, estimate.tokens),
                format!(
                    "daily {}/{} tokens, requested {}",
                    state.day.held_tokens(),
                    self.ceilings.daily_tokens,
                    estimate.tokens
                ),
            ),
            (
                DenialReason::MonthlyBudget,
                cost_check(&state.month, self.ceilings.monthly_budget_usd.as_f64(), estimate.cost),
                format!(
                    "monthly {}/{}, requested {}",
                    state.month.held_cost(),
                    self.ceilings.monthly_budget_usd,
                    estimate.cost
                ),
            ),
        ];

        let mut denial: Option<(DenialReason, f64, String)> = None;
        for (reason, coverage, detail) in checks {
            if let Some(covered) = coverage {
                if denial.as_ref().map_or(true, |(_, best, _)| covered < *best) {
                    denial = Some((reason, covered, detail));
                }
            }
        }

        if let Some((reason, _, detail)) = denial {
            warn!(
                run_id = %run,
                task_class = %task_class,
                reason = reason.code(),
                %detail,
                "Budget reservation denied"
            );
            return Err(BudgetDenial {
                reason,
                requested: estimate.tokens,
                detail,
            });
        }

        state.episodes.entry(run).or_default().hold(estimate);
        state.day.hold(estimate);
        state.month.hold(estimate);
        let (day_key, month_key) = (state.day_key, state.month_key);
        drop(state);

        Ok(Reservation {
            state: Arc::clone(&self.state),
            run,
            estimate,
            day_key,
            month_key,
            settled: false,
        })
    }

    /// Releases `reservation` and records the actual usage of the call it
    /// covered. Usage is charged even if it exceeds the reservation.
    pub fn commit(&self, mut reservation: Reservation, record: UsageRecord) {
        debug_assert_eq!(reservation.run, record.run, "usage committed against another run");
        let now = self.clock.now();
        let mut state = lock(&self.state);
        reservation.release_into(&mut state);
        state.roll(now);

        let tokens = record.total_tokens();
        if tokens > reservation.estimate.tokens {
            warn!(
                run_id = %record.run,
                backend = %record.backend,
                reserved = %reservation.estimate.tokens,
                actual = %tokens,
                "Model call used more tokens than reserved"
            );
        }

        state
            .episodes
            .entry(record.run)
            .or_default()
            .charge(tokens, record.cost);
        state.day.charge(tokens, record.cost);
        state.month.charge(tokens, record.cost);

        self.warn_near_ceilings(&mut state);
        state.records.push(record);
    }

    /// Headroom left in `scope`, counting outstanding reservations as spent.
    pub fn remaining(&self, scope: BudgetScope) -> Remaining {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.roll(now);
        match scope {
            BudgetScope::Episode(run) => {
                let held = state
                    .episodes
                    .get(&run)
                    .map(Tally::held_tokens)
                    .unwrap_or_default();
                Remaining::Tokens(self.ceilings.episode_tokens.saturating_sub(held))
            }
            BudgetScope::Day => Remaining::Tokens(
                self.ceilings
                    .daily_tokens
                    .saturating_sub(state.day.held_tokens()),
            ),
            BudgetScope::Month => Remaining::Spend(
                self.ceilings
                    .monthly_budget_usd
                    .remaining_after(state.month.held_cost()),
            ),
        }
    }

    /// Committed usage for `run`.
    pub fn usage_for(&self, run: RunId) -> RunUsage {
        let state = lock(&self.state);
        state
            .records
            .iter()
            .filter(|r| r.run == run)
            .fold(RunUsage::default(), |mut acc, r| {
                acc.tokens += r.total_tokens();
                acc.cost += r.cost;
                acc.calls += 1;
                acc
            })
    }

    /// Every record committed through this ledger, in commit order.
    pub fn records(&self) -> Vec<UsageRecord> {
        lock(&self.state).records.clone()
    }

    /// Records committed for `run`, in commit order.
    pub fn records_for(&self, run: RunId) -> Vec<UsageRecord> {
        lock(&self.state)
            .records
            .iter()
            .filter(|r| r.run == run)
            .cloned()
            .collect()
    }

    /// Day and month usage against their ceilings.
    pub fn summary(&self) -> UsageSummary {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.roll(now);
        UsageSummary {
            day: state.day_key,
            daily_tokens: state.day.used_tokens,
            daily_limit: self.ceilings.daily_tokens,
            daily_cost: state.day.used_cost,
            month: state.month_key,
            monthly_tokens: state.month.used_tokens,
            monthly_cost: state.month.used_cost,
            monthly_budget: TokenCost::new(self.ceilings.monthly_budget_usd.as_f64())
                .unwrap_or_default(),
        }
    }

    fn warn_near_ceilings(&self, state: &mut LedgerState) {
        let ratio = self.ceilings.warn_ratio;
        let daily = state.day.used_tokens.as_u64() as f64;
        let daily_limit = self.ceilings.daily_tokens.as_u64() as f64;
        if daily >= daily_limit * ratio && state.warned_day != Some(state.day_key) {
            state.warned_day = Some(state.day_key);
            warn!(
                used = daily,
                limit = daily_limit,
                percent = (daily / daily_limit * 1000.0).round() / 10.0,
                "Daily token usage approaching ceiling"
            );
        }
        let monthly = state.month.used_cost.as_f64();
        let budget = self.ceilings.monthly_budget_usd.as_f64();
        if monthly >= budget * ratio && state.warned_month != Some(state.month_key) {
            state.warned_month = Some(state.month_key);
            warn!(
                used_usd = monthly,
                budget_usd = budget,
                percent = (monthly / budget * 1000.0).round() / 10.0,
                "Monthly spend approaching budget"
            );
        }
    }
}

/// `None` if the request fits; otherwise the fraction of the request the
/// remaining headroom would cover.
fn token_check(tally: &Tally, ceiling: TokenCount, requested: TokenCount) -> Option<f64> {
    let remaining = ceiling.saturating_sub(tally.held_tokens());
    if !remaining.is_zero() && requested <= remaining {
        None
    } else if requested.is_zero() {
        Some(0.0)
    } else {
        Some(remaining.as_u64() as f64 / requested.as_u64() as f64)
    }
}

fn cost_check(tally: &Tally, budget: f64, requested: TokenCost) -> Option<f64> {
    let remaining = (budget - tally.held_cost().as_f64()).max(0.0);
    if remaining > 0.0 && requested.as_f64() <= remaining {
        None
    } else if requested.is_zero() {
        Some(0.0)
    } else {
        Some(remaining / requested.as_f64())
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// A granted hold on budget for one model call.
///
/// Pass it to [`BudgetLedger::commit`] once the call returns. Dropping it
/// uncommitted (e.g. when the calling future is cancelled) releases the hold.
#[must_use = "a reservation holds budget until it is committed or dropped"]
pub struct Reservation {
    state: Arc<Mutex<LedgerState>>,
    run: RunId,
    estimate: Estimate,
    day_key: NaiveDate,
    month_key: MonthKey,
    settled: bool,
}

impl Reservation {
    /// The run the reservation was made for.
    pub fn run(&self) -> RunId {
        self.run
    }

    /// The reserved estimate.
    pub fn estimate(&self) -> Estimate {
        self.estimate
    }

    fn release_into(&mut self, state: &mut LedgerState) {
        if self.settled {
            return;
        }
        self.settled = true;
        if let Some(episode) = state.episodes.get_mut(&self.run) {
            episode.release(self.estimate);
        }
        // Holds on a day or month that has since rolled over were discarded
        // with that tally.
        if state.day_key == self.day_key {
            state.day.release(self.estimate);
        }
        if state.month_key == self.month_key {
            state.month.release(self.estimate);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("run", &self.run)
            .field("estimate", &self.estimate)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            let state = Arc::clone(&self.state);
            let mut guard = lock(&state);
            self.release_into(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UsageOutcome;
    use crate::{BackendName, CostBudget};
    use chrono::{TimeZone, Utc};

    struct FixedClock(Mutex<Timestamp>);

    impl FixedClock {
        fn at(y: i32, m: u32, d: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Timestamp::from_utc(
                Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
            ))))
        }

        fn set(&self, y: i32, m: u32, d: u32) {
            *self.0.lock().unwrap() =
                Timestamp::from_utc(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap());
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            *self.0.lock().unwrap()
        }
    }

    fn ceilings(episode: u64, daily: u64, monthly: f64) -> BudgetCeilings {
        BudgetCeilings {
            episode_tokens: TokenCount::new(episode),
            daily_tokens: TokenCount::new(daily),
            monthly_budget_usd: CostBudget::new(monthly).unwrap(),
            warn_ratio: 0.8,
        }
    }

    fn estimate(tokens: u64, cost: f64) -> Estimate {
        Estimate {
            tokens: TokenCount::new(tokens),
            cost: TokenCost::new(cost).unwrap(),
        }
    }

    fn record(run: RunId, tokens: u64, cost: f64, at: Timestamp) -> UsageRecord {
        UsageRecord {
            run,
            backend: BackendName::new("claude").unwrap(),
            task_class: TaskClass::Reasoning,
            input_tokens: TokenCount::new(tokens),
            output_tokens: TokenCount::zero(),
            cost: TokenCost::new(cost).unwrap(),
            outcome: UsageOutcome::Succeeded,
            recorded_at: at,
        }
    }

    #[test]
    fn reservation_then_commit_charges_actual_usage() {
        let clock = FixedClock::at(2026, 5, 4);
        let ledger = BudgetLedger::with_clock(ceilings(1000, 5000, 10.0), clock.clone());
        let run = RunId::new_random();

        let reservation = ledger
            .reserve(run, TaskClass::Reasoning, estimate(400, 0.01))
            .unwrap();
        assert_eq!(
            ledger.remaining(BudgetScope::Episode(run)),
            Remaining::Tokens(TokenCount::new(600))
        );

        ledger.commit(reservation, record(run, 150, 0.002, clock.now()));
        assert_eq!(
            ledger.remaining(BudgetScope::Episode(run)),
            Remaining::Tokens(TokenCount::new(850))
        );
        assert_eq!(
            ledger.remaining(BudgetScope::Day),
            Remaining::Tokens(TokenCount::new(4850))
        );
        assert_eq!(ledger.usage_for(run).calls, 1);
        assert_eq!(ledger.records_for(run).len(), 1);
    }

    #[test]
    fn exhausted_episode_denies_every_request() {
        let clock = FixedClock::at(2026, 5, 4);
        let ledger = BudgetLedger::with_clock(ceilings(100, 5000, 10.0), clock.clone());
        let run = RunId::new_random();
        let r = ledger
            .reserve(run, TaskClass::Reasoning, estimate(100, 0.0))
            .unwrap();
        ledger.commit(r, record(run, 100, 0.0, clock.now()));
        assert_eq!(
            ledger.remaining(BudgetScope::Episode(run)),
            Remaining::Tokens(TokenCount::zero())
        );

        let denial = ledger
            .reserve(run, TaskClass::BulkGeneration, estimate(0, 0.0))
            .unwrap_err();
        assert_eq!(denial.reason, DenialReason::EpisodeLimit);

        // Another run is unaffected by this run's episode ceiling.
        assert!(ledger
            .reserve(RunId::new_random(), TaskClass::Reasoning, estimate(50, 0.0))
            .is_ok());
    }

    #[test]
    fn most_restrictive_denial_is_reported() {
        let clock = FixedClock::at(2026, 5, 4);
        // Episode would cover 90% of the request, the day only 20%.
        let ledger = BudgetLedger::with_clock(ceilings(900, 200, 10.0), clock);
        let denial = ledger
            .reserve(RunId::new_random(), TaskClass::Reasoning, estimate(1000, 0.0))
            .unwrap_err();
        assert_eq!(denial.reason, DenialReason::DailyLimit);
        assert_eq!(denial.requested, TokenCount::new(1000));
    }

    #[test]
    fn monthly_budget_is_checked_in_dollars() {
        let clock = FixedClock::at(2026, 5, 4);
        let ledger = BudgetLedger::with_clock(ceilings(10_000, 10_000, 1.0), clock);
        let denial = ledger
            .reserve(RunId::new_random(), TaskClass::Reasoning, estimate(10, 1.5))
            .unwrap_err();
        assert_eq!(denial.reason, DenialReason::MonthlyBudget);
    }

    #[test]
    fn dropped_reservation_releases_its_hold() {
        let clock = FixedClock::at(2026, 5, 4);
        let ledger = BudgetLedger::with_clock(ceilings(1000, 1000, 10.0), clock);
        let run = RunId::new_random();
        {
            let _held = ledger
                .reserve(run, TaskClass::Reasoning, estimate(1000, 0.0))
                .unwrap();
            assert!(ledger
                .reserve(run, TaskClass::Reasoning, estimate(1, 0.0))
                .is_err());
        }
        assert!(ledger
            .reserve(run, TaskClass::Reasoning, estimate(1000, 0.0))
            .is_ok());
    }

    #[test]
    fn day_rollover_resets_daily_but_not_monthly_usage() {
        let clock = FixedClock::at(2026, 5, 4);
        let ledger = BudgetLedger::with_clock(ceilings(10_000, 100, 10.0), clock.clone());
        let run = RunId::new_random();
        let r = ledger
            .reserve(run, TaskClass::Reasoning, estimate(100, 0.5))
            .unwrap();
        ledger.commit(r, record(run, 100, 0.5, clock.now()));
        assert!(ledger
            .reserve(RunId::new_random(), TaskClass::Reasoning, estimate(1, 0.0))
            .is_err());

        clock.set(2026, 5, 5);
        assert_eq!(
            ledger.remaining(BudgetScope::Day),
            Remaining::Tokens(TokenCount::new(100))
        );
        assert_eq!(
            ledger.remaining(BudgetScope::Month),
            Remaining::Spend(TokenCost::new(9.5).unwrap())
        );
    }

    #[test]
    fn seeding_counts_only_current_day_and_month() {
        let clock = FixedClock::at(2026, 5, 4);
        let ledger = BudgetLedger::with_clock(ceilings(10_000, 1_000, 10.0), clock);
        let old_run = RunId::new_random();
        let history = vec![
            record(old_run, 300, 1.0, Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap())),
            record(old_run, 200, 2.0, Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap())),
            record(old_run, 900, 4.0, Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 4, 30, 8, 0, 0).unwrap())),
        ];
        ledger.seed(&history);

        let summary = ledger.summary();
        assert_eq!(summary.daily_tokens, TokenCount::new(300));
        assert_eq!(summary.monthly_tokens, TokenCount::new(500));
        assert!((summary.monthly_cost.as_f64() - 3.0).abs() < 1e-9);
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn concurrent_reservations_never_overspend_the_day() {
        let ledger = BudgetLedger::new(ceilings(1_000_000, 1_000, 1000.0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let run = RunId::new_random();
                    let mut granted = 0u64;
                    for _ in 0..50 {
                        if let Ok(r) = ledger.reserve(run, TaskClass::BulkGeneration, estimate(10, 0.0)) {
                            let rec = record(run, 10, 0.0, Timestamp::now());
                            ledger.commit(r, rec);
                            granted += 10;
                        }
                    }
                    granted
                })
            })
            .collect();
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1_000);
        let committed: TokenCount = ledger.records().iter().map(UsageRecord::total_tokens).sum();
        assert_eq!(committed, TokenCount::new(1_000));
    }
}
