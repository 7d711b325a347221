//! Shared value types for the podcast-cmo domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. scores are in `[0.0, 1.0]`, token
//! counts are non-negative integers) and participate in domain computations.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Token and cost types
// ---------------------------------------------------------------------------

/// Number of tokens consumed or budgeted in a model call.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TokenCount(u64);

impl TokenCount {
    /// Creates a [`TokenCount`] from a raw integer.
    pub fn new(count: u64) -> Self {
        Self(count)
    }

    /// A count of zero tokens.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` if this count is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for TokenCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for TokenCount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for TokenCount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for TokenCount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, c| acc + c)
    }
}

// ---------------------------------------------------------------------------

/// Monetary cost of model token usage, expressed in US dollars.
///
/// Used for per-call, per-run, and per-month cost tracking. Callers are
/// responsible for rounding to suitable display precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TokenCost(f64);

impl TokenCost {
    /// Creates a [`TokenCost`] from a raw float value (USD).
    ///
    /// Returns `None` if `value` is negative, infinite, or NaN.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 0.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`TokenCost`] of exactly zero.
    pub fn zero() -> Self {
        Self(0.0)
    }

    /// Returns the underlying `f64` value (USD).
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Returns `true` if this cost is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self((self.0 - rhs.0).max(0.0))
    }
}

impl std::fmt::Display for TokenCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.6}", self.0)
    }
}

impl std::ops::Add for TokenCost {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for TokenCost {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for TokenCost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, c| acc + c)
    }
}

// ---------------------------------------------------------------------------

/// Maximum spend permitted over a scope (the monthly budget).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct CostBudget(f64);

impl CostBudget {
    /// Creates a [`CostBudget`] cap (USD).
    ///
    /// Returns `None` if `limit` is not strictly positive, infinite, or NaN.
    #[must_use]
    pub fn new(limit: f64) -> Option<Self> {
        if limit.is_finite() && limit > 0.0 {
            Some(Self(limit))
        } else {
            None
        }
    }

    /// Returns the budget limit as a `f64` (USD).
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Returns `true` if `accumulated` equals or exceeds this budget.
    pub fn is_exceeded_by(self, accumulated: TokenCost) -> bool {
        accumulated.as_f64() >= self.0
    }

    /// Spend still available under this budget after `accumulated`.
    pub fn remaining_after(self, accumulated: TokenCost) -> TokenCost {
        TokenCost((self.0 - accumulated.as_f64()).max(0.0))
    }
}

impl Default for CostBudget {
    /// The default monthly budget of $100.
    fn default() -> Self {
        Self(100.0)
    }
}

impl TryFrom<f64> for CostBudget {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("cost budget must be positive, got {value}"))
    }
}

impl From<CostBudget> for f64 {
    fn from(budget: CostBudget) -> Self {
        budget.0
    }
}

impl std::fmt::Display for CostBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// Per-backend token pricing in USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// USD per one million prompt (input) tokens.
    pub input_per_million: f64,
    /// USD per one million completion (output) tokens.
    pub output_per_million: f64,
}

impl Pricing {
    /// Creates a price table, returning `None` for negative or non-finite rates.
    pub fn new(input_per_million: f64, output_per_million: f64) -> Option<Self> {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if valid(input_per_million) && valid(output_per_million) {
            Some(Self {
                input_per_million,
                output_per_million,
            })
        } else {
            None
        }
    }

    /// A backend that costs nothing (local models, test stubs).
    pub fn free() -> Self {
        Self {
            input_per_million: 0.0,
            output_per_million: 0.0,
        }
    }

    /// Cost of a call that consumed the given input and output tokens.
    pub fn cost_of(&self, input: TokenCount, output: TokenCount) -> TokenCost {
        let usd = input.as_u64() as f64 * self.input_per_million / 1_000_000.0
            + output.as_u64() as f64 * self.output_per_million / 1_000_000.0;
        TokenCost::new(usd).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Task classes
// ---------------------------------------------------------------------------

/// A category of generation work used to select a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Reasoning-heavy work: extraction, research analysis, brand validation.
    Reasoning,
    /// High-volume drafting: post and thread generation.
    BulkGeneration,
}

impl TaskClass {
    /// Every task class, in routing-table order.
    pub const ALL: [TaskClass; 2] = [TaskClass::Reasoning, TaskClass::BulkGeneration];

    /// The configuration key for this class.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskClass::Reasoning => "reasoning",
            TaskClass::BulkGeneration => "bulk_generation",
        }
    }
}

impl std::fmt::Display for TaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Score types
// ---------------------------------------------------------------------------

/// Priority of an insight for content creation, in the range `[0.0, 1.0]`.
///
/// Insights below the configured minimum are not carried into research.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PriorityScore(f64);

impl PriorityScore {
    /// Creates a [`PriorityScore`], returning `None` if `value` is outside
    /// the valid range `[0.0, 1.0]`.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a score, clamping `value` into `[0.0, 1.0]` (NaN becomes `0.0`).
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    /// Returns the score as an `f64` in `[0.0, 1.0]`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for PriorityScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// A brand-voice conformance score in the range `[0.0, 1.0]`.
///
/// Produced by the validation stage, either from a model verdict or the
/// heuristic fallback, and compared against the configured approval threshold.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct BrandVoiceScore(f64);

impl BrandVoiceScore {
    /// Creates a [`BrandVoiceScore`], returning `None` if `value` is outside
    /// the valid range `[0.0, 1.0]`.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the score as an `f64` in `[0.0, 1.0]`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for BrandVoiceScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// Reliability tag attached to a research finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    /// Credibility of at least 0.85.
    High,
    /// Credibility of at least 0.6.
    Medium,
    /// Anything lower.
    Low,
}

impl Reliability {
    /// Buckets a credibility score in `[0.0, 1.0]`.
    pub fn from_credibility(score: f64) -> Self {
        if score >= 0.85 {
            Reliability::High
        } else if score >= 0.6 {
            Reliability::Medium
        } else {
            Reliability::Low
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// The UTC calendar day this timestamp falls on (daily budget scope key).
    pub fn day(self) -> NaiveDate {
        self.0.date_naive()
    }

    /// The UTC calendar month this timestamp falls in (monthly budget scope key).
    pub fn month(self) -> MonthKey {
        MonthKey {
            year: self.0.year(),
            month: self.0.month(),
        }
    }

    /// Returns this timestamp shifted forward by `duration`, saturating at the
    /// maximum representable time.
    pub fn plus(self, duration: std::time::Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(self)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// A calendar month in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey {
    /// Calendar year.
    pub year: i32,
    /// Month of the year, `1..=12`.
    pub month: u32,
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
