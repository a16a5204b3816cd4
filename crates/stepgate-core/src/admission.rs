//! Token-bucket admission gate.
//!
//! Backed by a `governor` GCRA limiter: the bucket starts full at
//! `burst_capacity` tokens and refills continuously at `steady_rate` tokens
//! per second, never beyond capacity. Each admitted request debits one token;
//! a denied request leaves the state untouched.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Rate policy applied at ingress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionBudget {
    /// Tokens added per second.
    pub steady_rate: f64,
    /// Maximum tokens held; also the largest burst admitted at once.
    pub burst_capacity: u32,
}

impl Default for AdmissionBudget {
    fn default() -> Self {
        Self {
            steady_rate: 10.0,
            burst_capacity: 20,
        }
    }
}

/// Longest refill interval accepted for a single token.
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

impl AdmissionBudget {
    /// The equivalent `governor` quota: one token every `1 / steady_rate`
    /// seconds, at most `burst_capacity` held.
    pub fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.burst_capacity).unwrap_or(NonZeroU32::MIN);
        let period = Duration::try_from_secs_f64(1.0 / self.steady_rate)
            .unwrap_or(MAX_PERIOD)
            .clamp(Duration::from_nanos(1), MAX_PERIOD);
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(burst)
    }
}

type Limiter<C> =
    RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

pub struct AdmissionGate<C: Clock = DefaultClock> {
    budget: AdmissionBudget,
    limiter: Limiter<C>,
}

impl<C: Clock> std::fmt::Debug for AdmissionGate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl AdmissionGate {
    pub fn new(budget: AdmissionBudget) -> Self {
        Self::with_clock(budget, &DefaultClock::default())
    }
}

impl<C: Clock> AdmissionGate<C> {
    /// A full bucket driven by `clock`. Tests pass a `FakeRelativeClock`.
    pub fn with_clock(budget: AdmissionBudget, clock: &C) -> Self {
        Self {
            budget,
            limiter: RateLimiter::direct_with_clock(budget.quota(), clock),
        }
    }

    pub fn budget(&self) -> AdmissionBudget {
        self.budget
    }

    /// Debit one token if one is available. Refill and debit are a single
    /// atomic step; denials have no side effect.
    pub fn try_admit(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(AdmissionBudget::default())
    }
}
