//! Vote-rate anomaly monitor
//!
//! Tracks arrival times of incoming votes in a trailing window and flags
//! bursts. A small random trigger also fires independently of the rate so
//! downstream detection pipelines see sporadic anomalies.
//!
//! The window is bounded to `rate_threshold + 1` timestamps: once it holds
//! more than the threshold the oldest arrival is dropped. This keeps memory
//! flat under sustained load without changing any verdict, because more than
//! `threshold` arrivals inside the window implies the newest
//! `threshold + 1` are all inside it.

use crate::config::{AnomalyConfig, AnomalyPolicy, MAX_ANOMALY_WINDOW_SECS, MAX_RATE_THRESHOLD};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;

/// Why a vote was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyReason {
    /// Too many arrivals inside the trailing window
    HighRate {
        /// Arrivals counted in the window, including this one
        window_count: usize,
    },
    /// Random sporadic trigger
    RandomTrigger,
}

/// Verdict for one arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyVerdict {
    /// Whether the arrival is flagged
    pub flagged: bool,
    /// Reason, when flagged
    pub reason: Option<AnomalyReason>,
}

/// Sliding-window rate tracker
#[derive(Debug)]
pub struct AnomalyMonitor {
    window: Duration,
    threshold: usize,
    random_probability: f64,
    policy: AnomalyPolicy,
    arrivals: Mutex<VecDeque<DateTime<Utc>>>,
}

impl AnomalyMonitor {
    /// Create a monitor from configuration
    ///
    /// Out-of-range settings are clamped to the limits `Config::validate`
    /// enforces.
    pub fn new(config: &AnomalyConfig) -> Self {
        let window_secs = config.window_secs.clamp(1, MAX_ANOMALY_WINDOW_SECS);
        let threshold = config.rate_threshold.min(MAX_RATE_THRESHOLD);

        Self {
            window: Duration::seconds(window_secs),
            threshold,
            random_probability: config.random_trigger_probability.clamp(0.0, 1.0),
            policy: config.policy,
            arrivals: Mutex::new(VecDeque::with_capacity(threshold + 1)),
        }
    }

    /// Advisory or blocking
    pub fn policy(&self) -> AnomalyPolicy {
        self.policy
    }

    /// Record an arrival and return whether it is flagged
    pub fn check(&self, arrival: DateTime<Utc>) -> bool {
        self.inspect(arrival).flagged
    }

    /// Record an arrival and return the full verdict
    pub fn inspect(&self, arrival: DateTime<Utc>) -> AnomalyVerdict {
        let window_count = {
            let mut arrivals = self.arrivals.lock();

            // Evict everything at least `window` older than this arrival
            while arrivals
                .front()
                .is_some_and(|oldest| arrival - *oldest >= self.window)
            {
                arrivals.pop_front();
            }

            arrivals.push_back(arrival);
            if arrivals.len() > self.threshold + 1 {
                arrivals.pop_front();
            }
            arrivals.len()
        };

        if window_count > self.threshold {
            tracing::warn!(
                window_count,
                threshold = self.threshold,
                "High vote rate detected"
            );
            return AnomalyVerdict {
                flagged: true,
                reason: Some(AnomalyReason::HighRate { window_count }),
            };
        }

        if self.random_probability > 0.0 && rand::thread_rng().gen_bool(self.random_probability) {
            tracing::warn!("Simulated anomaly random trigger");
            return AnomalyVerdict {
                flagged: true,
                reason: Some(AnomalyReason::RandomTrigger),
            };
        }

        AnomalyVerdict {
            flagged: false,
            reason: None,
        }
    }

    /// Arrivals currently inside the window (as of the last check)
    pub fn window_len(&self) -> usize {
        self.arrivals.lock().len()
    }

    /// Forget all recorded arrivals
    pub fn reset(&self) {
        self.arrivals.lock().clear();
    }
}
