//! Build scheduling (spec §4.F/§4.G): bounds how many target builds may run
//! concurrently, and optionally tracks which target is "in focus" so its
//! builds get a longer timeout budget under contention.
//!
//! The semaphore is the same bounded-concurrency primitive the teacher
//! reaches for elsewhere in the actor-style supervisor loops; the
//! focus-decay tracker has no teacher counterpart and is grounded directly
//! on spec §4.F's `buildScheduling.prioritization` fields.

use crate::config::{BuildScheduling, Prioritization};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// The semaphore and prioritization rules live behind `Mutex`es rather than
/// being fixed at construction, so a config hot-reload's `schedulingChanged`
/// (spec §4.G) can re-parameterize a running daemon's scheduler in place:
/// every target controller holds the same `Arc<Scheduler>`, and the next
/// `acquire`/`isFocused`/`effectiveTimeout` call sees the new values. A
/// build that already holds a permit from the old semaphore keeps running
/// to completion against it.
pub struct Scheduler {
    semaphore: Mutex<Arc<Semaphore>>,
    focus: Mutex<HashMap<String, DateTime<Utc>>>,
    prioritization: Mutex<Option<Prioritization>>,
}

impl Scheduler {
    pub fn new(build_scheduling: &BuildScheduling) -> Self {
        Self {
            semaphore: Mutex::new(Arc::new(Semaphore::new(build_scheduling.parallelization.max(1)))),
            focus: Mutex::new(HashMap::new()),
            prioritization: Mutex::new(build_scheduling.prioritization.filter(|p| p.enabled)),
        }
    }

    /// Returns the current semaphore, to be acquired via
    /// `.acquire_owned()` so a held permit outlives a concurrent
    /// [`reparameterize`](Self::reparameterize) call.
    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.lock().unwrap().clone()
    }

    /// Records that `target` just had a change arrive or a successful
    /// build complete, per spec §4.F's focus-detection window.
    pub fn record_focus(&self, target: &str, now: DateTime<Utc>) {
        if self.prioritization.lock().unwrap().is_some() {
            self.focus.lock().unwrap().insert(target.to_string(), now);
        }
    }

    /// True if `target` was focused within the detection window and has
    /// not yet decayed past `priority_decay_time`.
    pub fn is_focused(&self, target: &str, now: DateTime<Utc>) -> bool {
        let Some(prioritization) = *self.prioritization.lock().unwrap() else {
            return false;
        };
        let window = Duration::from_millis(prioritization.focus_detection_window)
            + Duration::from_millis(prioritization.priority_decay_time);
        let guard = self.focus.lock().unwrap();
        guard.get(target).is_some_and(|&last| {
            let elapsed = now.signed_duration_since(last);
            elapsed >= chrono::Duration::zero() && elapsed <= chrono::Duration::from_std(window).unwrap_or_default()
        })
    }

    /// Scales `base_timeout` up for a focused target, per
    /// `buildTimeoutMultiplier`, so an interactively-awaited build is less
    /// likely to be killed under load from background targets.
    pub fn effective_timeout(&self, target: &str, base_timeout: Duration, now: DateTime<Utc>) -> Duration {
        if self.is_focused(target, now) {
            let multiplier = self.prioritization.lock().unwrap().map(|p| p.build_timeout_multiplier).unwrap_or(1.0);
            base_timeout.mul_f64(multiplier.max(1.0))
        } else {
            base_timeout
        }
    }

    /// Applies a hot-reloaded `buildScheduling` section in place (spec
    /// §4.G `schedulingChanged`): swaps in a semaphore sized to the new
    /// `parallelization` and replaces the prioritization rules. Called by
    /// the Orchestrator instead of replacing the `Arc<Scheduler>`, since
    /// every controller task already holds a clone of the original.
    pub fn reparameterize(&self, build_scheduling: &BuildScheduling) {
        *self.semaphore.lock().unwrap() = Arc::new(Semaphore::new(build_scheduling.parallelization.max(1)));
        *self.prioritization.lock().unwrap() = build_scheduling.prioritization.filter(|p| p.enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_prioritization_never_focuses() {
        let scheduling = BuildScheduling { parallelization: 2, prioritization: None };
        let scheduler = Scheduler::new(&scheduling);
        let now = Utc::now();
        scheduler.record_focus("app", now);
        assert!(!scheduler.is_focused("app", now));
    }

    #[test]
    fn test_focus_recorded_then_expires() {
        let scheduling = BuildScheduling {
            parallelization: 1,
            prioritization: Some(Prioritization {
                enabled: true,
                focus_detection_window: 1000,
                priority_decay_time: 0,
                build_timeout_multiplier: 2.0,
            }),
        };
        let scheduler = Scheduler::new(&scheduling);
        let now = Utc::now();
        scheduler.record_focus("app", now);
        assert!(scheduler.is_focused("app", now));

        let later = now + chrono::Duration::seconds(5);
        assert!(!scheduler.is_focused("app", later));
    }

    #[test]
    fn test_effective_timeout_scaled_when_focused() {
        let scheduling = BuildScheduling {
            parallelization: 1,
            prioritization: Some(Prioritization {
                enabled: true,
                focus_detection_window: 1000,
                priority_decay_time: 0,
                build_timeout_multiplier: 3.0,
            }),
        };
        let scheduler = Scheduler::new(&scheduling);
        let now = Utc::now();
        scheduler.record_focus("app", now);
        let timeout = scheduler.effective_timeout("app", Duration::from_secs(10), now);
        assert_eq!(timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_reparameterize_changes_permit_count() {
        let scheduler = Scheduler::new(&BuildScheduling { parallelization: 1, prioritization: None });
        assert_eq!(scheduler.semaphore().available_permits(), 1);

        scheduler.reparameterize(&BuildScheduling { parallelization: 4, prioritization: None });
        assert_eq!(scheduler.semaphore().available_permits(), 4);
    }

    #[test]
    fn test_reparameterize_disables_prioritization() {
        let scheduling = BuildScheduling {
            parallelization: 1,
            prioritization: Some(Prioritization {
                enabled: true,
                focus_detection_window: 1000,
                priority_decay_time: 0,
                build_timeout_multiplier: 2.0,
            }),
        };
        let scheduler = Scheduler::new(&scheduling);
        let now = Utc::now();
        scheduler.record_focus("app", now);
        assert!(scheduler.is_focused("app", now));

        scheduler.reparameterize(&BuildScheduling { parallelization: 1, prioritization: None });
        assert!(!scheduler.is_focused("app", now));
    }
}
