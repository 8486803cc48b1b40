//! Total and Activity timers.
//!
//! # Design Decisions
//! - Both timers are delayed tasks on the worker holding only a `Weak`
//!   reference and the attempt generation
//! - Progress never touches the Activity timer directly; it only pushes the
//!   deadline forward. When the timer fires early relative to the live
//!   deadline it re-arms itself for the remainder
//! - An expired timer hands its cause to the abort path, which marks the
//!   attempt only while it is still live

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::{AbortCause, RequestInner};
use crate::manager::ManagerShared;

impl RequestInner {
    /// Microseconds since the request was created.
    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Push the activity deadline forward after observed progress.
    pub(super) fn touch_activity(&self) {
        let window = self.activity_window_us.load(Ordering::Acquire);
        if window == 0 {
            return;
        }
        self.activity_deadline_us
            .fetch_max(self.now_micros() + window, Ordering::AcqRel);
    }

    /// Arm the Total and (optionally) Activity timers for an attempt.
    pub(super) fn arm_timers(
        self: &Arc<Self>,
        manager: &ManagerShared,
        generation: u64,
        total: Option<Duration>,
        activity: Option<Duration>,
    ) {
        if let Some(total) = total {
            let weak = Arc::downgrade(self);
            let handle = manager.scheduler().schedule_after(total, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_total_timeout(generation);
                }
            });
            self.total_timer.arm(handle);
        }

        if let Some(activity) = activity {
            let window = (activity.as_micros() as u64).max(1);
            self.activity_window_us.store(window, Ordering::Release);
            self.activity_deadline_us
                .store(self.now_micros() + window, Ordering::Release);
            self.schedule_activity_check(manager, generation, activity);
        }
    }

    fn schedule_activity_check(
        self: &Arc<Self>,
        manager: &ManagerShared,
        generation: u64,
        delay: Duration,
    ) {
        let weak = Arc::downgrade(self);
        let handle = manager.scheduler().schedule_after(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_activity_timer(generation);
            }
        });
        self.activity_timer.arm(handle);
    }

    fn on_total_timeout(self: &Arc<Self>, generation: u64) {
        self.abort(generation, AbortCause::TotalTimeout);
    }

    fn on_activity_timer(self: &Arc<Self>, generation: u64) {
        if !self.is_live(generation) || self.timed_out.load(Ordering::SeqCst) {
            return;
        }

        let now = self.now_micros();
        let deadline = self.activity_deadline_us.load(Ordering::Acquire);
        if deadline > now {
            let Some(manager) = self.manager.upgrade() else {
                return;
            };
            self.schedule_activity_check(&manager, generation, Duration::from_micros(deadline - now));
            return;
        }

        self.abort(generation, AbortCause::ActivityTimeout);
    }
}
