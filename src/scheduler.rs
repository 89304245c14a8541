//! Poll scheduling against the server's clock.
//!
//! Never poll before `updated_at + interval + safety` (server frame), spread
//! clients with a little jitter, and keep exactly one timer armed.

use rand::Rng;
use std::future::pending;
use std::pin::Pin;
use tokio::time::{sleep_until, Duration, Instant, Sleep};

use crate::clock::ClockSkew;
use crate::logging::log_schedule;
use crate::state::Config;

/// Longest a single poll may be put off, whatever the feed metadata claims.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleConfig {
    pub safety_secs: f64,
    pub jitter_min_secs: f64,
    pub jitter_max_secs: f64,
    pub min_delay_ms: u64,
}

impl ScheduleConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            safety_secs: cfg.fetch_safety_secs,
            jitter_min_secs: cfg.jitter_min_secs,
            jitter_max_secs: cfg.jitter_max_secs,
            min_delay_ms: cfg.min_delay_ms,
        }
    }

    fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Seconds to a timer delay: floored at the minimum, capped at a day.
    /// Non-finite input takes the floor.
    fn bounded_delay(&self, secs: f64) -> Duration {
        let floor = self.min_delay();
        if !secs.is_finite() || secs <= floor.as_secs_f64() {
            return floor;
        }
        Duration::from_secs_f64(secs.min(MAX_DELAY.as_secs_f64())).max(floor)
    }

    /// Uniform in `[min, max)`; collapses to `min` when the range is empty.
    pub fn draw_jitter<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.jitter_max_secs > self.jitter_min_secs {
            rng.gen_range(self.jitter_min_secs..self.jitter_max_secs)
        } else {
            self.jitter_min_secs
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// When the next poll fires, in both clock frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulePlan {
    pub delay: Duration,
    pub earliest_server: f64,
    pub fire_at_server: f64,
}

pub fn plan_next_fetch(
    cfg: &ScheduleConfig,
    updated_at_server: f64,
    interval_secs: f64,
    skew: &ClockSkew,
    now_client: f64,
    jitter_secs: f64,
) -> SchedulePlan {
    let earliest_server = updated_at_server + interval_secs + cfg.safety_secs;
    let target_client = skew.to_client(earliest_server) + jitter_secs;

    let delay = cfg.bounded_delay(target_client - now_client);

    SchedulePlan {
        delay,
        earliest_server,
        fire_at_server: skew.to_server(now_client + delay.as_secs_f64()),
    }
}

/// Owner of the single outstanding poll timer.
///
/// Must be created inside a tokio runtime.
pub struct Scheduler {
    cfg: ScheduleConfig,
    timer: Pin<Box<Sleep>>,
    deadline: Option<Instant>,
    last_plan: Option<SchedulePlan>,
}

impl Scheduler {
    pub fn new(cfg: ScheduleConfig) -> Self {
        Self {
            cfg,
            timer: Box::pin(sleep_until(far_future())),
            deadline: None,
            last_plan: None,
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.cfg
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the pending poll fires, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Most recent plan from [`Scheduler::schedule_next_fetch`].
    pub fn last_plan(&self) -> Option<SchedulePlan> {
        self.last_plan
    }

    /// Replace whatever was pending with a timer `delay` from now.
    pub fn arm(&mut self, delay: Duration) {
        let at = Instant::now() + delay;
        self.timer.as_mut().reset(at);
        self.deadline = Some(at);
    }

    pub fn cancel(&mut self) {
        self.timer.as_mut().reset(far_future());
        self.deadline = None;
    }

    /// Plan from the latest ingest and arm; returns the plan for inspection.
    pub fn schedule_next_fetch(
        &mut self,
        updated_at_server: f64,
        interval_secs: f64,
        skew: &ClockSkew,
        now_client: f64,
    ) -> SchedulePlan {
        let jitter = self.cfg.draw_jitter(&mut rand::thread_rng());
        let plan = plan_next_fetch(&self.cfg, updated_at_server, interval_secs, skew, now_client, jitter);
        self.arm(plan.delay);
        self.last_plan = Some(plan);
        log_schedule(plan.delay.as_secs_f64(), plan.earliest_server, plan.fire_at_server);
        plan
    }

    /// Fallback poll one interval out, only when nothing else is pending.
    pub fn arm_recovery(&mut self, interval_secs: f64) -> bool {
        if self.is_armed() {
            return false;
        }
        let delay = self.cfg.bounded_delay(interval_secs);
        self.arm(delay);
        true
    }

    /// Resolves when the armed timer fires; never resolves while disarmed.
    pub async fn wait(&mut self) {
        if self.deadline.is_none() {
            pending::<()>().await;
        }
        self.timer.as_mut().await;
        self.deadline = None;
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}
