//! Replay Scheduler
//!
//! Turns an ascending bar sequence into a paced stream of replay events.
//! Pull-based: each `next_event()` call performs at most one timed wait and
//! yields at most one event, so nothing is computed ahead of the consumer.
//!
//! Pacing rules:
//! - realtime: waits equal the simulated elapsed time between bars
//! - scaled: intrabar waits divided by `time_scale`, session gaps by `gap_scale`
//!
//! The scheduler is one-shot. Once it returns `Ok(None)` or an error it is
//! fused and keeps returning `Ok(None)`.

use crate::models::{Bar, GapReason, ReplayEvent, SessionGap, Tick};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// Bars further apart than this are treated as a market closure.
pub const SESSION_GAP_THRESHOLD_SECS: i64 = 30 * 60;

/// Interpolated prices are rounded to this many decimal places.
const PRICE_DECIMALS: i32 = 4;

/// Replay pacing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Wait the true elapsed time between bars.
    #[serde(default = "default_realtime")]
    pub realtime: bool,
    /// Compression factor for intrabar waits when not realtime.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    /// Compression factor for session gap waits when not realtime.
    #[serde(default = "default_gap_scale")]
    pub gap_scale: f64,
    /// Synthesize linearly interpolated ticks between closes.
    #[serde(default)]
    pub interpolate: bool,
    #[serde(default = "default_interpolate_step")]
    pub interpolate_step_seconds: u64,
}

fn default_realtime() -> bool {
    true
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_gap_scale() -> f64 {
    60.0
}

fn default_interpolate_step() -> u64 {
    1
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            realtime: true,
            time_scale: 1.0,
            gap_scale: 60.0,
            interpolate: false,
            interpolate_step_seconds: 1,
        }
    }
}

impl ReplayConfig {
    /// Scaled (non-realtime) config compressing intrabar time by `time_scale`.
    pub fn scaled(time_scale: f64) -> Self {
        Self {
            realtime: false,
            time_scale,
            ..Self::default()
        }
    }

    pub fn with_interpolation(mut self, step_seconds: u64) -> Self {
        self.interpolate = true;
        self.interpolate_step_seconds = step_seconds;
        self
    }

    pub fn validate(&self) -> Result<(), ReplayError> {
        if !self.realtime {
            if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
                return Err(ReplayError::InvalidTimeScale(self.time_scale));
            }
            if !self.gap_scale.is_finite() || self.gap_scale <= 0.0 {
                return Err(ReplayError::InvalidGapScale(self.gap_scale));
            }
        }
        if self.interpolate && self.interpolate_step_seconds == 0 {
            return Err(ReplayError::InvalidInterpolateStep);
        }
        Ok(())
    }

    /// Wall-clock seconds to wait for `secs` of simulated intrabar time.
    fn intrabar_wait(&self, secs: f64) -> f64 {
        if self.realtime {
            secs
        } else {
            secs / self.time_scale
        }
    }

    /// Wall-clock seconds to wait across a session gap of `secs`.
    fn gap_wait(&self, secs: f64) -> f64 {
        if self.realtime {
            secs
        } else {
            secs / self.gap_scale
        }
    }
}

/// Errors that abort a replay.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayError {
    /// Non-positive or non-finite `time_scale` in scaled mode
    InvalidTimeScale(f64),
    /// Non-positive or non-finite `gap_scale` in scaled mode
    InvalidGapScale(f64),
    /// Interpolation enabled with a zero step
    InvalidInterpolateStep,
    /// A bar is older than the one before it
    NonMonotonic {
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },
}

impl ReplayError {
    /// Configuration errors are raised before any event is produced.
    pub fn is_config_error(&self) -> bool {
        !matches!(self, Self::NonMonotonic { .. })
    }
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTimeScale(v) => write!(f, "time_scale must be > 0 (got {})", v),
            Self::InvalidGapScale(v) => write!(f, "gap_scale must be > 0 (got {})", v),
            Self::InvalidInterpolateStep => write!(f, "interpolate_step_seconds must be >= 1"),
            Self::NonMonotonic { previous, current } => write!(
                f,
                "Non-monotonic timestamps: {} follows {}",
                current, previous
            ),
        }
    }
}

impl std::error::Error for ReplayError {}

/// `true` when `next` is more than 30 minutes after `prev`.
pub fn is_session_gap(prev: NaiveDateTime, next: NaiveDateTime) -> bool {
    next - prev > ChronoDuration::seconds(SESSION_GAP_THRESHOLD_SECS)
}

fn seconds_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

fn round_price(price: f64) -> f64 {
    let factor = 10f64.powi(PRICE_DECIMALS);
    (price * factor).round() / factor
}

/// Wall-clock duration for a wait of `secs`. Waits too long for `Duration`
/// saturate; tokio caps the deadline at its far-future instant.
fn wait_duration(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Suspend for `secs` of wall-clock time. Non-positive waits return immediately.
async fn pace(secs: f64) {
    if let Some(wait) = wait_duration(secs) {
        tokio::time::sleep(wait).await;
    }
}

/// Progress between two bars that are not separated by a session gap.
#[derive(Debug)]
struct Interval {
    curr: Bar,
    prev_close: f64,
    prev_timestamp: NaiveDateTime,
    delta: f64,
    step: u64,
    /// Next interpolation index, starting at 1.
    next_step: u64,
    /// Interpolated ticks are emitted for indices `1..steps`.
    steps: u64,
    /// Simulated seconds already consumed by interpolated ticks.
    elapsed: f64,
}

impl Interval {
    fn interpolating(&self) -> bool {
        self.next_step < self.steps
    }
}

#[derive(Debug)]
enum Stage {
    /// Pull the next bar.
    Next,
    /// A session gap event was emitted; wait out the gap, then open `bar`.
    AfterGap { bar: Bar, gap_seconds: f64 },
    Interval(Interval),
}

/// Lazy, one-shot replay of a bar sequence.
#[derive(Debug)]
pub struct ReplayScheduler {
    bars: std::vec::IntoIter<Bar>,
    config: ReplayConfig,
    prev: Option<Bar>,
    stage: Stage,
    finished: bool,
    emitted: u64,
}

impl ReplayScheduler {
    /// Validates `config` up front so a bad config never produces an event.
    pub fn new(bars: Vec<Bar>, config: ReplayConfig) -> Result<Self, ReplayError> {
        config.validate()?;
        Ok(Self {
            bars: bars.into_iter(),
            config,
            prev: None,
            stage: Stage::Next,
            finished: false,
            emitted: 0,
        })
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Number of events produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Produce the next event, waiting out its simulated time first.
    ///
    /// Dropping the returned future mid-wait leaves the scheduler where it
    /// was; the wait restarts on the next call.
    pub async fn next_event(&mut self) -> Result<Option<ReplayEvent>, ReplayError> {
        while !self.finished {
            if let Some(wait) = self.pending_wait() {
                pace(wait).await;
            }
            if let Some(event) = self.advance()? {
                self.emitted += 1;
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Wall-clock wait owed before the current stage can emit.
    fn pending_wait(&self) -> Option<f64> {
        match &self.stage {
            Stage::Next => None,
            Stage::AfterGap { gap_seconds, .. } => Some(self.config.gap_wait(*gap_seconds)),
            Stage::Interval(iv) if iv.interpolating() => {
                Some(self.config.intrabar_wait(iv.step as f64))
            }
            Stage::Interval(iv) => {
                let remaining = iv.delta - iv.elapsed;
                (remaining > 0.0).then(|| self.config.intrabar_wait(remaining))
            }
        }
    }

    /// Emit whatever the current stage owes. `Ok(None)` means keep going.
    fn advance(&mut self) -> Result<Option<ReplayEvent>, ReplayError> {
        match std::mem::replace(&mut self.stage, Stage::Next) {
            Stage::Next => self.pull_bar(),
            Stage::AfterGap { bar, .. } => {
                let tick = Tick::real(&bar, bar.open);
                self.prev = Some(bar);
                Ok(Some(ReplayEvent::Tick(tick)))
            }
            Stage::Interval(mut iv) if iv.interpolating() => {
                let offset = iv.next_step * iv.step;
                let frac = offset as f64 / iv.delta;
                let price = round_price(iv.prev_close + (iv.curr.close - iv.prev_close) * frac);
                let timestamp = iv.prev_timestamp + ChronoDuration::seconds(offset as i64);
                trace!(%timestamp, price, step = iv.next_step, "interpolated tick");

                iv.elapsed += iv.step as f64;
                iv.next_step += 1;
                self.stage = Stage::Interval(iv);
                Ok(Some(ReplayEvent::Tick(Tick::interpolated(timestamp, price))))
            }
            Stage::Interval(iv) => {
                let tick = Tick::real(&iv.curr, iv.curr.close);
                self.prev = Some(iv.curr);
                Ok(Some(ReplayEvent::Tick(tick)))
            }
        }
    }

    fn pull_bar(&mut self) -> Result<Option<ReplayEvent>, ReplayError> {
        let Some(curr) = self.bars.next() else {
            self.finished = true;
            return Ok(None);
        };

        let Some(prev) = self.prev.as_ref() else {
            let tick = Tick::real(&curr, curr.close);
            self.prev = Some(curr);
            return Ok(Some(ReplayEvent::Tick(tick)));
        };

        let delta = seconds_between(prev.timestamp, curr.timestamp);
        if delta < 0.0 {
            self.finished = true;
            return Err(ReplayError::NonMonotonic {
                previous: prev.timestamp,
                current: curr.timestamp,
            });
        }

        if is_session_gap(prev.timestamp, curr.timestamp) {
            debug!(
                from = %prev.timestamp,
                to = %curr.timestamp,
                gap_seconds = delta,
                "session gap"
            );
            let gap = SessionGap {
                from: prev.timestamp,
                to: curr.timestamp,
                gap_seconds: delta,
                reason: GapReason::MarketClosed,
            };
            self.stage = Stage::AfterGap {
                bar: curr,
                gap_seconds: delta,
            };
            return Ok(Some(ReplayEvent::SessionGap(gap)));
        }

        let step = self.config.interpolate_step_seconds;
        let steps = if self.config.interpolate && delta >= step as f64 {
            (delta / step as f64).floor() as u64
        } else {
            0
        };

        self.stage = Stage::Interval(Interval {
            prev_close: prev.close,
            prev_timestamp: prev.timestamp,
            curr,
            delta,
            step,
            next_step: 1,
            steps,
            elapsed: 0.0,
        });
        Ok(None)
    }
}
