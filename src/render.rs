//! Pure per-tick computation: interpolated price, staleness, anchor deltas,
//! sparkline geometry, and the text they turn into. No terminal I/O here.

use crate::anchors::AnchorDelta;
use crate::feed::Sample;
use crate::state::{AppState, Trend};

/// Linear animation from the previous sample to the newest one, ending at the
/// predicted next update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationWindow {
    pub start_value: f64,
    pub target_value: f64,
    pub start_server: f64,
    pub duration_secs: f64,
}

impl AnimationWindow {
    /// Duration is never below one second, even when the predicted update
    /// already passed.
    pub fn new(start_value: f64, target_value: f64, now_server: f64, next_update_server: f64) -> Self {
        Self {
            start_value,
            target_value,
            start_server: now_server,
            duration_secs: (next_update_server - now_server).max(1.0),
        }
    }

    pub fn progress(&self, now_server: f64) -> f64 {
        ((now_server - self.start_server) / self.duration_secs).clamp(0.0, 1.0)
    }

    pub fn value_at(&self, now_server: f64) -> f64 {
        lerp(self.start_value, self.target_value, self.progress(now_server))
    }
}

/// Exact at both ends.
pub fn lerp(start: f64, target: f64, t: f64) -> f64 {
    if t <= 0.0 {
        start
    } else if t >= 1.0 {
        target
    } else {
        start + (target - start) * t
    }
}

pub fn is_stale(now_server: f64, updated_at_server: f64, interval_secs: f64, multiplier: f64) -> bool {
    now_server - updated_at_server > interval_secs * multiplier
}

/// What one tick wants on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub value: f64,
    pub trend: Trend,
    pub stale: bool,
    pub deltas: Vec<AnchorDelta>,
}

/// Advance one render tick. `None` until a value is known.
///
/// The very first frame shows the previous sample as-is; after that the
/// value follows the animation window.
pub fn render_tick(state: &mut AppState, now_server: f64, stale_multiplier: f64) -> Option<Frame> {
    state.target_value?;
    let last = state.last_value?;

    if !state.has_rendered_once {
        state.has_rendered_once = true;
        return Some(Frame {
            value: last,
            trend: state.trend,
            stale: false,
            deltas: Vec::new(),
        });
    }

    let anim = state.anim?;
    let value = anim.value_at(now_server);

    let stale = match (state.updated_at_server, state.interval_secs) {
        (Some(updated), Some(interval)) => is_stale(now_server, updated, interval, stale_multiplier),
        _ => false,
    };

    let deltas = state
        .anchors
        .iter()
        .map(|a| AnchorDelta::between(value, a.value))
        .collect();

    Some(Frame {
        value,
        trend: state.trend,
        stale,
        deltas,
    })
}

// =============================================================================
// Sparkline
// =============================================================================

pub const SPARK_LEVELS: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Sparkline {
    /// Heights in 0..=1 after padding the range by 5%.
    pub heights: Vec<f64>,
    /// First vs last point of the window.
    pub trend: Trend,
    pub label: String,
}

pub fn sparkline(samples: &[Sample], interval_secs: f64, window_secs: f64) -> Option<Sparkline> {
    if interval_secs <= 0.0 {
        return None;
    }
    let pts = (window_secs / interval_secs).floor() as usize;
    let data = &samples[samples.len().saturating_sub(pts)..];
    if data.len() < 2 {
        return None;
    }

    let vals: Vec<f64> = data.iter().map(|s| s.value).collect();
    let mut min = vals.iter().cloned().fold(f64::INFINITY, f64::min);
    let mut max = vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let pad = match (max - min) * 0.05 {
        p if p == 0.0 => 1.0,
        p => p,
    };
    min -= pad;
    max += pad;

    let heights = vals.iter().map(|v| (v - min) / (max - min)).collect();
    let hours = ((data.len() as f64 * interval_secs) / 3600.0).round() as i64;

    Some(Sparkline {
        heights,
        trend: Trend::between(vals[0], vals[vals.len() - 1]),
        label: format!("last {}h", hours),
    })
}

impl Sparkline {
    /// Bar heights in `0..=SPARK_LEVELS`, down-sampled to at most `width`
    /// columns so the whole window fits the terminal.
    pub fn columns(&self, width: usize) -> Vec<u64> {
        let n = self.heights.len();
        if n == 0 || width == 0 {
            return Vec::new();
        }
        let cols = width.min(n);
        (0..cols)
            .map(|c| {
                let idx = if cols == 1 {
                    n - 1
                } else {
                    (c as f64 * (n - 1) as f64 / (cols - 1) as f64).round() as usize
                };
                (self.heights[idx].clamp(0.0, 1.0) * SPARK_LEVELS as f64).round() as u64
            })
            .collect()
    }
}

// =============================================================================
// Formatting
// =============================================================================

/// Dutch-style grouping: `12.345,67`.
pub fn fmt_number(v: f64) -> String {
    let raw = format!("{:.2}", v.abs());
    let (int, frac) = raw.split_once('.').unwrap_or((raw.as_str(), "00"));

    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if v < 0.0 && raw.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    format!("{}{},{}", sign, grouped, frac)
}

pub fn fmt_money(symbol: &str, v: f64) -> String {
    format!("{} {}", symbol, fmt_number(v))
}

pub fn trend_arrow(trend: Trend) -> &'static str {
    match trend {
        Trend::Up => "▲ ",
        Trend::Down => "▼ ",
        Trend::Neutral => "",
    }
}

pub fn price_text(symbol: &str, frame: &Frame) -> String {
    format!("{}{}", trend_arrow(frame.trend), fmt_money(symbol, frame.value))
}

/// ` ▲ +1,23% (€ +12,34)`
pub fn indicator_text(symbol: &str, delta: &AnchorDelta) -> String {
    let (arrow, sign) = if delta.is_up() { ('▲', '+') } else { ('▼', '-') };
    format!(
        " {} {}{}% ({} {}{})",
        arrow,
        sign,
        fmt_number(delta.pct.abs()),
        symbol,
        sign,
        fmt_number(delta.diff.abs())
    )
}
