//! Historical reference points the live price is compared against.

use crate::feed::Sample;

/// Lookback horizons in hours; history start is always appended last.
pub const ANCHOR_HOURS: [i64; 4] = [1, 24, 48, 72];

#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub label: String,
    pub value: f64,
    /// Seconds between the anchor sample and the newest sample.
    pub age_secs: i64,
}

/// Live comparison against one anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorDelta {
    pub diff: f64,
    pub pct: f64,
}

impl AnchorDelta {
    pub fn between(current: f64, reference: f64) -> Self {
        let diff = current - reference;
        Self {
            diff,
            pct: diff / reference * 100.0,
        }
    }

    pub fn is_up(&self) -> bool {
        self.diff >= 0.0
    }
}

/// Most recent sample at or before `ts`.
pub fn find_before(samples: &[Sample], ts: i64) -> Option<&Sample> {
    samples.iter().rev().find(|s| s.ts <= ts)
}

pub fn build_anchors(samples: &[Sample]) -> Vec<Anchor> {
    let (Some(first), Some(latest)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };

    let mut rows: Vec<Anchor> = ANCHOR_HOURS
        .iter()
        .filter_map(|h| {
            let horizon = h * 3600;
            find_before(samples, latest.ts - horizon).map(|p| Anchor {
                label: format!("{} ago", fmt_ago(horizon)),
                value: p.value,
                age_secs: latest.ts - p.ts,
            })
        })
        .collect();

    let age = latest.ts - first.ts;
    rows.push(Anchor {
        label: format!("{} ago", fmt_ago(age)),
        value: first.value,
        age_secs: age,
    });
    rows
}

/// Compact age: `2w 1d 3h`, `1d 5h`, `6h`, `42 min`.
pub fn fmt_ago(secs: i64) -> String {
    let h = secs / 3600;
    const WEEK_H: i64 = 24 * 7;

    if h >= WEEK_H {
        let w = h / WEEK_H;
        let rem = h % WEEK_H;
        let d = rem / 24;
        let rh = rem % 24;
        return match (d, rh) {
            (0, 0) => format!("{}w", w),
            (_, 0) => format!("{}w {}d", w, d),
            _ => format!("{}w {}d {}h", w, d, rh),
        };
    }

    if h >= 24 {
        let d = h / 24;
        let rh = h % 24;
        return if rh == 0 {
            format!("{}d", d)
        } else {
            format!("{}d {}h", d, rh)
        };
    }

    if h >= 1 {
        return format!("{}h", h);
    }
    format!("{} min", secs / 60)
}
