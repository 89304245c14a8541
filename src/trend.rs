//! Trend scoring - volatility-normalized moves collapsed onto a -4..4 scale.
//!
//! A move only counts as "significant" relative to the series' own recent
//! noise, scaled by the square root of elapsed minutes.

use crate::anchors::Anchor;
use crate::feed::Sample;

pub const SCORE_MIN: i32 = -4;
pub const SCORE_MAX: i32 = 4;

/// Fallback volatility (% per minute) when the window is too quiet to measure.
pub const VOL_FALLBACK: f64 = 0.02;
pub const VOL_WINDOW_MIN: i64 = 120;

pub const MOMENTUM_WINDOW_MIN: i64 = 30;
pub const MOMENTUM_WEIGHT: f64 = 0.6;

// =============================================================================
// Statistics
// =============================================================================

/// Sample standard deviation (n-1); 0 below two values.
pub fn stddev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

pub fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut v = xs.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let m = v.len() / 2;
    if v.len() % 2 == 1 {
        v[m]
    } else {
        (v[m - 1] + v[m]) / 2.0
    }
}

pub fn pct_change(cur: f64, reference: f64) -> f64 {
    (cur - reference) / reference * 100.0
}

/// One-step % returns over the trailing `minutes` window; `None` below 3 points.
fn window_returns(samples: &[Sample], minutes: i64) -> Option<Vec<f64>> {
    let end = samples.last()?.ts;
    let start = end - minutes * 60;
    let window: Vec<&Sample> = samples.iter().filter(|s| s.ts >= start).collect();
    if window.len() < 3 {
        return None;
    }
    Some(
        window
            .windows(2)
            .filter(|pair| pair[0].value != 0.0 && pair[1].value != 0.0)
            .map(|pair| pct_change(pair[1].value, pair[0].value))
            .collect(),
    )
}

/// Stddev of one-step % returns over the trailing window.
pub fn minute_volatility(samples: &[Sample], minutes: i64) -> f64 {
    window_returns(samples, minutes).map(|r| stddev(&r)).unwrap_or(0.0)
}

/// Median one-step % return over the trailing window; robust slope.
pub fn median_minute_return(samples: &[Sample], minutes: i64) -> f64 {
    window_returns(samples, minutes).map(|r| median(&r)).unwrap_or(0.0)
}

// =============================================================================
// Scoring
// =============================================================================

/// "z-ish" score: expected move grows with vol * sqrt(time).
pub fn normalized_move(pct: f64, vol_per_min: f64, horizon_min: f64) -> f64 {
    let denom = (vol_per_min * horizon_min.max(1.0).sqrt()).max(0.0001);
    pct / denom
}

/// Squash onto the integer scale; gentle saturation at the ends.
pub fn quantize_score(z: f64) -> i32 {
    let squished = (z / 1.6).tanh() * 4.0;
    (squished.round() as i32).clamp(SCORE_MIN, SCORE_MAX)
}

fn volatility_or_fallback(samples: &[Sample]) -> f64 {
    let vol = minute_volatility(samples, VOL_WINDOW_MIN);
    if vol > 0.0 {
        vol
    } else {
        VOL_FALLBACK
    }
}

/// Composite score over every anchor, longer lookbacks weighted more.
///
/// Anchors without a usable value are skipped, not zero-filled. A small
/// momentum term keeps a slow steady creep from reading flat.
pub fn anchor_trend_score(cur: f64, anchors: &[Anchor], samples: &[Sample]) -> i32 {
    if !cur.is_finite() || cur == 0.0 || anchors.is_empty() || samples.is_empty() {
        return 0;
    }
    let vol = volatility_or_fallback(samples);

    let mut acc = 0.0;
    let mut wsum = 0.0;

    for a in anchors {
        if !a.value.is_finite() || a.value == 0.0 {
            continue;
        }
        let horizon_min = ((a.age_secs as f64 / 60.0).round()).max(1.0);
        let z = normalized_move(pct_change(cur, a.value), vol, horizon_min);
        let w = 1.0 + (horizon_min / 30.0).ln_1p();
        acc += z * w;
        wsum += w;
    }

    if wsum == 0.0 {
        return 0;
    }

    let creep = median_minute_return(samples, MOMENTUM_WINDOW_MIN) * MOMENTUM_WINDOW_MIN as f64;
    acc += normalized_move(creep, vol, MOMENTUM_WINDOW_MIN as f64) * MOMENTUM_WEIGHT;
    wsum += MOMENTUM_WEIGHT;

    quantize_score(acc / wsum)
}

/// Coarse direction over the whole retained history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongRun {
    Up,
    Down,
    Flat,
}

impl LongRun {
    pub fn as_str(&self) -> &'static str {
        match self {
            LongRun::Up => "up",
            LongRun::Down => "down",
            LongRun::Flat => "flat",
        }
    }
}

pub fn since_start_trend(cur: f64, samples: &[Sample]) -> LongRun {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return LongRun::Flat;
    };
    if first.value == 0.0 {
        return LongRun::Flat;
    }

    let p = pct_change(cur, first.value);
    let minutes = (((last.ts - first.ts) as f64) / 60.0).round().max(1.0);
    let noise = volatility_or_fallback(samples) * minutes.sqrt();

    if p.abs() < 0.25_f64.max(noise * 0.8) {
        LongRun::Flat
    } else if p > 0.0 {
        LongRun::Up
    } else {
        LongRun::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::build_anchors;

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample {
                ts: i as i64 * 60,
                value: *v,
            })
            .collect()
    }

    #[test]
    fn stddev_edge_cases() {
        assert_eq!(stddev(&[]), 0.0);
        assert_eq!(stddev(&[3.0]), 0.0);
        assert!((stddev(&[1.0, 2.0, 3.0, 4.0]) - 1.2909944487358056).abs() < 1e-12);
    }

    #[test]
    fn median_edge_cases() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn quantize_bounds_and_monotonic() {
        assert_eq!(quantize_score(0.0), 0);
        assert_eq!(quantize_score(1e9), 4);
        assert_eq!(quantize_score(-1e9), -4);
        assert_eq!(quantize_score(f64::INFINITY), 4);
        let mut prev = quantize_score(-20.0);
        let mut z = -20.0;
        while z <= 20.0 {
            let q = quantize_score(z);
            assert!(q >= prev, "not monotonic at {}", z);
            assert!((SCORE_MIN..=SCORE_MAX).contains(&q));
            prev = q;
            z += 0.01;
        }
    }

    #[test]
    fn normalized_move_floors_denominator() {
        assert!((normalized_move(1.0, 0.0, 60.0) - 10_000.0).abs() < 1e-6);
        assert!((normalized_move(1.0, 0.1, 100.0) - 1.0).abs() < 1e-12);
        // horizon below one minute counts as one
        assert_eq!(normalized_move(0.5, 0.5, 0.0), 1.0);
    }

    #[test]
    fn volatility_needs_three_points() {
        let s = series(&[100.0, 101.0]);
        assert_eq!(minute_volatility(&s, 60), 0.0);
        assert_eq!(median_minute_return(&s, 60), 0.0);
        let s = series(&[100.0, 101.0, 100.0]);
        assert!(minute_volatility(&s, 60) > 0.0);
    }

    #[test]
    fn volatility_uses_trailing_window_only() {
        let mut values = vec![100.0, 150.0, 80.0, 120.0];
        values.extend(std::iter::repeat(100.0).take(10));
        let s = series(&values);
        // last 5 minutes are flat
        assert_eq!(minute_volatility(&s, 5), 0.0);
        assert!(minute_volatility(&s, 60) > 1.0);
    }

    #[test]
    fn median_return_on_steady_creep() {
        let values: Vec<f64> = (0..40).map(|i| 100.0 * 1.001_f64.powi(i)).collect();
        let s = series(&values);
        assert!((median_minute_return(&s, 30) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn score_zero_without_anchors() {
        let s = series(&[100.0, 101.0, 102.0]);
        assert_eq!(anchor_trend_score(102.0, &[], &s), 0);
    }

    #[test]
    fn skips_unusable_anchors() {
        let s = series(&[100.0, 101.0, 102.0]);
        let bad = vec![Anchor {
            label: "x".into(),
            value: f64::NAN,
            age_secs: 60,
        }];
        assert_eq!(anchor_trend_score(102.0, &bad, &s), 0);
    }

    #[test]
    fn strong_rally_saturates_up() {
        let mut values: Vec<f64> = (0..120).map(|i| 100.0 + (i % 2) as f64 * 0.01).collect();
        values.extend((0..60).map(|i| 100.0 + i as f64 * 0.5));
        let s = series(&values);
        let cur = s.last().unwrap().value;
        let anchors = build_anchors(&s);
        assert_eq!(anchor_trend_score(cur, &anchors, &s), 4);
    }

    #[test]
    fn strong_selloff_saturates_down() {
        let values: Vec<f64> = (0..180).map(|i| 200.0 - i as f64 * 0.5).collect();
        let s = series(&values);
        let cur = s.last().unwrap().value;
        let anchors = build_anchors(&s);
        assert_eq!(anchor_trend_score(cur, &anchors, &s), -4);
    }

    #[test]
    fn flat_market_scores_zero() {
        let values: Vec<f64> = (0..180).map(|i| 100.0 + (i % 2) as f64 * 0.05).collect();
        let s = series(&values);
        let anchors = build_anchors(&s);
        assert_eq!(anchor_trend_score(100.0, &anchors, &s), 0);
    }

    #[test]
    fn long_run_threshold() {
        // tiny drift stays under the 0.25% floor
        let s = series(&[100.0, 100.05, 100.1]);
        assert_eq!(since_start_trend(100.1, &s), LongRun::Flat);

        let values: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let s = series(&values);
        assert_eq!(since_start_trend(159.0, &s), LongRun::Up);
        assert_eq!(since_start_trend(50.0, &s), LongRun::Down);
        assert_eq!(since_start_trend(1.0, &[]), LongRun::Flat);
    }
}
