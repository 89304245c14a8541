use crate::anchors::Anchor;
use crate::feed::{Sample, Signature};
use crate::mood::ToneState;
use crate::render::AnimationWindow;

#[derive(Clone, Debug)]
pub struct Config {
    pub feed_url: String,
    pub lexicon_url: String,
    pub tone_file: String,
    pub render_interval_ms: u64,
    pub stale_multiplier: f64,
    pub spark_window_secs: u64,
    pub spark_width: usize,
    pub jitter_min_secs: f64,
    pub jitter_max_secs: f64,
    pub fetch_safety_secs: f64,
    pub min_delay_ms: u64,
    /// Re-arm a poll after a failed or unchanged fetch instead of holding the
    /// last good state. Off unless `RECOVERY_POLL` is set truthy.
    pub recovery_poll: bool,
    /// Fixed server epoch for skew; otherwise taken from the first response.
    pub server_now: Option<f64>,
    pub currency_symbol: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            feed_url: std::env::var("FEED_URL").unwrap_or_else(|_| "./bitcoin.json".to_string()),
            lexicon_url: std::env::var("LEXICON_URL").unwrap_or_else(|_| "./moods.json".to_string()),
            tone_file: std::env::var("TONE_FILE").unwrap_or_else(|_| "./.tickerfx-tone.json".to_string()),
            render_interval_ms: std::env::var("RENDER_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            stale_multiplier: std::env::var("STALE_MULTIPLIER").ok().and_then(|v| v.parse().ok()).unwrap_or(2.0),
            spark_window_secs: std::env::var("SPARK_WINDOW_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(24 * 3600),
            spark_width: std::env::var("SPARK_WIDTH").ok().and_then(|v| v.parse().ok()).unwrap_or(48),
            jitter_min_secs: std::env::var("JITTER_MIN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(1.0),
            jitter_max_secs: std::env::var("JITTER_MAX_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(2.0),
            fetch_safety_secs: std::env::var("FETCH_SAFETY_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(2.0),
            min_delay_ms: std::env::var("MIN_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(500),
            recovery_poll: std::env::var("RECOVERY_POLL").map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")).unwrap_or(false),
            server_now: std::env::var("SERVER_NOW").ok().and_then(|v| v.parse().ok()),
            currency_symbol: std::env::var("CURRENCY").unwrap_or_else(|_| "€".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "./bitcoin.json".to_string(),
            lexicon_url: "./moods.json".to_string(),
            tone_file: "./.tickerfx-tone.json".to_string(),
            render_interval_ms: 10,
            stale_multiplier: 2.0,
            spark_window_secs: 24 * 3600,
            spark_width: 48,
            jitter_min_secs: 1.0,
            jitter_max_secs: 2.0,
            fetch_safety_secs: 2.0,
            min_delay_ms: 500,
            recovery_poll: false,
            server_now: None,
            currency_symbol: "€".to_string(),
        }
    }
}

/// Client wall clock in epoch seconds, millisecond resolution.
pub fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

/// Direction of the last step between the two newest samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trend {
    Up,
    Down,
    #[default]
    Neutral,
}

impl Trend {
    pub fn between(prev: f64, curr: f64) -> Self {
        if curr > prev {
            Trend::Up
        } else if curr < prev {
            Trend::Down
        } else {
            Trend::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Neutral => "neutral",
        }
    }
}

/// Everything the poller, the render tick and the trend engine share.
///
/// Owned by the runner; each activity borrows it between awaits, so a tick
/// never observes a half-applied ingest.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub samples: Vec<Sample>,
    pub anchors: Vec<Anchor>,

    pub interval_secs: Option<f64>,
    pub updated_at_server: Option<f64>,

    pub last_value: Option<f64>,
    pub target_value: Option<f64>,

    pub anim: Option<AnimationWindow>,
    pub trend: Trend,

    pub signature: Option<Signature>,
    pub has_rendered_once: bool,

    pub tone: ToneState,
    pub score: i32,
    pub conclusion: Option<String>,
}

impl AppState {
    pub fn new(tone: ToneState) -> Self {
        Self {
            tone,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_is_strict() {
        assert_eq!(Trend::between(100.0, 110.0), Trend::Up);
        assert_eq!(Trend::between(110.0, 100.0), Trend::Down);
        assert_eq!(Trend::between(100.0, 100.0), Trend::Neutral);
    }

    #[test]
    fn default_config_matches_feed_cadence() {
        let cfg = Config::default();
        assert_eq!(cfg.render_interval_ms, 10);
        assert_eq!(cfg.min_delay_ms, 500);
        assert!(cfg.jitter_min_secs < cfg.jitter_max_secs);
        assert!(!cfg.recovery_poll);
    }
}
