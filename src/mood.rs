//! Tone selection and the one-line mood conclusion.
//!
//! The phrase lexicon is external; this module only picks from it. Every
//! lookup degrades: tone bucket, then the degen bucket, then a stock phrase.

use anyhow::Result;
use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::anchors::Anchor;
use crate::feed::Sample;
use crate::logging::{log, log_score, obj, v_str, Domain, Level};
use crate::trend::{anchor_trend_score, since_start_trend, LongRun, SCORE_MAX, SCORE_MIN};

pub const DEFAULT_PHRASE: &str = "doing something";

// =============================================================================
// Tone
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Pro,
    Degen,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Pro => "pro",
            Tone::Degen => "degen",
        }
    }
}

/// User preference: follow office hours, or pin a tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneSetting {
    #[default]
    Auto,
    Pro,
    Degen,
}

impl ToneSetting {
    pub fn from_override(tone: Option<Tone>) -> Self {
        match tone {
            None => ToneSetting::Auto,
            Some(Tone::Pro) => ToneSetting::Pro,
            Some(Tone::Degen) => ToneSetting::Degen,
        }
    }

    pub fn as_override(&self) -> Option<Tone> {
        match self {
            ToneSetting::Auto => None,
            ToneSetting::Pro => Some(Tone::Pro),
            ToneSetting::Degen => Some(Tone::Degen),
        }
    }

    pub fn letter(&self) -> char {
        match self {
            ToneSetting::Auto => 'A',
            ToneSetting::Pro => 'P',
            ToneSetting::Degen => 'D',
        }
    }
}

/// Pro on weekdays from 08:00 through 17:30:00 local time, degen otherwise.
pub fn auto_tone(now: &NaiveDateTime) -> Tone {
    let weekday = !matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
    let (h, m, s) = (now.hour(), now.minute(), now.second());
    let office = (8..17).contains(&h) || (h == 17 && (m < 30 || (m == 30 && s == 0)));
    if weekday && office {
        Tone::Pro
    } else {
        Tone::Degen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneState {
    pub setting: ToneSetting,
    pub effective: Tone,
}

impl Default for ToneState {
    fn default() -> Self {
        Self {
            setting: ToneSetting::Auto,
            effective: Tone::Degen,
        }
    }
}

impl ToneState {
    pub fn resolve(setting: ToneSetting, now: &NaiveDateTime) -> Self {
        Self {
            setting,
            effective: setting.as_override().unwrap_or_else(|| auto_tone(now)),
        }
    }

    pub fn describe(&self) -> String {
        match self.setting {
            ToneSetting::Auto => format!("Auto tone ({} right now)", self.effective.as_str()),
            ToneSetting::Pro => "Professional tone (manual override)".to_string(),
            ToneSetting::Degen => "Playful tone (manual override)".to_string(),
        }
    }
}

/// Manual tone override persisted between sessions.
pub struct ToneStore {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct SavedTone {
    mood_override: Tone,
}

impl ToneStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Unreadable or unknown contents count as no override.
    pub fn load(&self) -> Option<Tone> {
        let body = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str::<SavedTone>(&body)
            .ok()
            .map(|s| s.mood_override)
    }

    pub fn save(&self, tone: Option<Tone>) -> Result<()> {
        match tone {
            Some(t) => {
                let body = serde_json::to_string(&SavedTone { mood_override: t })?;
                std::fs::write(&self.path, body)?;
            }
            None => {
                if self.path.exists() {
                    std::fs::remove_file(&self.path)?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Lexicon
// =============================================================================

type Buckets = HashMap<i32, Vec<String>>;

/// Phrases keyed by score, optionally partitioned by tone.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    pro: Option<Buckets>,
    degen: Option<Buckets>,
}

impl Lexicon {
    /// Accepts `{"-4":[..],..}` (used for both tones) or `{"pro":{..},"degen":{..}}`.
    pub fn from_value(raw: &Value) -> Self {
        let Some(map) = raw.as_object() else {
            return Self::default();
        };
        if map.contains_key("pro") || map.contains_key("degen") {
            Self {
                pro: map.get("pro").and_then(buckets_from),
                degen: map.get("degen").and_then(buckets_from),
            }
        } else {
            let flat = buckets_from(raw);
            Self {
                pro: flat.clone(),
                degen: flat,
            }
        }
    }

    pub fn parse(body: &str) -> serde_json::Result<Self> {
        Ok(Self::from_value(&serde_json::from_str(body)?))
    }

    fn set(&self, tone: Tone) -> Option<&Buckets> {
        match tone {
            Tone::Pro => self.pro.as_ref(),
            Tone::Degen => self.degen.as_ref(),
        }
    }

    /// Candidate phrases for a score, falling back to the degen set.
    pub fn phrases(&self, tone: Tone, score: i32) -> Option<&[String]> {
        let bucket = score.clamp(SCORE_MIN, SCORE_MAX);
        let lookup = move |t: Tone| {
            self.set(t)
                .and_then(|b| b.get(&bucket))
                .filter(|list| !list.is_empty())
                .map(|list| list.as_slice())
        };
        lookup(tone).or_else(|| lookup(Tone::Degen))
    }
}

fn buckets_from(v: &Value) -> Option<Buckets> {
    let map = v.as_object()?;
    let buckets: Buckets = map
        .iter()
        .filter_map(|(k, list)| {
            let key = k.trim().parse::<i32>().ok()?;
            let phrases = list
                .as_array()?
                .iter()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect();
            Some((key, phrases))
        })
        .collect();
    Some(buckets)
}

pub fn pick_phrase<R: Rng>(lexicon: Option<&Lexicon>, tone: Tone, score: i32, rng: &mut R) -> String {
    match lexicon.and_then(|l| l.phrases(tone, score)) {
        Some(list) => list[rng.gen_range(0..list.len())].clone(),
        None => DEFAULT_PHRASE.to_string(),
    }
}

// =============================================================================
// Conclusion
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Conclusion {
    pub score: i32,
    pub long_run: LongRun,
    pub sentence: String,
}

/// Joins the short-horizon phrase with the long-run direction when they disagree.
pub fn sentence(phrase: &str, score: i32, long_run: LongRun) -> String {
    match long_run {
        LongRun::Down if score > 0 => format!("Bitcoin is {}, but still down on the longer run", phrase),
        LongRun::Up if score < 0 => format!("Bitcoin is {}, but still up on the longer run", phrase),
        _ => format!("Bitcoin is {}", phrase),
    }
}

pub fn conclude<R: Rng>(
    cur: Option<f64>,
    anchors: &[Anchor],
    samples: &[Sample],
    tone: Tone,
    lexicon: Option<&Lexicon>,
    rng: &mut R,
) -> Option<Conclusion> {
    let cur = cur.filter(|c| *c != 0.0)?;
    if samples.is_empty() {
        return None;
    }

    let score = anchor_trend_score(cur, anchors, samples);
    let long_run = since_start_trend(cur, samples);
    let phrase = pick_phrase(lexicon, tone, score, rng);
    log_score(score, long_run.as_str(), tone.as_str());

    Some(Conclusion {
        score,
        long_run,
        sentence: sentence(&phrase, score, long_run),
    })
}

pub fn log_tone(state: &ToneState) {
    log(
        Level::Info,
        Domain::Mood,
        "tone",
        obj(&[
            ("setting", v_str(&state.setting.letter().to_string())),
            ("effective", v_str(state.effective.as_str())),
        ]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn office_hours() {
        // 2024-01-08 is a Monday
        assert_eq!(auto_tone(&at(2024, 1, 8, 7, 59, 59)), Tone::Degen);
        assert_eq!(auto_tone(&at(2024, 1, 8, 8, 0, 0)), Tone::Pro);
        assert_eq!(auto_tone(&at(2024, 1, 8, 12, 0, 0)), Tone::Pro);
        assert_eq!(auto_tone(&at(2024, 1, 8, 17, 29, 59)), Tone::Pro);
        assert_eq!(auto_tone(&at(2024, 1, 8, 17, 30, 0)), Tone::Pro);
        assert_eq!(auto_tone(&at(2024, 1, 8, 17, 30, 1)), Tone::Degen);
        assert_eq!(auto_tone(&at(2024, 1, 12, 9, 0, 0)), Tone::Pro);
        // weekend
        assert_eq!(auto_tone(&at(2024, 1, 13, 12, 0, 0)), Tone::Degen);
        assert_eq!(auto_tone(&at(2024, 1, 14, 12, 0, 0)), Tone::Degen);
    }

    #[test]
    fn override_beats_clock() {
        let saturday = at(2024, 1, 13, 12, 0, 0);
        let st = ToneState::resolve(ToneSetting::Pro, &saturday);
        assert_eq!(st.effective, Tone::Pro);
        assert_eq!(st.describe(), "Professional tone (manual override)");

        let st = ToneState::resolve(ToneSetting::Auto, &saturday);
        assert_eq!(st.effective, Tone::Degen);
        assert_eq!(st.describe(), "Auto tone (degen right now)");
        assert_eq!(st.setting.letter(), 'A');
    }

    #[test]
    fn tone_store_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ToneStore::new(dir.path().join("tone.json"));
        assert_eq!(store.load(), None);
        store.save(Some(Tone::Pro)).unwrap();
        assert_eq!(store.load(), Some(Tone::Pro));
        store.save(None).unwrap();
        assert_eq!(store.load(), None);
        // clearing twice is fine
        store.save(None).unwrap();
    }

    #[test]
    fn tone_store_ignores_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tone.json");
        std::fs::write(&path, r#"{"mood_override":"zen"}"#).unwrap();
        assert_eq!(ToneStore::new(&path).load(), None);
    }

    #[test]
    fn flat_lexicon_serves_both_tones() {
        let lex = Lexicon::from_value(&json!({ "2": ["climbing"], "-1": ["slipping"] }));
        assert_eq!(lex.phrases(Tone::Pro, 2).unwrap(), ["climbing".to_string()]);
        assert_eq!(lex.phrases(Tone::Degen, -1).unwrap(), ["slipping".to_string()]);
        // clamped into range
        assert_eq!(lex.phrases(Tone::Pro, 9), None);
    }

    #[test]
    fn partitioned_lexicon_falls_back_to_degen() {
        let lex = Lexicon::from_value(&json!({
            "pro": { "1": ["firming"], "0": [] },
            "degen": { "0": ["vibing"], "4": ["mooning"], "1": ["pumping"] }
        }));
        assert_eq!(lex.phrases(Tone::Pro, 1).unwrap(), ["firming".to_string()]);
        assert_eq!(lex.phrases(Tone::Pro, 0).unwrap(), ["vibing".to_string()]);
        assert_eq!(lex.phrases(Tone::Pro, 7).unwrap(), ["mooning".to_string()]);
        assert_eq!(lex.phrases(Tone::Degen, -3), None);
    }

    #[test]
    fn pick_defaults_when_missing() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pick_phrase(None, Tone::Pro, 0, &mut rng), DEFAULT_PHRASE);
        let lex = Lexicon::from_value(&json!({ "pro": {} }));
        assert_eq!(pick_phrase(Some(&lex), Tone::Pro, 0, &mut rng), DEFAULT_PHRASE);
        let lex = Lexicon::from_value(&json!(["not", "an", "object"]));
        assert_eq!(pick_phrase(Some(&lex), Tone::Degen, 0, &mut rng), DEFAULT_PHRASE);
    }

    #[test]
    fn pick_stays_in_bucket() {
        let lex = Lexicon::from_value(&json!({ "0": ["a", "b", "c"] }));
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let p = pick_phrase(Some(&lex), Tone::Degen, 0, &mut rng);
            assert!(["a", "b", "c"].contains(&p.as_str()));
        }
    }

    #[test]
    fn contrastive_sentences() {
        assert_eq!(
            sentence("pumping", 2, LongRun::Down),
            "Bitcoin is pumping, but still down on the longer run"
        );
        assert_eq!(
            sentence("dipping", -1, LongRun::Up),
            "Bitcoin is dipping, but still up on the longer run"
        );
        assert_eq!(sentence("pumping", 2, LongRun::Up), "Bitcoin is pumping");
        assert_eq!(sentence("meh", 0, LongRun::Down), "Bitcoin is meh");
    }

    #[test]
    fn conclude_requires_value_and_samples() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(conclude(None, &[], &[], Tone::Pro, None, &mut rng).is_none());
        assert!(conclude(Some(1.0), &[], &[], Tone::Pro, None, &mut rng).is_none());
        let samples = vec![Sample { ts: 0, value: 1.0 }, Sample { ts: 60, value: 1.0 }];
        let c = conclude(Some(1.0), &[], &samples, Tone::Pro, None, &mut rng).unwrap();
        assert_eq!(c.score, 0);
        assert_eq!(c.sentence, "Bitcoin is doing something");
    }
}
