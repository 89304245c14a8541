//! Feed envelope as published by the store writer, and its normalisation.
//!
//! The wire format is lenient: timestamps and values may arrive as numbers or
//! numeric strings, entries may be out of order, duplicated, or junk. The
//! consumer sorts, dedups, and drops whatever is not a usable sample.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

pub mod ingest;
pub mod source;

pub const DEFAULT_INTERVAL_SECS: f64 = 60.0;

/// One (timestamp, price) observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub ts: i64,
    pub value: f64,
}

/// Identity of the newest sample; an unchanged signature means the store has
/// not advanced since the last ingest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signature {
    pub ts: i64,
    pub value: f64,
}

impl From<&Sample> for Signature {
    fn from(s: &Sample) -> Self {
        Self {
            ts: s.ts,
            value: s.value,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedMeta {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub updated_at: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub interval: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub precision: Option<f64>,
}

/// Only `prices` matters for ingest; a wrongly typed `currency` or `meta` is
/// treated as absent rather than failing the whole read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedEnvelope {
    #[serde(default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient_meta")]
    pub meta: Option<FeedMeta>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub prices: Vec<Value>,
}

impl FeedEnvelope {
    pub fn parse(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    /// Build an envelope from plain pairs, mostly for tests and fixtures.
    pub fn from_pairs(updated_at: Option<i64>, interval: Option<u64>, prices: &[(i64, f64)]) -> Self {
        let prices = prices
            .iter()
            .map(|(ts, value)| json!({ "ts": ts, "value": value }))
            .collect();
        Self {
            currency: Some("eur".to_string()),
            meta: Some(FeedMeta {
                updated_at: updated_at.map(|v| v as f64),
                interval: interval.map(|v| v as f64),
                precision: Some(3.0),
            }),
            prices,
        }
    }

    /// Expected seconds between samples; missing, zero or junk falls back to 60.
    pub fn interval_secs(&self) -> f64 {
        self.meta
            .as_ref()
            .and_then(|m| m.interval)
            .filter(|v| *v > 0.0)
            .unwrap_or(DEFAULT_INTERVAL_SECS)
    }

    /// Server time of the newest sample; falls back to the given timestamp.
    pub fn updated_at_or(&self, latest_ts: i64) -> f64 {
        self.meta
            .as_ref()
            .and_then(|m| m.updated_at)
            .filter(|v| *v != 0.0)
            .unwrap_or(latest_ts as f64)
    }

    /// Valid samples, ascending by timestamp, one per timestamp (last wins).
    pub fn samples(&self) -> Vec<Sample> {
        normalize_samples(&self.prices)
    }
}

pub fn normalize_samples(raw: &[Value]) -> Vec<Sample> {
    let mut samples: Vec<Sample> = raw
        .iter()
        .filter_map(|entry| {
            let ts = entry.get("ts").and_then(number_of)?;
            let value = entry.get("value").and_then(number_of)?;
            // A zero or negative price would poison every percentage move.
            if value <= 0.0 {
                return None;
            }
            Some(Sample {
                ts: ts.round() as i64,
                value,
            })
        })
        .collect();

    samples.sort_by_key(|s| s.ts);

    let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
    for s in samples {
        match out.last_mut() {
            Some(last) if last.ts == s.ts => *last = s,
            _ => out.push(s),
        }
    }
    out
}

/// Finite number from a JSON number or numeric string.
pub fn number_of(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|x| x.is_finite())
}

fn lenient_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(number_of))
}

fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_meta<'de, D>(d: D) -> Result<Option<FeedMeta>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        Some(v @ Value::Object(_)) => serde_json::from_value(v).ok(),
        _ => None,
    })
}

fn lenient_list<'de, D>(d: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_strings_and_drops_junk() {
        let env = FeedEnvelope::parse(
            r#"{"currency":"eur","meta":{"updated_at":"1000","interval":60},
                "prices":[{"ts":1000,"value":"110.5"},{"ts":"940","value":100},
                          {"ts":970,"value":null},{"ts":980,"value":0},{"nope":1},5]}"#,
        )
        .unwrap();
        let samples = env.samples();
        assert_eq!(
            samples,
            vec![
                Sample { ts: 940, value: 100.0 },
                Sample { ts: 1000, value: 110.5 },
            ]
        );
        assert_eq!(env.updated_at_or(0), 1000.0);
    }

    #[test]
    fn duplicate_timestamps_keep_last_seen() {
        let env = FeedEnvelope::from_pairs(None, None, &[(60, 1.0), (0, 2.0), (60, 3.0)]);
        let samples = env.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1], Sample { ts: 60, value: 3.0 });
    }

    #[test]
    fn meta_defaults() {
        let env = FeedEnvelope::parse(r#"{"meta":{"interval":0},"prices":[]}"#).unwrap();
        assert_eq!(env.interval_secs(), DEFAULT_INTERVAL_SECS);
        assert_eq!(env.updated_at_or(1234), 1234.0);

        let env = FeedEnvelope::parse(r#"{"meta":null,"prices":[]}"#).unwrap();
        assert_eq!(env.interval_secs(), DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn odd_header_fields_do_not_sink_the_feed() {
        let env = FeedEnvelope::parse(
            r#"{"currency":978,"meta":[],"prices":[{"ts":0,"value":1},{"ts":60,"value":2}]}"#,
        )
        .unwrap();
        assert!(env.currency.is_none());
        assert!(env.meta.is_none());
        assert_eq!(env.samples().len(), 2);
        assert_eq!(env.interval_secs(), DEFAULT_INTERVAL_SECS);
        assert_eq!(env.updated_at_or(60), 60.0);

        let env = FeedEnvelope::parse(r#"{"meta":"soon","prices":{"ts":0}}"#).unwrap();
        assert!(env.meta.is_none());
        assert!(env.prices.is_empty());
    }
}
