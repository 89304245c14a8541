//! The bounded price log the updater appends to and the client polls.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::feed::{normalize_samples, Sample};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreFile {
    pub currency: String,
    pub meta: StoreMeta,
    pub prices: Vec<Sample>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppendOutcome {
    Appended,
    /// Same price as last time: the previous point was moved to the midpoint
    /// of its predecessor and the new value before appending.
    Smoothed { replaced_with: f64 },
    /// A sample for this second already exists; nothing written.
    DuplicateTimestamp,
}

pub fn round_to(v: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (v * scale).round() / scale
}

impl StoreFile {
    pub fn empty(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
            meta: StoreMeta::default(),
            prices: Vec::new(),
        }
    }

    /// Missing or unreadable files start a fresh log.
    pub fn load(path: &Path, currency: &str) -> Self {
        let Ok(body) = std::fs::read_to_string(path) else {
            return Self::empty(currency);
        };
        let Ok(raw) = serde_json::from_str::<Value>(&body) else {
            return Self::empty(currency);
        };
        let Some(prices) = raw.get("prices").and_then(Value::as_array) else {
            return Self::empty(currency);
        };
        Self {
            currency: raw
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or(currency)
                .to_string(),
            meta: raw
                .get("meta")
                .and_then(|m| serde_json::from_value(m.clone()).ok())
                .unwrap_or_default(),
            prices: normalize_samples(prices),
        }
    }

    /// Append one fetched price, smoothing flat repeats.
    pub fn append(&mut self, now: i64, price: f64, precision: u32) -> AppendOutcome {
        let value = round_to(price, precision);

        if self.prices.last().map(|s| s.ts) == Some(now) {
            return AppendOutcome::DuplicateTimestamp;
        }

        let n = self.prices.len();
        let mut outcome = AppendOutcome::Appended;
        if n >= 2 && round_to(self.prices[n - 1].value, precision) == value {
            let interp = round_to((self.prices[n - 2].value + value) / 2.0, precision);
            self.prices[n - 1].value = interp;
            outcome = AppendOutcome::Smoothed { replaced_with: interp };
        }

        self.prices.push(Sample { ts: now, value });
        outcome
    }

    pub fn trim(&mut self, max_entries: usize) {
        if self.prices.len() > max_entries {
            let excess = self.prices.len() - max_entries;
            self.prices.drain(..excess);
        }
    }

    pub fn stamp(&mut self, now: i64, interval: u64, precision: u32) {
        self.meta = StoreMeta {
            updated_at: Some(now),
            interval: Some(interval),
            precision: Some(precision),
        };
    }

    /// Full update for one cron tick. Trim and meta are skipped on a duplicate
    /// timestamp, in which case the file should not be rewritten.
    pub fn record(&mut self, now: i64, price: f64, precision: u32, interval: u64, max_entries: usize) -> AppendOutcome {
        let outcome = self.append(now, price, precision);
        if outcome != AppendOutcome::DuplicateTimestamp {
            self.trim(max_entries);
            self.stamp(now, interval, precision);
        }
        outcome
    }

    /// Pretty JSON via a sibling temp file and rename, so readers never see a
    /// half-written log.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        let tmp = tmp_path(path);
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "feed.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_to(61234.56789, 3), 61234.568);
        assert_eq!(round_to(1.5, 0), 2.0);
    }

    #[test]
    fn plain_append() {
        let mut s = StoreFile::empty("eur");
        assert_eq!(s.append(60, 100.0004, 3), AppendOutcome::Appended);
        assert_eq!(s.append(120, 101.0, 3), AppendOutcome::Appended);
        assert_eq!(s.prices, vec![Sample { ts: 60, value: 100.0 }, Sample { ts: 120, value: 101.0 }]);
    }

    #[test]
    fn repeat_value_smooths_previous_point() {
        let mut s = StoreFile::empty("eur");
        s.append(0, 100.0, 3);
        s.append(60, 110.0, 3);
        let out = s.append(120, 110.0, 3);
        assert_eq!(out, AppendOutcome::Smoothed { replaced_with: 105.0 });
        assert_eq!(
            s.prices,
            vec![
                Sample { ts: 0, value: 100.0 },
                Sample { ts: 60, value: 105.0 },
                Sample { ts: 120, value: 110.0 },
            ]
        );
    }

    #[test]
    fn repeat_with_single_point_just_appends() {
        let mut s = StoreFile::empty("eur");
        s.append(0, 100.0, 3);
        assert_eq!(s.append(60, 100.0, 3), AppendOutcome::Appended);
        assert_eq!(s.prices.len(), 2);
    }

    #[test]
    fn duplicate_timestamp_rejected() {
        let mut s = StoreFile::empty("eur");
        s.record(60, 100.0, 3, 60, 10);
        let before = s.clone();
        assert_eq!(s.record(60, 200.0, 3, 60, 10), AppendOutcome::DuplicateTimestamp);
        assert_eq!(s, before);
    }

    #[test]
    fn trims_oldest_and_stamps_meta() {
        let mut s = StoreFile::empty("eur");
        for i in 0..5 {
            s.record(i * 60, 100.0 + i as f64, 3, 60, 3);
        }
        assert_eq!(s.prices.len(), 3);
        assert_eq!(s.prices[0].ts, 120);
        assert_eq!(s.meta.updated_at, Some(240));
        assert_eq!(s.meta.interval, Some(60));
        assert_eq!(s.meta.precision, Some(3));
    }

    #[test]
    fn tmp_file_is_a_sibling() {
        assert_eq!(tmp_path(Path::new("/srv/bitcoin.json")), PathBuf::from("/srv/bitcoin.json.tmp"));
    }
}
