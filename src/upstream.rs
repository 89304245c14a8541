//! Upstream price source for the feed updater.

use anyhow::{anyhow, bail, Context, Result};
use rand::Rng;
use serde_json::Value;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Clone, Debug)]
pub struct UpdaterConfig {
    pub upstream_url: String,
    pub feed_file: String,
    pub precision: u32,
    pub interval_secs: u64,
    pub max_entries: usize,
    pub coin_id: String,
    pub vs_currency: String,
}

impl UpdaterConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let coin_id = std::env::var("COIN_ID").unwrap_or(d.coin_id);
        let vs_currency = std::env::var("VS_CURRENCY").unwrap_or(d.vs_currency);
        let precision = std::env::var("PRECISION").ok().and_then(|v| v.parse().ok()).unwrap_or(d.precision);
        Self {
            upstream_url: std::env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| simple_price_url(&coin_id, &vs_currency, precision)),
            feed_file: std::env::var("FEED_FILE").unwrap_or(d.feed_file),
            precision,
            interval_secs: std::env::var("INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.interval_secs),
            max_entries: std::env::var("MAX_ENTRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(d.max_entries),
            coin_id,
            vs_currency,
        }
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            upstream_url: simple_price_url("bitcoin", "eur", 3),
            feed_file: "./bitcoin.json".to_string(),
            precision: 3,
            interval_secs: 60,
            max_entries: 60 * 24 * 7,
            coin_id: "bitcoin".to_string(),
            vs_currency: "eur".to_string(),
        }
    }
}

pub fn simple_price_url(coin: &str, vs: &str, precision: u32) -> String {
    format!(
        "https://api.coingecko.com/api/v3/simple/price?ids={}&vs_currencies={}&precision={}",
        coin, vs, precision
    )
}

/// Pull `body[coin][vs]` out of a simple-price response.
pub fn extract_price(body: &Value, coin: &str, vs: &str) -> Result<f64> {
    let price = body
        .get(coin)
        .and_then(|c| c.get(vs))
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("no {}/{} price in response", coin, vs))?;
    if !price.is_finite() || price <= 0.0 {
        bail!("implausible price {}", price);
    }
    Ok(price)
}

pub struct Upstream {
    client: reqwest::Client,
    url: String,
    coin: String,
    vs: String,
}

impl Upstream {
    pub fn new(cfg: &UpdaterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: cfg.upstream_url.clone(),
            coin: cfg.coin_id.clone(),
            vs: cfg.vs_currency.clone(),
        })
    }

    pub async fn fetch_price(&self) -> Result<f64> {
        let resp = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("upstream request")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("upstream status {}", status);
        }
        let body: Value = resp.json().await.context("upstream body")?;
        extract_price(&body, &self.coin, &self.vs)
    }
}

/// Exponential backoff with a symmetric jitter band.
#[derive(Clone, Debug)]
pub struct Backoff {
    pub attempts: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_ms: 500,
            cap_ms: 8000,
            jitter: 0.25,
        }
    }
}

impl Backoff {
    pub fn delay(&self, retry: u32) -> Duration {
        let raw = (self.base_ms as f64 * 2f64.powi(retry as i32)).min(self.cap_ms as f64);
        let band = raw * self.jitter;
        let spread = if band > 0.0 {
            rand::thread_rng().gen_range(-band..=band)
        } else {
            0.0
        };
        Duration::from_millis((raw + spread).max(0.0) as u64)
    }

    /// Run `op` until it succeeds or the attempts run out; returns the last error.
    pub async fn run<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut retry = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if retry + 1 >= attempts => return Err(e),
                Err(e) => {
                    let wait = self.delay(retry);
                    log(
                        Level::Warn,
                        Domain::Store,
                        "retry",
                        obj(&[
                            ("op", v_str(label)),
                            ("attempt", v_num((retry + 1) as f64)),
                            ("wait_ms", v_num(wait.as_millis() as f64)),
                            ("reason", v_str(&e.to_string())),
                        ]),
                    );
                    sleep(wait).await;
                    retry += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_url_matches_feed_precision() {
        let cfg = UpdaterConfig::default();
        assert!(cfg.upstream_url.ends_with("ids=bitcoin&vs_currencies=eur&precision=3"));
        assert_eq!(cfg.max_entries, 10_080);
    }

    #[test]
    fn extracts_nested_price() {
        let body = json!({"bitcoin": {"eur": 61234.5}});
        assert_eq!(extract_price(&body, "bitcoin", "eur").unwrap(), 61234.5);
        assert!(extract_price(&body, "bitcoin", "usd").is_err());
        assert!(extract_price(&json!({"bitcoin": {"eur": 0}}), "bitcoin", "eur").is_err());
        assert!(extract_price(&json!({"bitcoin": {"eur": "1"}}), "bitcoin", "eur").is_err());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let b = Backoff {
            attempts: 5,
            base_ms: 100,
            cap_ms: 500,
            jitter: 0.0,
        };
        assert_eq!(b.delay(0), Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(200));
        assert_eq!(b.delay(2), Duration::from_millis(400));
        assert_eq!(b.delay(3), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let got: Result<u32> = Backoff::default()
            .run("price", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("flaky"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(got.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let got: Result<u32> = Backoff::default()
            .run("price", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("down"))
                }
            })
            .await;
        assert_eq!(got.unwrap_err().to_string(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
