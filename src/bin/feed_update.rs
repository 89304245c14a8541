//! One cron tick: fetch the upstream price and append it to the feed file.

use anyhow::Result;
use std::path::Path;

use tickerfx::logging::{log, log_store_write, obj, v_num, v_str, Domain, Level};
use tickerfx::state::now_ts;
use tickerfx::store::{file_sha256, AppendOutcome, StoreFile};
use tickerfx::upstream::{Backoff, UpdaterConfig, Upstream};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cfg = UpdaterConfig::from_env();
    let path = Path::new(&cfg.feed_file);
    let mut store = StoreFile::load(path, &cfg.vs_currency);

    let upstream = Upstream::new(&cfg)?;
    let price = match Backoff::default().run("fetch_price", || upstream.fetch_price()).await {
        Ok(p) => p,
        Err(e) => {
            log(
                Level::Warn,
                Domain::Store,
                "fetch_failed",
                obj(&[("url", v_str(&cfg.upstream_url)), ("reason", v_str(&e.to_string()))]),
            );
            return Ok(());
        }
    };

    let now = now_ts() as i64;
    match store.record(now, price, cfg.precision, cfg.interval_secs, cfg.max_entries) {
        AppendOutcome::DuplicateTimestamp => {
            log(Level::Info, Domain::Store, "duplicate_ts", obj(&[("ts", v_num(now as f64))]));
            return Ok(());
        }
        AppendOutcome::Smoothed { replaced_with } => {
            log(Level::Debug, Domain::Store, "smoothed", obj(&[("previous", v_num(replaced_with))]));
        }
        AppendOutcome::Appended => {}
    }

    store.write_atomic(path)?;
    let hash = file_sha256(path)?;
    let value = store.prices.last().map(|s| s.value).unwrap_or(price);
    log_store_write(&cfg.feed_file, store.prices.len(), value, &hash);
    Ok(())
}
