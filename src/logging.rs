//! Structured logging for the ticker client and the feed updater.
//!
//! One JSON object per line, filtered by `LOG_LEVEL` and `LOG_DOMAINS`, kept
//! under `$LOG_DIR/<run_id>/` and echoed to stderr (stdout is the display).

use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Levels and domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

const LEVELS: [Level; 6] = [
    Level::Trace,
    Level::Debug,
    Level::Info,
    Level::Warn,
    Level::Error,
    Level::Fatal,
];

impl Level {
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        LEVELS.into_iter().find(|l| l.as_str() == name)
    }

    /// `LOG_LEVEL`, defaulting to info.
    pub fn threshold() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or(Level::Info)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

/// Which part of the ticker a record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Clock,
    Feed,
    Schedule,
    Anim,
    Trend,
    Mood,
    Store,
    System,
    Profile,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Clock => "clock",
            Domain::Feed => "feed",
            Domain::Schedule => "schedule",
            Domain::Anim => "anim",
            Domain::Trend => "trend",
            Domain::Mood => "mood",
            Domain::Store => "store",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    /// `LOG_DOMAINS` is a comma list; unset or `all` lets everything through.
    pub fn listed_in(&self, filter: Option<&str>) -> bool {
        match filter.map(str::trim) {
            None | Some("all") | Some("") => true,
            Some(list) => list.split(',').any(|d| d.trim() == self.as_str()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.listed_in(std::env::var("LOG_DOMAINS").ok().as_deref())
    }
}

// =============================================================================
// Sinks
// =============================================================================

type Sink = Option<Mutex<BufWriter<File>>>;

static SEQ: AtomicU64 = AtomicU64::new(0);
static ECHO: AtomicBool = AtomicBool::new(true);
static SINKS: OnceLock<LogSinks> = OnceLock::new();

struct LogSinks {
    run_id: String,
    events: Sink,
    trace: Sink,
}

impl LogSinks {
    fn open() -> Self {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("{}-{}", ts_epoch_ms(), process::id()));
        let dir = PathBuf::from(std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string())).join(&run_id);
        if let Err(err) = create_dir_all(&dir) {
            eprintln!("[log] cannot create {}: {}", dir.display(), err);
        }

        let manifest = json!({
            "run_id": &run_id,
            "started": ts_now(),
            "pid": process::id(),
            "bin": std::env::args().next().unwrap_or_default(),
            "version": env!("CARGO_PKG_VERSION"),
        });
        let _ = std::fs::write(dir.join("manifest.json"), manifest.to_string());

        Self {
            events: sink_at(dir.join("events.jsonl")),
            trace: sink_at(dir.join("trace.jsonl")),
            run_id,
        }
    }

    fn write(&self, level: Level, line: &str) {
        let sink = if level <= Level::Debug { &self.trace } else { &self.events };
        if let Some(Ok(mut w)) = sink.as_ref().map(|m| m.lock()) {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

fn sink_at(path: PathBuf) -> Sink {
    File::create(&path)
        .map(|f| Mutex::new(BufWriter::new(f)))
        .map_err(|err| eprintln!("[log] cannot open {}: {}", path.display(), err))
        .ok()
}

/// Stop (or resume) mirroring records to stderr; files are unaffected.
/// Off while the terminal UI owns the screen.
pub fn set_echo(on: bool) {
    ECHO.store(on, Ordering::Relaxed);
}

fn next_seq() -> u64 {
    SEQ.fetch_add(1, Ordering::SeqCst)
}

// =============================================================================
// Core
// =============================================================================

/// RFC3339 UTC with milliseconds.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Local wall-clock `HH:MM:SS` for an epoch in seconds.
pub fn fmt_clock(epoch_secs: f64) -> String {
    let ms = (epoch_secs * 1000.0).round() as i64;
    match Local.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%H:%M:%S").to_string(),
        None => format!("{:.3}", epoch_secs),
    }
}

pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::threshold() || !domain.is_enabled() {
        return;
    }
    let sinks = SINKS.get_or_init(LogSinks::open);
    let line = record(&sinks.run_id, next_seq(), level, domain, event, fields).to_string();
    sinks.write(level, &line);
    if ECHO.load(Ordering::Relaxed) {
        eprintln!("{}", line);
    }
}

fn record(run_id: &str, seq: u64, level: Level, domain: Domain, event: &str, data: Map<String, Value>) -> Value {
    json!({
        "ts": ts_now(),
        "run_id": run_id,
        "seq": seq,
        "lvl": level.as_str().to_uppercase(),
        "component": domain.as_str(),
        "event": event,
        "data": data,
    })
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_skew(server_epoch: f64, client_epoch: f64, skew: f64) {
    log(
        Level::Info,
        Domain::Clock,
        "skew",
        obj(&[
            ("server", v_str(&fmt_clock(server_epoch))),
            ("client", v_str(&fmt_clock(client_epoch))),
            ("skew_secs", v_num(skew)),
        ]),
    );
}

pub fn log_schedule(delay_secs: f64, earliest_server: f64, fire_at_server: f64) {
    log(
        Level::Info,
        Domain::Schedule,
        "armed",
        obj(&[
            ("delay_secs", v_num(delay_secs)),
            ("earliest_allowed", v_str(&fmt_clock(earliest_server))),
            ("scheduled_at", v_str(&fmt_clock(fire_at_server))),
            ("frame", v_str("server")),
        ]),
    );
}

pub fn log_sample(updated_at: f64, next_expected: f64, samples: usize) {
    log(
        Level::Info,
        Domain::Feed,
        "new_sample",
        obj(&[
            ("updated_at", v_str(&fmt_clock(updated_at))),
            ("next_expected", v_str(&fmt_clock(next_expected))),
            ("samples", json!(samples)),
        ]),
    );
}

pub fn log_anim(from: f64, to: f64, start_server: f64, duration_secs: f64) {
    log(
        Level::Info,
        Domain::Anim,
        "window",
        obj(&[
            ("from", v_num(from)),
            ("to", v_num(to)),
            ("start", v_str(&fmt_clock(start_server))),
            ("duration_secs", v_num(duration_secs)),
        ]),
    );
}

pub fn log_score(score: i32, long_run: &str, tone: &str) {
    log(
        Level::Debug,
        Domain::Trend,
        "score",
        obj(&[
            ("score", json!(score)),
            ("long_run", v_str(long_run)),
            ("tone", v_str(tone)),
        ]),
    );
}

pub fn log_fetch_failed(source: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Feed,
        "fetch_failed",
        obj(&[("source", v_str(source)), ("reason", v_str(reason))]),
    );
}

pub fn log_store_write(path: &str, samples: usize, value: f64, hash: &str) {
    log(
        Level::Info,
        Domain::Store,
        "write",
        obj(&[
            ("path", v_str(path)),
            ("samples", json!(samples)),
            ("value", v_num(value)),
            ("sha256", v_str(hash)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    started: Instant,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        log(
            Level::Trace,
            Domain::Profile,
            "profile",
            obj(&[("label", v_str(self.label)), ("elapsed_ms", v_num(elapsed_ms))]),
        );
    }
}
