//! The client loop: one render tick, one poll timer, one in-flight fetch.
//!
//! Everything runs on a current-thread runtime. Fetches are spawned so a slow
//! response never blocks the tick, but their results are applied from the
//! same `select!` loop, between ticks. Keys arrive through crossterm's event
//! stream while the terminal is in raw mode.

use anyhow::Result;
use chrono::Local;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures_util::StreamExt;
use serde_json::json;
use std::future::pending;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::clock::ClockSkew;
use crate::display::{Display, Surface, TerminalSession};
use crate::feed::ingest::{ingest_feed, IngestOutcome};
use crate::feed::source::{read_location, source_for, FeedSource, FetchOutcome};
use crate::feed::DEFAULT_INTERVAL_SECS;
use crate::logging::{log, log_fetch_failed, obj, set_echo, v_num, v_str, Domain, Level};
use crate::mood::{conclude, log_tone, Lexicon, ToneSetting, ToneState, ToneStore};
use crate::render::{render_tick, sparkline};
use crate::scheduler::{ScheduleConfig, Scheduler};
use crate::state::{now_epoch, AppState, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tone(ToneSetting),
    Quit,
}

/// Left pins pro, right pins degen, up/down return to auto. Letters mirror
/// the arrows; `q`, Esc and Ctrl-C quit (raw mode swallows SIGINT).
pub fn command_for_key(key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C')).then_some(Command::Quit);
    }
    match key.code {
        KeyCode::Left | KeyCode::Char('p') | KeyCode::Char('P') => Some(Command::Tone(ToneSetting::Pro)),
        KeyCode::Right | KeyCode::Char('d') | KeyCode::Char('D') => Some(Command::Tone(ToneSetting::Degen)),
        KeyCode::Up | KeyCode::Down | KeyCode::Char('a') | KeyCode::Char('A') => {
            Some(Command::Tone(ToneSetting::Auto))
        }
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => Some(Command::Quit),
        _ => None,
    }
}

pub struct Runner {
    cfg: Config,
    state: AppState,
    skew: Option<ClockSkew>,
    source: Arc<dyn FeedSource>,
    scheduler: Scheduler,
    display: Display,
    lexicon: Option<Lexicon>,
    tone_store: ToneStore,
    paint_failing: bool,
}

impl Runner {
    /// Must be called inside a tokio runtime (the poll timer lives there).
    pub fn new(cfg: Config) -> Result<Self> {
        let source = source_for(&cfg.feed_url)?;
        Ok(Self::with_source(cfg, source))
    }

    pub fn with_source(cfg: Config, source: Arc<dyn FeedSource>) -> Self {
        let tone_store = ToneStore::new(&cfg.tone_file);
        let setting = ToneSetting::from_override(tone_store.load());
        let tone = ToneState::resolve(setting, &Local::now().naive_local());
        let skew = cfg.server_now.map(|server| ClockSkew::from_epochs(server, now_epoch()));

        Self {
            state: AppState::new(tone),
            skew,
            source,
            scheduler: Scheduler::new(ScheduleConfig::from_config(&cfg)),
            display: Display::new(&cfg.currency_symbol, cfg.spark_width),
            lexicon: None,
            tone_store,
            paint_failing: false,
            cfg,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn skew(&self) -> ClockSkew {
        self.skew.unwrap_or_else(ClockSkew::zero)
    }

    pub fn set_lexicon(&mut self, lexicon: Option<Lexicon>) {
        self.lexicon = lexicon;
        self.refresh_conclusion();
    }

    fn spawn_fetch(&self) -> JoinHandle<FetchOutcome> {
        let source = self.source.clone();
        tokio::spawn(async move { source.fetch().await })
    }

    /// Skew is fixed by the first response that carries a server clock.
    fn capture_skew(&mut self, server_date: Option<f64>) -> ClockSkew {
        if let Some(skew) = self.skew {
            return skew;
        }
        let skew = match server_date {
            Some(server) => ClockSkew::from_epochs(server, now_epoch()),
            None => {
                let now = now_epoch();
                ClockSkew::from_epochs(now, now)
            }
        };
        self.skew = Some(skew);
        skew
    }

    /// Apply one fetch result: ingest, refresh derived views, re-arm the poll.
    pub fn on_fetch(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Fetched {
                envelope,
                server_date,
            } => {
                let skew = self.capture_skew(server_date);
                let now_server = skew.to_server(now_epoch());
                match ingest_feed(&mut self.state, &envelope, now_server) {
                    IngestOutcome::Updated(report) => {
                        self.display.set_sparkline(sparkline(
                            &self.state.samples,
                            report.interval_secs,
                            self.cfg.spark_window_secs as f64,
                        ));
                        self.refresh_tone();
                        self.refresh_conclusion();
                        self.scheduler.schedule_next_fetch(
                            report.updated_at_server,
                            report.interval_secs,
                            &skew,
                            now_epoch(),
                        );
                    }
                    IngestOutcome::Unchanged => {
                        log(Level::Debug, Domain::Feed, "unchanged", obj(&[]));
                    }
                    IngestOutcome::Insufficient => {
                        log(
                            Level::Warn,
                            Domain::Feed,
                            "insufficient_samples",
                            obj(&[("prices", json!(envelope.prices.len()))]),
                        );
                    }
                }
            }
            FetchOutcome::Failed(reason) => log_fetch_failed(&self.source.describe(), &reason),
        }

        if self.cfg.recovery_poll {
            let interval = self.state.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS);
            if self.scheduler.arm_recovery(interval) {
                log(
                    Level::Info,
                    Domain::Schedule,
                    "recovery_armed",
                    obj(&[("delay_secs", v_num(interval))]),
                );
            }
        }
    }

    fn refresh_tone(&mut self) {
        let resolved = ToneState::resolve(self.state.tone.setting, &Local::now().naive_local());
        if resolved != self.state.tone {
            self.state.tone = resolved;
            log_tone(&resolved);
            self.display.invalidate();
        }
    }

    fn refresh_conclusion(&mut self) {
        let c = conclude(
            self.state.target_value,
            &self.state.anchors,
            &self.state.samples,
            self.state.tone.effective,
            self.lexicon.as_ref(),
            &mut rand::thread_rng(),
        );
        if let Some(c) = c {
            self.state.score = c.score;
            self.state.conclusion = Some(c.sentence);
            self.display.invalidate();
        }
    }

    /// Move the tone toggle and persist the choice.
    pub fn set_tone(&mut self, setting: ToneSetting) {
        if let Err(e) = self.tone_store.save(setting.as_override()) {
            log(
                Level::Warn,
                Domain::Mood,
                "persist_failed",
                obj(&[("reason", v_str(&e.to_string()))]),
            );
        }
        self.state.tone = ToneState::resolve(setting, &Local::now().naive_local());
        log_tone(&self.state.tone);
        self.refresh_conclusion();
        self.display.invalidate();
    }

    /// Resolves when the armed poll timer fires; pending while none is armed.
    pub async fn poll_due(&mut self) {
        self.scheduler.wait().await;
    }

    /// One render tick onto `out`. Paint errors are logged once per run of
    /// failures and never stop the loop.
    pub fn render_to<S: Surface + ?Sized>(&mut self, out: &mut S) {
        let now_server = self.skew().to_server(now_epoch());
        let Some(frame) = render_tick(&mut self.state, now_server, self.cfg.stale_multiplier) else {
            return;
        };
        match self.display.show(out, &frame, &self.state) {
            Ok(_) => self.paint_failing = false,
            Err(e) => {
                if !self.paint_failing {
                    log(
                        Level::Warn,
                        Domain::System,
                        "paint_failed",
                        obj(&[("reason", v_str(&e.to_string()))]),
                    );
                }
                self.paint_failing = true;
            }
        }
    }

    pub async fn run(mut self) -> Result<()> {
        log(
            Level::Info,
            Domain::System,
            "start",
            obj(&[
                ("feed", v_str(&self.source.describe())),
                ("lexicon", v_str(&self.cfg.lexicon_url)),
            ]),
        );
        log_tone(&self.state.tone);

        let lexicon_url = self.cfg.lexicon_url.clone();
        let mut lexicon_task: Option<JoinHandle<Option<Lexicon>>> =
            Some(tokio::spawn(async move { load_lexicon(&lexicon_url).await }));
        let mut in_flight: Option<JoinHandle<FetchOutcome>> = Some(self.spawn_fetch());

        let mut ticker = interval(Duration::from_millis(self.cfg.render_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut session = TerminalSession::enter()?;
        set_echo(false);
        let mut keys = EventStream::new();
        let mut keys_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.render_to(&mut session.terminal),

                () = self.poll_due(), if self.scheduler.is_armed() && in_flight.is_none() => {
                    in_flight = Some(self.spawn_fetch());
                }

                outcome = join_task(&mut in_flight) => {
                    in_flight = None;
                    self.on_fetch(outcome.unwrap_or_else(|e| FetchOutcome::Failed(e.to_string())));
                }

                lexicon = join_task(&mut lexicon_task) => {
                    lexicon_task = None;
                    self.set_lexicon(lexicon.ok().flatten());
                }

                event = keys.next(), if keys_open => match event {
                    Some(Ok(Event::Key(key))) => match command_for_key(&key) {
                        Some(Command::Tone(setting)) => self.set_tone(setting),
                        Some(Command::Quit) => break,
                        None => {}
                    },
                    Some(Ok(Event::Resize(..))) => self.display.invalidate(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log(Level::Warn, Domain::System, "input_closed", obj(&[("reason", v_str(&e.to_string()))]));
                        keys_open = false;
                    }
                    None => keys_open = false,
                },
            }
        }

        drop(session);
        set_echo(true);
        log(Level::Info, Domain::System, "stop", obj(&[]));
        Ok(())
    }
}

/// Await a spawned task if there is one; otherwise never resolve.
async fn join_task<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, tokio::task::JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

/// Lexicon failures are logged and leave the stock phrase in place.
pub async fn load_lexicon(location: &str) -> Option<Lexicon> {
    let parsed = match read_location(location).await {
        Ok(body) => Lexicon::parse(&body).map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    match parsed {
        Ok(lex) => Some(lex),
        Err(e) => {
            log(
                Level::Warn,
                Domain::Mood,
                "lexicon_unavailable",
                obj(&[("location", v_str(location)), ("reason", v_str(&e.to_string()))]),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn arrows_and_letters_move_the_toggle() {
        assert_eq!(command_for_key(&press(KeyCode::Left)), Some(Command::Tone(ToneSetting::Pro)));
        assert_eq!(command_for_key(&press(KeyCode::Right)), Some(Command::Tone(ToneSetting::Degen)));
        assert_eq!(command_for_key(&press(KeyCode::Up)), Some(Command::Tone(ToneSetting::Auto)));
        assert_eq!(command_for_key(&press(KeyCode::Down)), Some(Command::Tone(ToneSetting::Auto)));
        assert_eq!(command_for_key(&press(KeyCode::Char('p'))), Some(Command::Tone(ToneSetting::Pro)));
        assert_eq!(command_for_key(&press(KeyCode::Char('D'))), Some(Command::Tone(ToneSetting::Degen)));
        assert_eq!(command_for_key(&press(KeyCode::Char('x'))), None);
    }

    #[test]
    fn quit_keys() {
        assert_eq!(command_for_key(&press(KeyCode::Char('q'))), Some(Command::Quit));
        assert_eq!(command_for_key(&press(KeyCode::Esc)), Some(Command::Quit));
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(command_for_key(&ctrl_c), Some(Command::Quit));
        let ctrl_p = KeyEvent::new(KeyCode::Char('p'), KeyModifiers::CONTROL);
        assert_eq!(command_for_key(&ctrl_p), None);
    }

    #[test]
    fn key_release_is_ignored() {
        let release = KeyEvent::new_with_kind(KeyCode::Left, KeyModifiers::NONE, KeyEventKind::Release);
        assert_eq!(command_for_key(&release), None);
    }
}
