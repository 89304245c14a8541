//! Terminal binding for rendered frames.
//!
//! `compose` turns a frame into a [`Screen`] without touching the terminal;
//! a [`Surface`] paints it. The live surface is a ratatui terminal on the
//! alternate screen, held in raw mode by [`TerminalSession`].

use anyhow::Result;
use crossterm::{
    cursor, execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Sparkline as Bars},
    Terminal,
};
use std::io::{self, Stdout};

use crate::render::{fmt_money, indicator_text, price_text, Frame, Sparkline, SPARK_LEVELS};
use crate::state::{AppState, Trend};

const SPARK_ROWS: u16 = 2;

fn trend_style(trend: Trend) -> Style {
    match trend {
        Trend::Up => Style::default().fg(Color::Green),
        Trend::Down => Style::default().fg(Color::Red),
        Trend::Neutral => Style::default(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparkRow {
    pub bars: Vec<u64>,
    pub style: Style,
    pub label: String,
}

/// Everything on screen for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    pub price: Line<'static>,
    pub spark: Option<SparkRow>,
    /// Anchor rows, then the conclusion.
    pub body: Vec<Line<'static>>,
    pub footer: Line<'static>,
}

impl Screen {
    pub fn draw(&self, f: &mut ratatui::Frame) {
        let spark_rows = if self.spark.is_some() { SPARK_ROWS } else { 0 };
        let [price, spark, body, footer, _] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(spark_rows),
            Constraint::Length(self.body.len() as u16),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .areas(f.area());

        f.render_widget(Paragraph::new(self.price.clone()), price);
        if let Some(row) = &self.spark {
            let [bars, label] =
                Layout::horizontal([Constraint::Length(row.bars.len() as u16 + 1), Constraint::Min(0)]).areas(spark);
            f.render_widget(
                Bars::default().data(&row.bars).max(SPARK_LEVELS).style(row.style),
                bars,
            );
            f.render_widget(Paragraph::new(row.label.as_str()), label);
        }
        f.render_widget(Paragraph::new(self.body.clone()), body);
        f.render_widget(Paragraph::new(self.footer.clone()), footer);
    }

    /// Unstyled text, one entry per line (sparkline bars omitted).
    pub fn plain_lines(&self) -> Vec<String> {
        let text = |l: &Line| l.spans.iter().map(|s| s.content.as_ref()).collect::<String>();
        let mut out = vec![text(&self.price)];
        if let Some(row) = &self.spark {
            out.push(row.label.clone());
        }
        out.extend(self.body.iter().map(text));
        out.push(text(&self.footer));
        out
    }
}

pub fn compose(
    symbol: &str,
    frame: &Frame,
    state: &AppState,
    spark: Option<&Sparkline>,
    spark_width: usize,
) -> Screen {
    let dim = Style::default().add_modifier(Modifier::DIM);

    let mut price = vec![Span::styled(price_text(symbol, frame), trend_style(frame.trend))];
    if frame.stale {
        price[0].style = price[0].style.add_modifier(Modifier::DIM);
        price.push(Span::styled(" (stale)", dim));
    }

    let label_width = state.anchors.iter().map(|a| a.label.len()).max().unwrap_or(0) + 1;
    let mut body: Vec<Line<'static>> = state
        .anchors
        .iter()
        .enumerate()
        .map(|(i, anchor)| {
            let mut spans = vec![Span::raw(format!(
                "{:<width$} {}",
                format!("{}:", anchor.label),
                fmt_money(symbol, anchor.value),
                width = label_width
            ))];
            if let Some(delta) = frame.deltas.get(i) {
                let colour = if delta.is_up() { Color::Green } else { Color::Red };
                spans.push(Span::styled(indicator_text(symbol, delta), Style::default().fg(colour)));
            }
            Line::from(spans)
        })
        .collect();
    if let Some(c) = &state.conclusion {
        body.push(Line::raw(c.clone()));
    }

    let footer = Line::styled(
        format!(
            "[{}] {}  (←/p pro, ↑↓/a auto, →/d degen, q quit)",
            state.tone.setting.letter(),
            state.tone.describe()
        ),
        dim,
    );

    Screen {
        price: Line::from(price),
        spark: spark.map(|sp| SparkRow {
            bars: sp.columns(spark_width),
            style: trend_style(sp.trend),
            label: sp.label.clone(),
        }),
        body,
        footer,
    }
}

/// Somewhere a screen can be painted.
pub trait Surface {
    fn paint(&mut self, screen: &Screen) -> io::Result<()>;
}

impl<B: Backend> Surface for Terminal<B> {
    fn paint(&mut self, screen: &Screen) -> io::Result<()> {
        self.draw(|f| screen.draw(f)).map(|_| ())
    }
}

/// Paint state: the current sparkline and the last screen shown.
pub struct Display {
    symbol: String,
    spark_width: usize,
    sparkline: Option<Sparkline>,
    shown: Option<Screen>,
}

impl Display {
    pub fn new(symbol: &str, spark_width: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            spark_width,
            sparkline: None,
            shown: None,
        }
    }

    pub fn set_sparkline(&mut self, spark: Option<Sparkline>) {
        // a failed redraw keeps the previous line
        if spark.is_some() {
            self.sparkline = spark;
        }
    }

    /// Force the next frame to repaint (tone, conclusion or terminal size changed).
    pub fn invalidate(&mut self) {
        self.shown = None;
    }

    /// Paint the frame unless it matches what is already on screen.
    pub fn show<S: Surface + ?Sized>(&mut self, out: &mut S, frame: &Frame, state: &AppState) -> io::Result<bool> {
        let screen = compose(&self.symbol, frame, state, self.sparkline.as_ref(), self.spark_width);
        if self.shown.as_ref() == Some(&screen) {
            return Ok(false);
        }
        out.paint(&screen)?;
        self.shown = Some(screen);
        Ok(true)
    }
}

/// Raw mode and the alternate screen for as long as the value lives.
pub struct TerminalSession {
    pub terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    pub fn enter() -> Result<Self> {
        enable_raw_mode()?;
        Self::open().map_err(|e| {
            restore();
            e
        })
    }

    fn open() -> Result<Self> {
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, cursor::Hide)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        restore();
    }
}

fn restore() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show);
}
