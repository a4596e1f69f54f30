//! Single-line engagement bar.
//!
//! Every `show` rewrites the current terminal line (`\r`) with
//! `Engagement: [████░░…] NNN/100`, coloured by engagement tier. Output
//! errors are dropped; a broken terminal must not stall the tick loop.

use std::io::{self, Stdout, Write};
use std::sync::Mutex;

use crossterm::style::Stylize;
use engage_core::collaborators::Indicator;

use crate::themes::{EngagementTier, Palette};

/// Configuration controlling visual appearance of the bar.
#[derive(Debug, Clone)]
pub struct BarConfig {
    /// Number of cells; each cell covers `100 / width` points.
    pub width: usize,
    pub filled_char: char,
    pub empty_char: char,
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            width: 20,
            filled_char: '\u{2588}', // █  FULL BLOCK
            empty_char: '\u{2591}',  // ░  LIGHT SHADE
        }
    }
}

/// Filled and empty portions of the bar for `score`.
pub fn render_bar(score: u8, config: &BarConfig) -> (String, String) {
    let score = usize::from(score.min(100));
    let filled = (score * config.width / 100).min(config.width);
    let empty = config.width - filled;
    (
        std::iter::repeat(config.filled_char).take(filled).collect(),
        std::iter::repeat(config.empty_char).take(empty).collect(),
    )
}

/// The bar line without colour or carriage return.
pub fn render_plain(score: u8, config: &BarConfig) -> String {
    let (filled, empty) = render_bar(score, config);
    format!("Engagement: [{filled}{empty}] {score:>3}/100")
}

// ── TerminalIndicator ─────────────────────────────────────────────────────────

pub struct TerminalIndicator<W: Write + Send = Stdout> {
    out: Mutex<W>,
    palette: Palette,
    config: BarConfig,
}

impl TerminalIndicator<Stdout> {
    /// Indicator on stdout, coloured for the detected background.
    pub fn stdout() -> Self {
        Self::new(io::stdout(), Palette::detect())
    }
}

impl<W: Write + Send> TerminalIndicator<W> {
    pub fn new(out: W, palette: Palette) -> Self {
        Self {
            out: Mutex::new(out),
            palette,
            config: BarConfig::default(),
        }
    }

    /// End the bar line so following output starts on a fresh one.
    pub fn finish_line(&self) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out);
            let _ = out.flush();
        }
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_bar(&self, out: &mut W, score: u8) -> io::Result<()> {
        let (filled, empty) = render_bar(score, &self.config);
        let colour = self.palette.for_tier(EngagementTier::from_score(score));
        write!(
            out,
            "\r{} [{}{}] {}",
            "Engagement:".with(colour),
            filled.with(colour),
            empty.with(self.palette.empty),
            format!("{score:>3}/100").with(colour).bold(),
        )?;
        out.flush()
    }
}

impl<W: Write + Send> Indicator for TerminalIndicator<W> {
    fn show(&self, score: u8) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        let _ = self.write_bar(&mut out, score);
    }
}
