//! Startup stage printer shared by the binaries.
//!
//! Each startup step runs inside a `Stage`. On a terminal the stage is an `indicatif`
//! spinner; otherwise it is a `==>` line on stderr. A stage that is dropped without
//! `done()` (an early `?` return) is reported as failed.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    /// Spinners when both stderr and stdout are terminals.
    Auto,
    Plain,
    /// Spinners whenever stderr is a terminal.
    Pretty,
}

#[derive(Clone, Copy, Debug)]
pub struct Ui {
    spinners: bool,
}

impl Ui {
    pub fn new(mode: UiMode, stderr_tty: bool, stdout_tty: bool) -> Self {
        let spinners = match mode {
            UiMode::Plain => false,
            UiMode::Pretty => stderr_tty,
            UiMode::Auto => stderr_tty && stdout_tty,
        };
        Self { spinners }
    }

    pub fn detect(mode: UiMode) -> Self {
        Self::new(
            mode,
            std::io::stderr().is_terminal(),
            std::io::stdout().is_terminal(),
        )
    }

    pub fn stage(&self, name: &str) -> Stage {
        let spinner = self.spinners.then(|| start_spinner(name));
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        Stage {
            name: name.to_string(),
            detail: None,
            started: Instant::now(),
            spinner,
            finished: false,
        }
    }
}

fn start_spinner(name: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("{name}…"));
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

#[must_use = "call done() when the stage succeeds"]
pub struct Stage {
    name: String,
    detail: Option<String>,
    started: Instant,
    spinner: Option<ProgressBar>,
    finished: bool,
}

impl Stage {
    /// Extra context printed with the outcome, e.g. the broker address.
    pub fn set_detail(&mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
    }

    pub fn done(mut self) {
        self.finished = true;
    }

    fn outcome_line(&self, ok: bool, elapsed: Duration) -> String {
        let mark = if ok { '✔' } else { '✘' };
        let verb = if ok { "" } else { " failed" };
        let detail = self
            .detail
            .as_deref()
            .map(|d| format!(": {}", d))
            .unwrap_or_default();
        format!(
            "{} {}{}{} after {}",
            mark,
            self.name,
            verb,
            detail,
            human_elapsed(elapsed)
        )
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let line = self.outcome_line(self.finished, self.started.elapsed());
        match self.spinner.take() {
            Some(spinner) if self.finished => spinner.finish_with_message(line),
            Some(spinner) => spinner.abandon_with_message(line),
            None => eprintln!("{}", line),
        }
    }
}

fn human_elapsed(elapsed: Duration) -> String {
    match elapsed.as_millis() {
        ms if ms < 1000 => format!("{}ms", ms),
        _ => format!("{:.1}s", elapsed.as_secs_f64()),
    }
}
