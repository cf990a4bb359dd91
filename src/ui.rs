//! Startup progress on stderr for the `live_detect` binary.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag.trim().to_ascii_lowercase().as_str() {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    spinners: bool,
}

impl Ui {
    /// `Auto` shows spinners only when stderr is a terminal and
    /// `RUST_LOG` is unset, so log lines are not interleaved with them.
    pub fn new(mode: UiMode, stderr_is_tty: bool, logging_configured: bool) -> Self {
        let spinners = stderr_is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => !logging_configured,
                UiMode::Plain => false,
            };
        Self { spinners }
    }

    pub fn uses_spinners(&self) -> bool {
        self.spinners
    }

    /// Announce a startup step. The step is reported done when the guard drops.
    pub fn stage(&self, name: &str) -> Stage {
        let spinner = if self.spinners {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg} {elapsed}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(name.to_string());
            spinner.enable_steady_tick(Duration::from_millis(100));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        Stage {
            name: name.to_string(),
            started: Instant::now(),
            spinner,
            failed: false,
        }
    }
}

pub struct Stage {
    name: String,
    started: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl Stage {
    /// Report the step as failed instead of done.
    pub fn fail(mut self) {
        self.failed = true;
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let mark = if self.failed { "✘" } else { "✔" };
        let line = format!("{} {} ({})", mark, self.name, short_duration(self.started.elapsed()));
        match &self.spinner {
            Some(spinner) if self.failed => spinner.abandon_with_message(line),
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{line}"),
        }
    }
}

fn short_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing_defaults_to_auto() {
        assert_eq!(UiMode::parse("Pretty"), UiMode::Pretty);
        assert_eq!(UiMode::parse("plain"), UiMode::Plain);
        assert_eq!(UiMode::parse("fancy"), UiMode::Auto);
    }

    #[test]
    fn spinners_need_a_terminal() {
        assert!(!Ui::new(UiMode::Pretty, false, false).uses_spinners());
        assert!(Ui::new(UiMode::Pretty, true, true).uses_spinners());
        assert!(!Ui::new(UiMode::Auto, true, true).uses_spinners());
        assert!(!Ui::new(UiMode::Plain, true, false).uses_spinners());
    }

    #[test]
    fn short_durations_use_millis() {
        assert_eq!(short_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(short_duration(Duration::from_millis(1500)), "1.50s");
    }
}
