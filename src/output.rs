//! # Output Configuration
//!
//! Controls how the CLI renders: colors and emoji based on terminal
//! capabilities and user preferences, plus a progress bar for runs.
//!
//! ## Respecting User Preferences
//!
//! The module respects the following environment variables and flags:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repo_fleet::output::{OutputConfig, emoji};
//!
//! let config = OutputConfig::from_env_and_flag("auto");
//! println!("{} Scanning...", emoji(&config, "🔍", "[SCAN]"));
//! ```

use std::env;

use console::Style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;

use crate::result::{RepoResult, RepoStatus, RepositoryRef};
use crate::scheduler::ProgressSink;

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// # Behavior
    /// - `--color=always`: Force colors on (overrides NO_COLOR)
    /// - `--color=never`: Force colors off
    /// - `--color=auto`: Detect based on environment
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    fn detect_color_support() -> bool {
        // The presence of NO_COLOR (even if empty) disables colors
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }

    /// Style `status` for a terminal: green for changes, yellow for
    /// repositories that need attention, red for failures.
    pub fn status(&self, status: RepoStatus) -> String {
        let text = status.as_str();
        if !self.use_color {
            return text.to_string();
        }
        let style = match status {
            RepoStatus::Updated
            | RepoStatus::Cloned
            | RepoStatus::Reset
            | RepoStatus::Fetched => Style::new().green(),
            RepoStatus::UpToDate | RepoStatus::PreviouslySynced | RepoStatus::Skipped => {
                Style::new().dim()
            }
            RepoStatus::WouldUpdate | RepoStatus::WouldClone => Style::new().cyan(),
            RepoStatus::Dirty
            | RepoStatus::Conflicts
            | RepoStatus::NoUpstream
            | RepoStatus::MergeInProgress
            | RepoStatus::Cancelled => Style::new().yellow(),
            RepoStatus::Failed => Style::new().red().bold(),
        };
        style.force_styling(true).apply_to(text).to_string()
    }

    pub fn bold(&self, text: &str) -> String {
        if self.use_color {
            Style::new().bold().force_styling(true).apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns the emoji when colors are enabled, the plain text otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// Progress bar on stderr, one tick per finished repository.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// A visible bar when `visible` is set and stderr is a terminal, a
    /// hidden one otherwise.
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr())
        } else {
            ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden())
        };
        let style = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {wide_msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Hide the bar while `f` writes to the terminal.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.bar.suspend(f)
    }
}

impl ProgressSink for BarProgress {
    fn batch(&self, len: usize) {
        self.bar.inc_length(len as u64);
    }

    fn started(&self, repo: &RepositoryRef) {
        self.bar.set_message(repo.label());
    }

    fn finished(&self, result: &RepoResult) {
        if result.status() == RepoStatus::Failed {
            self.bar.println(format!(
                "failed: {}: {}",
                result.repository().label(),
                result.message()
            ));
        }
        debug!(
            "{}: {}",
            result.repository().identity(),
            result.status()
        );
        self.bar.inc(1);
    }
}
