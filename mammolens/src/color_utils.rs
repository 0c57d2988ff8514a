//! Conditional terminal styling for log output and risk labels.
//!
//! Styling is switched off by any of:
//! - `--no-color` CLI flag
//! - `NO_COLOR` environment variable (https://no-color.org/)
//! - `MAMMOLENS_NO_COLOR` environment variable
//! - `TERM=dumb`
//! - stderr not being a TTY
//!
//! With styling off, symbols fall back to bracketed plain-text tags where a
//! tag carries meaning (failures and run outcomes) and to nothing otherwise.

use colored::ColoredString;
use std::io::{stderr, IsTerminal};
use std::sync::OnceLock;

/// Resolved once at startup; read by every styled log line
static COLOR_CONFIG: OnceLock<ColorConfig> = OnceLock::new();

const DISABLING_ENV_VARS: [&str; 2] = ["NO_COLOR", "MAMMOLENS_NO_COLOR"];

/// Environment and TTY checks, independent of the CLI flag
fn should_disable_colors_from_env() -> bool {
    DISABLING_ENV_VARS
        .iter()
        .any(|var| !std::env::var(var).unwrap_or_default().is_empty())
        || std::env::var("TERM").unwrap_or_default() == "dumb"
        // log messages go to stderr
        || !stderr().is_terminal()
}

#[derive(Debug, Clone)]
struct ColorConfig {
    colors_enabled: bool,
}

impl ColorConfig {
    fn new(no_color_flag: bool) -> Self {
        let colors_enabled = !no_color_flag && !should_disable_colors_from_env();
        Self { colors_enabled }
    }
}

/// Record the `--no-color` flag. Call once, after parsing arguments and
/// before the logger is initialized.
pub fn init_color_config(no_color_flag: bool) {
    let config = ColorConfig::new(no_color_flag);
    COLOR_CONFIG.set(config).unwrap_or_else(|_| {
        eprintln!("Warning: Color configuration already initialized");
    });
}

/// Whether styled output is active. Before [`init_color_config`] runs, only
/// the environment is consulted.
fn colors_enabled() -> bool {
    COLOR_CONFIG
        .get()
        .map(|config| config.colors_enabled)
        .unwrap_or_else(|| !should_disable_colors_from_env())
}

/// Apply `color_fn` to `text` when styling is active
pub fn maybe_color_stderr<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

/// Log level prefixes and risk tier labels
pub mod colors {
    use super::maybe_color_stderr;
    use crate::risk::RiskTier;
    use colored::Colorize;

    pub fn error_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.red().bold())
    }

    pub fn warning_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.yellow())
    }

    pub fn info_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.green())
    }

    pub fn debug_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.blue())
    }

    pub fn trace_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.magenta())
    }

    /// Tier label colored by urgency: green below Moderate, yellow at
    /// Moderate, red from High, bold red at Very High
    pub fn risk_tier(tier: RiskTier) -> String {
        let label = tier.as_str();
        match tier {
            RiskTier::VeryLow | RiskTier::Low => maybe_color_stderr(label, |s| s.green()),
            RiskTier::Moderate => maybe_color_stderr(label, |s| s.yellow()),
            RiskTier::High => maybe_color_stderr(label, |s| s.red()),
            RiskTier::VeryHigh => maybe_color_stderr(label, |s| s.red().bold()),
        }
    }
}

/// Leading markers for log lines. Each includes its trailing space.
pub mod symbols {
    use super::colors_enabled;

    fn pick(styled: &'static str, plain: &'static str) -> &'static str {
        if colors_enabled() {
            styled
        } else {
            plain
        }
    }

    /// ONNX session ready
    pub fn model_loaded() -> &'static str {
        pick("✅ ", "")
    }

    pub fn analysis_start() -> &'static str {
        pick("🔬 ", "")
    }

    pub fn dedup_start() -> &'static str {
        pick("🔍 ", "")
    }

    /// Per-image or whole-run failure
    pub fn operation_failed() -> &'static str {
        pick("❌ ", "[FAILED] ")
    }

    /// Device and execution provider selection
    pub fn system_setup() -> &'static str {
        pick("⚙️  ", "")
    }

    pub fn completed_successfully() -> &'static str {
        pick("✅ ", "[SUCCESS] ")
    }

    /// Some images analyzed, some failed
    pub fn completed_partially_successfully() -> &'static str {
        pick("⚠️  ", "[PARTIAL-SUCCESS] ")
    }

    pub fn warning() -> &'static str {
        pick("⚠️  ", "")
    }
}
