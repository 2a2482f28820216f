use colored::*;
use std::fmt::Display;

/// How much console output to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Terse = 1,
    Standard = 2,
    Debug = 3,
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        match level {
            0 => Verbosity::Quiet,
            1 => Verbosity::Terse,
            3..=u8::MAX => Verbosity::Debug,
            _ => Verbosity::Standard,
        }
    }
}

/// Leveled console logger.
///
/// Cheap to clone. Each session gets its own copy via [`Logger::with_context`] so
/// that failures can be attributed to a profile/region without global state.
#[derive(Debug, Clone)]
pub struct Logger {
    verbosity: Verbosity,
    context: Option<String>,
}

impl Logger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            context: None,
        }
    }

    /// Disable colors when stderr is not attached to a terminal.
    pub fn init_colors() {
        if !atty::is(atty::Stream::Stderr) {
            colored::control::set_override(false);
        }
    }

    pub fn with_context(&self, context: impl Into<String>) -> Self {
        Self {
            verbosity: self.verbosity,
            context: Some(context.into()),
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity >= level
    }

    pub fn debug(&self, message: impl Display) {
        if self.enabled(Verbosity::Debug) {
            self.emit("[DEBUG]".cyan().bold(), message);
        }
    }

    pub fn info(&self, message: impl Display) {
        if self.enabled(Verbosity::Standard) {
            self.emit("[INFO]".blue().bold(), message);
        }
    }

    pub fn success(&self, message: impl Display) {
        if self.enabled(Verbosity::Standard) {
            self.emit("[SUCCESS]".green().bold(), message);
        }
    }

    pub fn warning(&self, message: impl Display) {
        if self.enabled(Verbosity::Terse) {
            self.emit("[WARNING]".yellow().bold(), message);
        }
    }

    pub fn error(&self, message: impl Display) {
        if self.enabled(Verbosity::Terse) {
            self.emit("[ERROR]".red().bold(), message);
        }
    }

    /// Print an error regardless of verbosity and exit with status 1.
    pub fn fatal(&self, message: impl Display) -> ! {
        self.emit("[ERROR]".red().bold(), message);
        std::process::exit(1);
    }

    fn emit(&self, tag: ColoredString, message: impl Display) {
        match &self.context {
            Some(context) => eprintln!("{} {} {}", tag, format!("[{}]", context).dimmed(), message),
            None => eprintln!("{} {}", tag, message),
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Verbosity::Standard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_level() {
        assert_eq!(Verbosity::from(0), Verbosity::Quiet);
        assert_eq!(Verbosity::from(1), Verbosity::Terse);
        assert_eq!(Verbosity::from(2), Verbosity::Standard);
        assert_eq!(Verbosity::from(3), Verbosity::Debug);
        assert_eq!(Verbosity::from(9), Verbosity::Debug);
    }

    #[test]
    fn test_enabled_levels() {
        let logger = Logger::new(Verbosity::Terse);
        assert!(logger.enabled(Verbosity::Quiet));
        assert!(logger.enabled(Verbosity::Terse));
        assert!(!logger.enabled(Verbosity::Standard));
        assert!(!logger.enabled(Verbosity::Debug));
    }

    #[test]
    fn test_with_context_keeps_verbosity() {
        let logger = Logger::new(Verbosity::Debug).with_context("prod-us-east-1");
        assert_eq!(logger.verbosity(), Verbosity::Debug);
        assert_eq!(logger.context.as_deref(), Some("prod-us-east-1"));
    }
}
