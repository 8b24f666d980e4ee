//! Visual theme and styling.

use console::Style;

/// Styles used for terminal output.
#[derive(Debug, Clone)]
pub struct EnvMatrixTheme {
    /// Style for success messages (green).
    pub success: Style,
    /// Style for warning messages (orange).
    pub warning: Style,
    /// Style for error messages (red bold).
    pub error: Style,
    /// Style for section headers (magenta bold).
    pub header: Style,
    /// Style for setting names (bold).
    pub key: Style,
    pub dim: Style,
}

impl Default for EnvMatrixTheme {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvMatrixTheme {
    /// Create the colored theme.
    pub fn new() -> Self {
        Self {
            success: Style::new().green(),
            warning: Style::new().color256(208),
            error: Style::new().red().bold(),
            header: Style::new().bold().magenta(),
            key: Style::new().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Create a theme without colors (for non-TTY or --no-color).
    pub fn plain() -> Self {
        Self {
            success: Style::new(),
            warning: Style::new(),
            error: Style::new(),
            header: Style::new(),
            key: Style::new(),
            dim: Style::new(),
        }
    }

    pub fn format_success(&self, msg: &str) -> String {
        format!("{}", self.success.apply_to(format!("✓ {}", msg)))
    }

    pub fn format_warning(&self, msg: &str) -> String {
        format!("{}", self.warning.apply_to(format!("⚠ {}", msg)))
    }

    pub fn format_error(&self, msg: &str) -> String {
        format!("{}", self.error.apply_to(format!("✗ {}", msg)))
    }

    /// Format a section header the way it appears in the ini file.
    pub fn format_header(&self, title: &str) -> String {
        format!("{}", self.header.apply_to(format!("[{}]", title)))
    }

    /// Format a `key = value` line. Multi-line values are indented under
    /// the key.
    pub fn format_setting(&self, key: &str, value: &str) -> String {
        let mut lines = value.lines();
        let first = lines.next().unwrap_or("");
        let mut out = format!("{} {} {}", self.key.apply_to(key), self.dim.apply_to("="), first);
        for line in lines {
            out.push_str("\n    ");
            out.push_str(line);
        }
        out
    }
}

/// Check if colors should be enabled.
pub fn should_use_colors() -> bool {
    // Check NO_COLOR env var (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    console::Term::stdout().is_term()
}
