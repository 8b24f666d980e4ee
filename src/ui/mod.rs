//! Terminal output.
//!
//! - [`UserInterface`] abstracts where command output goes
//! - [`TerminalUI`] writes styled output to the terminal
//! - [`MockUI`] records output for assertions in tests
//!
//! # Example
//!
//! ```
//! use envmatrix::ui::{MockUI, UserInterface};
//!
//! let mut ui = MockUI::new();
//! ui.show_header("testenv:py36");
//! ui.show_setting("basepython", "python3.6");
//! assert_eq!(ui.settings()[0].1, "python3.6");
//! ```

pub mod mock;
pub mod output;
pub mod terminal;
pub mod theme;

pub use mock::MockUI;
pub use output::OutputMode;
pub use terminal::{create_ui, TerminalUI};
pub use theme::{should_use_colors, EnvMatrixTheme};

/// Trait for user interface interactions.
///
/// This trait allows mocking the UI in tests.
pub trait UserInterface {
    /// Get the current output mode.
    fn output_mode(&self) -> OutputMode;

    /// Change the output mode.
    fn set_output_mode(&mut self, mode: OutputMode);

    /// Display plain output. Always shown.
    fn message(&mut self, msg: &str);

    /// Display a success message.
    fn success(&mut self, msg: &str);

    /// Display a warning message.
    fn warning(&mut self, msg: &str);

    /// Display an error message.
    fn error(&mut self, msg: &str);

    /// Show a section header such as an environment name.
    fn show_header(&mut self, title: &str);

    /// Show one resolved setting.
    fn show_setting(&mut self, key: &str, value: &str);
}
