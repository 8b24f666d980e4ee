//! Configuration loading shared by the commands.

use std::path::Path;

use crate::cli::args::ResolveArgs;
use crate::config::{ConfigLoader, GlobalConfig, GlobalOptions, ProcessEnv};
use crate::error::{EnvMatrixError, Result};
use crate::ui::UserInterface;

/// Exit code when no configuration file can be found.
pub const EXIT_NO_CONFIG: i32 = 2;

/// Load the configuration for `args`.
///
/// A missing configuration file is reported through `ui` and yields
/// `Ok(None)`; every other failure is returned.
pub fn load_config(
    invocation_dir: &Path,
    process_env: &ProcessEnv,
    args: &ResolveArgs,
    ui: &mut dyn UserInterface,
) -> Result<Option<GlobalConfig>> {
    let loader = ConfigLoader::new(GlobalOptions::from(args))
        .with_process_env(process_env.clone())
        .with_invocation_dir(invocation_dir);

    match loader.load() {
        Ok(config) => Ok(Some(config)),
        Err(EnvMatrixError::ConfigNotFound { path }) => {
            ui.error(&format!(
                "No configuration found: {} (searched from {})",
                path.display(),
                invocation_dir.display()
            ));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::MockUI;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_config_is_reported_not_returned() {
        let temp = TempDir::new().unwrap();
        let mut ui = MockUI::new();

        let config =
            load_config(temp.path(), &ProcessEnv::default(), &ResolveArgs::default(), &mut ui)
                .unwrap();

        assert!(config.is_none());
        assert!(ui.has_error("No configuration found"));
    }

    #[test]
    fn resolution_errors_are_returned() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("tox.ini"),
            "[testenv]\ncommands = echo {[nowhere]key}\n",
        )
        .unwrap();
        let mut ui = MockUI::new();

        let err =
            load_config(temp.path(), &ProcessEnv::default(), &ResolveArgs::default(), &mut ui)
                .unwrap_err();

        assert!(matches!(err, EnvMatrixError::UndefinedReference { .. }));
        assert!(ui.errors().is_empty());
    }
}
