//! Config command implementation.
//!
//! The `envmatrix config` command shows the resolved configuration: the
//! global settings followed by every selected environment.

use std::path::{Path, PathBuf};

use crate::cli::args::ConfigArgs;
use crate::config::{EnvironmentConfig, GlobalConfig, ProcessEnv};
use crate::error::{EnvMatrixError, Result};
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandResult};
use super::resolve::{load_config, EXIT_NO_CONFIG};

/// The config command implementation.
pub struct ConfigCommand {
    invocation_dir: PathBuf,
    process_env: ProcessEnv,
    args: ConfigArgs,
}

impl ConfigCommand {
    /// Create a new config command.
    pub fn new(invocation_dir: &Path, process_env: &ProcessEnv, args: ConfigArgs) -> Self {
        Self {
            invocation_dir: invocation_dir.to_path_buf(),
            process_env: process_env.clone(),
            args,
        }
    }

    pub fn args(&self) -> &ConfigArgs {
        &self.args
    }
}

impl Command for ConfigCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let Some(config) =
            load_config(&self.invocation_dir, &self.process_env, &self.args.resolve, ui)?
        else {
            return Ok(CommandResult::failure(EXIT_NO_CONFIG));
        };

        if self.args.json {
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| EnvMatrixError::Other(e.into()))?;
            ui.message(&json);
            return Ok(CommandResult::success());
        }

        show_global(ui, &config);
        for env in config.selected() {
            ui.message("");
            show_environment(ui, env);
        }

        Ok(CommandResult::success())
    }
}

fn show_global(ui: &mut dyn UserInterface, config: &GlobalConfig) {
    ui.show_header("tox");
    ui.show_setting("configfile", &config.config_path.display().to_string());
    ui.show_setting("toxinidir", &config.config_dir.display().to_string());
    ui.show_setting("toxworkdir", &config.work_dir.display().to_string());
    ui.show_setting("distdir", &config.dist_dir.display().to_string());
    ui.show_setting("distshare", &config.dist_share.display().to_string());
    ui.show_setting("setupdir", &config.setup_dir.display().to_string());
    ui.show_setting("logdir", &config.log_dir.display().to_string());
    if let Some(src) = &config.sdist_src {
        ui.show_setting("sdistsrc", &src.display().to_string());
    }
    if let Some(version) = &config.min_version {
        ui.show_setting("minversion", version);
    }
    ui.show_setting("hashseed", config.hashseed.as_deref().unwrap_or("noset"));
    ui.show_setting("skipsdist", &config.skip_sdist.to_string());
    ui.show_setting(
        "skip_missing_interpreters",
        &config.skip_missing_interpreters.to_string(),
    );
    let servers: Vec<String> = config
        .index_servers
        .values()
        .map(|s| format!("{} = {}", s.name, s.url.as_deref().unwrap_or("")))
        .collect();
    ui.show_setting("indexserver", &servers.join("\n"));
    ui.show_setting("envlist", &config.envlist.join(","));
}

fn show_environment(ui: &mut dyn UserInterface, env: &EnvironmentConfig) {
    ui.show_header(&format!("testenv:{}", env.name));
    let factors: Vec<&str> = env.factors.iter().collect();
    ui.show_setting("factors", &factors.join(" "));
    for (name, value) in env.attributes().iter() {
        ui.show_setting(name, &value.to_string());
    }
    if let Some(dir) = env.envbindir() {
        ui.show_setting("envbindir", &dir.display().to_string());
    }
    if let Some(python) = env.envpython() {
        ui.show_setting("envpython", &python.display().to_string());
    }
    if let Some(dir) = env.envsitepackagesdir() {
        ui.show_setting("envsitepackagesdir", &dir.display().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::ResolveArgs;
    use crate::ui::MockUI;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[tox]
envlist = py36-{unit,lint}

[testenv]
deps =
    pytest
    lint: flake8
setenv =
    COVERAGE_FILE = {envdir}/.coverage
commands =
    unit: pytest {posargs:tests}
    lint: flake8 src
"#;

    fn setup_project(config: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("tox.ini"), config).unwrap();
        temp
    }

    fn run(temp: &TempDir, args: ConfigArgs) -> (CommandResult, MockUI) {
        let cmd = ConfigCommand::new(temp.path(), &ProcessEnv::default(), args);
        let mut ui = MockUI::new();
        let result = cmd.execute(&mut ui).unwrap();
        (result, ui)
    }

    #[test]
    fn config_no_config() {
        let temp = TempDir::new().unwrap();
        let (result, ui) = run(&temp, ConfigArgs::default());

        assert!(!result.success);
        assert_eq!(result.exit_code, 2);
        assert!(ui.has_error("No configuration found"));
    }

    #[test]
    fn config_shows_each_selected_env() {
        let temp = setup_project(CONFIG);
        let (result, ui) = run(&temp, ConfigArgs::default());

        assert!(result.success);
        assert_eq!(ui.headers(), ["tox", "testenv:py36-unit", "testenv:py36-lint"]);
        assert_eq!(ui.setting("envlist"), Some("py36-unit,py36-lint"));
        assert_eq!(ui.setting("basepython"), Some("python3.6"));
    }

    #[test]
    fn config_renders_factor_filtered_values() {
        let temp = setup_project(CONFIG);
        let args = ConfigArgs {
            resolve: ResolveArgs {
                envs: vec!["py36-unit".to_string()],
                posargs: vec!["-x".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let (_, ui) = run(&temp, args);

        assert_eq!(ui.setting("deps"), Some("pytest"));
        assert_eq!(ui.setting("commands"), Some("pytest -x"));
        let envdir = temp.path().join(".tox").join("py36-unit");
        assert_eq!(
            ui.setting("setenv").map(|s| s.contains(&format!(
                "COVERAGE_FILE={}",
                envdir.join(".coverage").display()
            ))),
            Some(true)
        );
    }

    #[test]
    fn config_hashseed_noset() {
        let temp = setup_project(CONFIG);
        let args = ConfigArgs {
            resolve: ResolveArgs {
                hashseed: Some("noset".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let (_, ui) = run(&temp, args);

        assert_eq!(ui.setting("hashseed"), Some("noset"));
    }

    #[test]
    fn config_json_output() {
        let temp = setup_project(CONFIG);
        let args = ConfigArgs {
            json: true,
            ..Default::default()
        };
        let (result, ui) = run(&temp, args);

        assert!(result.success);
        let json: serde_json::Value = serde_json::from_str(&ui.messages()[0]).unwrap();
        assert_eq!(json["envlist"][1], "py36-lint");
        assert_eq!(
            json["environments"]["py36-lint"]["commands"][0],
            serde_json::json!(["flake8", "src"])
        );
        assert_eq!(json["environments"]["py36-lint"]["basepython"], "python3.6");
    }
}
