use std::path::PathBuf;

/// Default directory for the local object store, ledger and registry.
pub const DEFAULT_STATE_DIR: &str = ".mlpromote";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("No project given: pass --project or set PROJECT")]
    MissingProject,
}

/// Runtime settings loaded from environment variables, overridable by flags.
///
/// | Env Var                       | Default                               |
/// |-------------------------------|---------------------------------------|
/// | `PROJECT`                     | -- (required unless `--project`)      |
/// | `MLPROMOTE_CONFIG`            | `<project>/config/config.json`        |
/// | `MLPROMOTE_PROJECTION_CONFIG` | `<project>/config/model_config.json`  |
/// | `MLPROMOTE_STATE_DIR`         | `.mlpromote`                          |
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub project: String,
    pub config_path: PathBuf,
    pub projection_path: PathBuf,
    pub state_dir: PathBuf,
}

impl Settings {
    pub fn from_env(project_flag: Option<&str>) -> Result<Self, SettingsError> {
        Self::from_lookup(project_flag, |key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] but reads variables through `lookup`.
    pub fn from_lookup(
        project_flag: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project = project_flag
            .map(str::to_string)
            .or_else(|| non_empty("PROJECT"))
            .ok_or(SettingsError::MissingProject)?;

        let config_dir = PathBuf::from(&project).join("config");
        let config_path = non_empty("MLPROMOTE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("config.json"));
        let projection_path = non_empty("MLPROMOTE_PROJECTION_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("model_config.json"));
        let state_dir = non_empty("MLPROMOTE_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

        Ok(Self {
            project,
            config_path,
            projection_path,
            state_dir,
        })
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("registry.json")
    }
}
