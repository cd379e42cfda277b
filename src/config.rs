//! Configuration management for diffpad
//!
//! Stores tunables in ~/.config/diffpad/config.json. Every field has a
//! default, so a partial (or missing) file is always usable.

use crate::credentials::CredentialBackend;
use crate::provider::Provider;
use crate::session::Theme;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed user-facing strings.
pub mod strings {
    pub const NO_TOKEN: &str = "No API key set for the selected model. Click \"Tokens\" and paste a key for this provider to proceed.";
    pub const PROMPT_CANCELLED: &str = "Prompt cancelled by user.";
    pub const PROMPTING: &str = "Prompt in progress…";
    pub const UNCHANGED_FROM_DEFAULT: &str = "Code matches the default template for this language.";
    pub const NO_CHANGES_TO_SAVE: &str = "No changes vs last saved.";
    pub const UNSAVED_SWITCH: &str = "You have unsaved changes. Save before switching language?";
    pub const NO_CHANGES_SINCE_LAST_PROMPT: &str =
        "No changes to code or prompt text since the last prompt.";
    pub const OUTPUT_TRUNCATED: &str = "Output truncated due to time limit.";
    pub const PROVIDER_ERROR_PREFIX: &str = "Provider error: ";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_theme: Theme,
    /// Largest document accepted by an edit, in characters
    pub max_code_size: usize,
    /// Narrowest either pane may get, in percent
    pub min_panel_percent: f64,
    /// Reveal speed in characters per second (approximate)
    pub stream_char_rate: u32,
    /// Hard cap on one loading or reveal phase
    pub max_stream_ms: u64,
    pub reveal_tick_ms: u64,
    pub loading_tick_ms: u64,
    pub default_language: String,
    /// Order used when auto-selecting a model from available credentials
    pub provider_preference: Vec<Provider>,
    pub global_prompt_max: usize,
    pub language_prompt_max: usize,
    pub credential_backend: CredentialBackend,
    /// Overrides the location of the local state store
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_theme: Theme::Dark,
            max_code_size: 200_000,
            min_panel_percent: 25.0,
            stream_char_rate: 50,
            max_stream_ms: 60_000,
            reveal_tick_ms: 100,
            loading_tick_ms: 250,
            default_language: "javascript".to_string(),
            provider_preference: Provider::all().to_vec(),
            global_prompt_max: 1000,
            language_prompt_max: 1000,
            credential_backend: CredentialBackend::Store,
            data_dir: None,
        }
    }
}

impl Settings {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("diffpad"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from an explicit path. Corrupt files are moved aside.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        self.save_to(&dir.join("config.json"))
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        write_config_atomic(path, &content)
    }

    /// Directory holding the persisted session state
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join("diffpad")))
    }

    pub fn reveal_tick(&self) -> Duration {
        Duration::from_millis(self.reveal_tick_ms.max(1))
    }

    pub fn loading_tick(&self) -> Duration {
        Duration::from_millis(self.loading_tick_ms.max(1))
    }

    pub fn max_stream(&self) -> Duration {
        Duration::from_millis(self.max_stream_ms)
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/diffpad/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
