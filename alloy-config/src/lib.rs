//! Shared configuration loader for the Alloy editor bridge.
//!
//! `defaults/alloy.default.toml` is embedded into every binary so that docs and
//! runtime behavior stay in sync. Applications layer user-specific files on top
//! of those defaults via [`Loader`] before deserializing into [`AlloyConfig`].

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, ValueKind};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TOML: &str = include_str!("../defaults/alloy.default.toml");
const HIGHLIGHT_MODE_KEY: &str = "editor.command_highlight_mode";

/// Top-level configuration consumed by the bridge and its front ends.
#[derive(Debug, Clone, Deserialize)]
pub struct AlloyConfig {
    pub server: ServerConfig,
    pub editor: EditorConfig,
    pub panel: PanelConfig,
}

/// How the language server process is launched and supervised.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub runtime: String,
    pub jar: PathBuf,
    pub accept_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditorConfig {
    pub language_id: String,
    pub command_highlight_mode: CommandHighlightMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    pub title: String,
    /// Replaces the embedded panel document when set.
    #[serde(default)]
    pub html: Option<PathBuf>,
}

/// Which presentation channel shows runnable commands.
///
/// Any value other than `codelens` or `link` hides both channels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum CommandHighlightMode {
    CodeLens,
    Link,
    Hidden(String),
}

impl CommandHighlightMode {
    pub fn shows_code_lenses(&self) -> bool {
        matches!(self, CommandHighlightMode::CodeLens)
    }

    pub fn shows_links(&self) -> bool {
        matches!(self, CommandHighlightMode::Link)
    }
}

impl From<String> for CommandHighlightMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "codelens" => CommandHighlightMode::CodeLens,
            "link" => CommandHighlightMode::Link,
            _ => CommandHighlightMode::Hidden(value),
        }
    }
}

impl From<&str> for CommandHighlightMode {
    fn from(value: &str) -> Self {
        CommandHighlightMode::from(value.to_string())
    }
}

impl fmt::Display for CommandHighlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandHighlightMode::CodeLens => f.write_str("codelens"),
            CommandHighlightMode::Link => f.write_str("link"),
            CommandHighlightMode::Hidden(raw) => f.write_str(raw),
        }
    }
}

/// Layers configuration sources over the embedded defaults. Later layers win.
#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            builder: Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml)),
        }
    }

    /// Layer a user TOML file. A missing file fails the build.
    pub fn with_file(self, path: impl AsRef<Path>) -> Self {
        let file = File::from(path.as_ref()).format(FileFormat::Toml).required(true);
        Self {
            builder: self.builder.add_source(file),
        }
    }

    /// Override `editor.command_highlight_mode` with a raw mode name.
    pub fn with_highlight_mode(self, mode: &str) -> Result<Self, ConfigError> {
        self.set_override(HIGHLIGHT_MODE_KEY, mode)
    }

    pub fn set_override<I>(self, key: &str, value: I) -> Result<Self, ConfigError>
    where
        I: Into<ValueKind>,
    {
        Ok(Self {
            builder: self.builder.set_override(key, value)?,
        })
    }

    pub fn build(self) -> Result<AlloyConfig, ConfigError> {
        self.builder.build()?.try_deserialize()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
