//! Per-session state shared by the command router, the lens gate and the panel bridge.

use std::sync::{Arc, RwLock};

use alloy_config::{CommandHighlightMode, EditorConfig};

use crate::features::lenses::LensCache;
use crate::features::panel::{InstanceTracker, PanelBridge};
use crate::host::{EditorHost, TextDocument};
use crate::rpc::Connection;
use crate::supervisor::StandaloneEditor;

/// Editor-facing settings, readable at any time and updated in place.
#[derive(Debug)]
pub struct Settings {
    language_id: String,
    highlight_mode: RwLock<CommandHighlightMode>,
}

impl Settings {
    pub fn new(language_id: impl Into<String>, highlight_mode: CommandHighlightMode) -> Self {
        Self {
            language_id: language_id.into(),
            highlight_mode: RwLock::new(highlight_mode),
        }
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        Self::new(
            config.language_id.clone(),
            config.command_highlight_mode.clone(),
        )
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn highlight_mode(&self) -> CommandHighlightMode {
        match self.highlight_mode.read() {
            Ok(mode) => mode.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_highlight_mode(&self, mode: CommandHighlightMode) {
        match self.highlight_mode.write() {
            Ok(mut current) => *current = mode,
            Err(poisoned) => *poisoned.into_inner() = mode,
        }
    }

    /// Saved documents in the Alloy language.
    pub fn is_supported(&self, document: &TextDocument) -> bool {
        !document.is_untitled && document.language_id == self.language_id
    }

    /// Documents synchronized with the server: Alloy files on disk.
    pub fn is_synchronized(&self, document: &TextDocument) -> bool {
        document.uri.scheme() == "file" && document.language_id == self.language_id
    }
}

/// Everything an activated session owns apart from the process and the socket.
pub struct SessionContext<H, S = Connection> {
    pub(crate) host: Arc<H>,
    pub(crate) server: Arc<S>,
    pub(crate) editor: Arc<dyn StandaloneEditor>,
    pub(crate) settings: Settings,
    pub(crate) lenses: LensCache,
    pub(crate) instances: InstanceTracker,
    pub(crate) panel: PanelBridge,
}

impl<H, S> SessionContext<H, S>
where
    H: EditorHost,
{
    pub fn new(
        host: Arc<H>,
        server: Arc<S>,
        editor: Arc<dyn StandaloneEditor>,
        settings: Settings,
        panel: PanelBridge,
    ) -> Self {
        Self {
            host,
            server,
            editor,
            settings,
            lenses: LensCache::default(),
            instances: InstanceTracker::default(),
            panel,
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn lenses(&self) -> &LensCache {
        &self.lenses
    }

    pub fn instances(&self) -> &InstanceTracker {
        &self.instances
    }

    pub fn panel(&self) -> &PanelBridge {
        &self.panel
    }
}
