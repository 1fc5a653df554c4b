//! The editor seen from the bridge.
//!
//! Everything the bridge needs from the surrounding editor goes through [`EditorHost`]:
//! the active editor, notifications, the quick pick, command invocation and panel
//! creation. Front ends implement it once; tests implement it with recorders.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tower_lsp::async_trait;
use tower_lsp::lsp_types::{Command, Position, Url};

/// A document as the editor knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub uri: Url,
    pub language_id: String,
    /// Unsaved buffers have no file behind them.
    pub is_untitled: bool,
}

impl TextDocument {
    pub fn file(uri: Url, language_id: impl Into<String>) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
            is_untitled: false,
        }
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.uri.to_file_path().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEditor {
    pub document: TextDocument,
    pub cursor: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuickPickItem {
    pub label: String,
    pub command: Command,
}

/// Events raised by a panel towards the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// A message posted by the panel's script.
    Message(Value),
    /// The user closed the panel.
    Disposed,
}

/// A live result panel.
pub trait PanelView: Send + Sync + 'static {
    /// Post a message to the panel's script. Returns false if it was not delivered.
    fn post_message(&self, message: Value) -> bool;
    fn is_visible(&self) -> bool;
    fn reveal(&self);
}

/// A freshly created panel and the stream of its events.
pub struct CreatedPanel {
    pub view: Arc<dyn PanelView>,
    pub events: mpsc::UnboundedReceiver<PanelEvent>,
}

#[async_trait]
pub trait EditorHost: Send + Sync + 'static {
    fn active_editor(&self) -> Option<ActiveEditor>;

    async fn show_warning(&self, message: String);

    async fn show_error(&self, message: String);

    /// Let the user choose one item. `None` when the pick is dismissed.
    async fn pick(&self, items: Vec<QuickPickItem>, placeholder: &str) -> Option<QuickPickItem>;

    /// Run a command through the editor's command mechanism.
    async fn execute_command(&self, command: Command);

    fn create_panel(&self, title: &str, html: &str) -> CreatedPanel;
}
