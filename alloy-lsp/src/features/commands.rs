//! Editor commands contributed by the bridge.
//!
//! Every command either turns into one Alloy notification, is answered locally from the
//! lens cache, or talks to the host. Commands that need an Alloy document do nothing
//! unless the active editor holds a saved Alloy file.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::SessionContext;
use crate::host::{ActiveEditor, EditorHost};
use crate::protocol::{AlloyServer, ExecuteParams, Outbound};

/// Issued by code lenses, document links and listed commands.
pub const COMMAND_EXECUTE: &str = "ExecuteAlloyCommand";
pub const COMMAND_EXECUTE_ALL: &str = "alloy.executeAllCommands";
pub const COMMAND_LIST: &str = "alloy.listCommands";
pub const COMMAND_EXECUTE_UNDER_CURSOR: &str = "alloy.executeCommandUnderCursor";
pub const COMMAND_OPEN_EDITOR: &str = "alloy.openAlloyEditor";
pub const COMMAND_OPEN_LATEST_INSTANCE: &str = "alloy.openLatestInstance";

/// Every command id a host should register.
pub const COMMANDS: [&str; 6] = [
    COMMAND_EXECUTE,
    COMMAND_EXECUTE_ALL,
    COMMAND_LIST,
    COMMAND_EXECUTE_UNDER_CURSOR,
    COMMAND_OPEN_EDITOR,
    COMMAND_OPEN_LATEST_INSTANCE,
];

pub const NO_COMMAND_UNDER_CURSOR: &str = "No Alloy command found under the cursor";
pub const NO_INSTANCES_YET: &str = "No Alloy instances generated yet!";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("invalid arguments for `{command}`: {reason}")]
    InvalidArguments { command: String, reason: String },
}

impl<H, S> SessionContext<H, S>
where
    H: EditorHost,
    S: AlloyServer,
{
    pub async fn execute_command(&self, command: &str, arguments: &[Value]) -> Result<(), CommandError> {
        debug!(command, ?arguments, "executing command");
        match command {
            COMMAND_EXECUTE => {
                let params = parse_execute_arguments(arguments)?;
                self.send(Outbound::Execute(params)).await;
            }
            COMMAND_EXECUTE_ALL => {
                if let Some(editor) = self.alloy_editor(command) {
                    self.send(Outbound::Execute(ExecuteParams::all(&editor.document.uri)))
                        .await;
                }
            }
            COMMAND_LIST => {
                if let Some(editor) = self.alloy_editor(command) {
                    self.send(Outbound::ListCommands(editor.document.uri.to_string()))
                        .await;
                }
            }
            COMMAND_EXECUTE_UNDER_CURSOR => {
                if let Some(editor) = self.alloy_editor(command) {
                    self.execute_under_cursor(editor).await;
                }
            }
            COMMAND_OPEN_EDITOR => self.open_standalone_editor().await,
            COMMAND_OPEN_LATEST_INSTANCE => match self.instances.latest() {
                Some(link) => self.send(Outbound::OpenModel(link)).await,
                None => self.host.show_warning(NO_INSTANCES_YET.to_string()).await,
            },
            _ => return Err(CommandError::Unknown(command.to_string())),
        }
        Ok(())
    }

    async fn execute_under_cursor(&self, editor: ActiveEditor) {
        let lens = self
            .lenses
            .find_at(&editor.document.uri, editor.cursor)
            .await;
        match lens.and_then(|lens| lens.command) {
            Some(command) => self.host.execute_command(command).await,
            None => {
                self.host
                    .show_warning(NO_COMMAND_UNDER_CURSOR.to_string())
                    .await
            }
        }
    }

    async fn open_standalone_editor(&self) {
        let file = self
            .host
            .active_editor()
            .filter(|editor| self.settings.is_supported(&editor.document))
            .and_then(|editor| editor.document.file_path());
        if let Err(err) = self.editor.open(file.as_deref()) {
            warn!("failed to open the Alloy editor: {err}");
            self.host.show_error(err.user_message()).await;
        }
    }

    /// The active editor, if it holds a saved Alloy document.
    fn alloy_editor(&self, command: &str) -> Option<ActiveEditor> {
        let editor = self.host.active_editor();
        match editor {
            Some(editor) if self.settings.is_supported(&editor.document) => Some(editor),
            Some(editor) => {
                debug!(command, uri = %editor.document.uri, "active document is not a saved Alloy file");
                None
            }
            None => {
                debug!(command, "no active editor");
                None
            }
        }
    }

    async fn send(&self, notification: Outbound) {
        if let Err(err) = self.server.notify(notification).await {
            warn!("failed to notify the Alloy language server: {err}");
            self.host
                .show_warning(format!("The Alloy language server is not reachable: {err}"))
                .await;
        }
    }
}

fn parse_execute_arguments(arguments: &[Value]) -> Result<ExecuteParams, CommandError> {
    serde_json::from_value(Value::Array(arguments.to_vec())).map_err(|err| {
        CommandError::InvalidArguments {
            command: COMMAND_EXECUTE.to_string(),
            reason: err.to_string(),
        }
    })
}
