//! Alloy-specific notifications layered on top of LSP.

use serde::{Deserialize, Serialize};
use tower_lsp::async_trait;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::request::{CodeLensRequest, DocumentLinkRequest};
use tower_lsp::lsp_types::{
    CodeLens, CodeLensParams, Command, DocumentLink, DocumentLinkParams, TextDocumentIdentifier,
    Url,
};

use crate::rpc::{Connection, RpcError};

/// Command index meaning "every command in the document".
pub const ALL_COMMANDS: i64 = -1;

/// Run one command (or all of them) from a document.
pub enum ExecuteAlloyCommand {}

impl Notification for ExecuteAlloyCommand {
    type Params = ExecuteParams;
    const METHOD: &'static str = "ExecuteAlloyCommand";
}

/// Positional payload `[documentUri, commandIndex, line, character]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteParams(pub String, pub i64, pub u32, pub u32);

impl ExecuteParams {
    pub fn all(uri: &Url) -> Self {
        ExecuteParams(uri.to_string(), ALL_COMMANDS, 0, 0)
    }

    pub fn single(uri: impl Into<String>, index: i64, line: u32, character: u32) -> Self {
        ExecuteParams(uri.into(), index, line, character)
    }

    pub fn uri(&self) -> &str {
        &self.0
    }

    pub fn index(&self) -> i64 {
        self.1
    }
}

/// Ask the server to enumerate the runnable commands of a document.
pub enum ListAlloyCommands {}

impl Notification for ListAlloyCommands {
    type Params = String;
    const METHOD: &'static str = "ListAlloyCommands";
}

/// Open a model instance in the Alloy visualizer.
pub enum OpenModel {}

impl Notification for OpenModel {
    type Params = String;
    const METHOD: &'static str = "OpenModel";
}

/// Abort the running execution. Sent without params.
pub enum StopExecution {}

impl Notification for StopExecution {
    type Params = ();
    const METHOD: &'static str = "StopExecution";
}

pub enum ShowExecutionOutput {}

impl Notification for ShowExecutionOutput {
    type Params = ExecutionOutput;
    const METHOD: &'static str = "alloy/showExecutionOutput";
}

/// One chunk of execution output destined for the result panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub message: String,
    pub message_type: i64,
    #[serde(default)]
    pub bold: bool,
}

pub enum CommandsListResult {}

impl Notification for CommandsListResult {
    type Params = CommandListing;
    const METHOD: &'static str = "alloy/commandsListResult";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandListing {
    pub commands: Vec<ListedCommand>,
}

/// A runnable command as advertised by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedCommand {
    pub title: String,
    pub command: Command,
}

/// Notifications the bridge sends to the Alloy server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Execute(ExecuteParams),
    ListCommands(String),
    OpenModel(String),
    StopExecution,
}

/// What the bridge needs from the language server.
#[async_trait]
pub trait AlloyServer: Send + Sync + 'static {
    async fn notify(&self, notification: Outbound) -> Result<(), RpcError>;
    async fn code_lenses(&self, uri: &Url) -> Result<Vec<CodeLens>, RpcError>;
    async fn document_links(&self, uri: &Url) -> Result<Vec<DocumentLink>, RpcError>;
}

#[async_trait]
impl AlloyServer for Connection {
    async fn notify(&self, notification: Outbound) -> Result<(), RpcError> {
        match notification {
            Outbound::Execute(params) => self.send_notification::<ExecuteAlloyCommand>(params).await,
            Outbound::ListCommands(uri) => self.send_notification::<ListAlloyCommands>(uri).await,
            Outbound::OpenModel(link) => self.send_notification::<OpenModel>(link).await,
            Outbound::StopExecution => self.send_notification::<StopExecution>(()).await,
        }
    }

    async fn code_lenses(&self, uri: &Url) -> Result<Vec<CodeLens>, RpcError> {
        let lenses = self
            .send_request::<CodeLensRequest>(CodeLensParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
            })
            .await?;
        Ok(lenses.unwrap_or_default())
    }

    async fn document_links(&self, uri: &Url) -> Result<Vec<DocumentLink>, RpcError> {
        let links = self
            .send_request::<DocumentLinkRequest>(DocumentLinkParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
            })
            .await?;
        Ok(links.unwrap_or_default())
    }
}
