//! Activation and deactivation of one bridge session.
//!
//! Activation binds the loopback listener, launches the server pointed at it, accepts
//! its connection and performs the LSP handshake. From then on a dispatcher task feeds
//! server notifications to the session context in arrival order. Deactivation undoes
//! all of it exactly once, since it consumes the session.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_config::{AlloyConfig, CommandHighlightMode};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tower_lsp::lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Exit,
    Initialized, LogMessage, Notification, ShowMessage,
};
use tower_lsp::lsp_types::request::{Initialize, Shutdown};
use tower_lsp::lsp_types::{
    ClientCapabilities, ClientInfo, CodeLens, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    DocumentLink, DocumentLinkClientCapabilities, InitializeParams, InitializedParams, LogMessageParams, MessageType,
    ServerCapabilities, ShowMessageParams, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentSyncClientCapabilities, Url, VersionedTextDocumentIdentifier,
    WindowClientCapabilities,
};
use tracing::{debug, error, info, warn};

use crate::context::{SessionContext, Settings};
use crate::features::commands::CommandError;
use crate::features::panel::{PanelBridge, PANEL_HTML};
use crate::host::{EditorHost, TextDocument};
use crate::protocol::{AlloyServer, CommandsListResult, ShowExecutionOutput};
use crate::rpc::{Connection, ConnectionTasks, RpcError, ServerNotification};
use crate::supervisor::{JarCommand, Launcher, ServerProcess, StandaloneEditor, SupervisorError, Termination};
use crate::transport::{choose_port, ClientOwnedTcp, TransportError};

const CLIENT_NAME: &str = "alloy-bridge";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read the panel document {path}: {source}")]
    PanelDocument {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Launch(#[from] SupervisorError),
    #[error("the language server did not answer `initialize` within {0:?}")]
    InitializeTimeout(Duration),
    #[error("`initialize` failed: {0}")]
    Initialize(#[source] RpcError),
}

/// One activation of the bridge: the port, the server process, the connection and the
/// shared context.
pub struct Session<H: EditorHost> {
    port: u16,
    context: Arc<SessionContext<H>>,
    connection: Connection,
    tasks: ConnectionTasks,
    dispatcher: JoinHandle<()>,
    process: ServerProcess,
    capabilities: ServerCapabilities,
    shutdown_grace: Duration,
}

impl<H: EditorHost> Session<H> {
    /// Activate against the Alloy distribution named in `config`.
    pub async fn activate(config: &AlloyConfig, host: Arc<H>) -> Result<Self, SessionError> {
        let jar = JarCommand::from_config(&config.server);
        let editor = Arc::new(jar.clone());
        Self::activate_with(config, host, &jar, editor).await
    }

    pub async fn activate_with(
        config: &AlloyConfig,
        host: Arc<H>,
        launcher: &impl Launcher,
        editor: Arc<dyn StandaloneEditor>,
    ) -> Result<Self, SessionError> {
        let html = panel_document(config).await?;
        let accept_timeout = config.server.accept_timeout();
        let shutdown_grace = config.server.shutdown_grace();

        let listener = ClientOwnedTcp::bind(choose_port()).await?;
        let port = listener.port();

        let process = match launcher.launch(port) {
            Ok(process) => process,
            Err(err) => {
                error!("failed to launch the Alloy language server: {err}");
                host.show_error(err.user_message()).await;
                return Err(err.into());
            }
        };

        let stream = match listener.accept(accept_timeout).await {
            Ok(stream) => stream,
            Err(err) => {
                error!("{err}");
                host.show_error(format!("The Alloy language server did not start: {err}"))
                    .await;
                process.terminate(shutdown_grace).await;
                return Err(err.into());
            }
        };
        info!(port, peer = %stream.peer, "language server connected");

        let (connection, notifications, tasks) = Connection::start(stream.reader, stream.writer);
        let capabilities = match initialize(&connection, accept_timeout).await {
            Ok(capabilities) => capabilities,
            Err(err) => {
                error!("{err}");
                host.show_error(format!("The Alloy language server did not start: {err}"))
                    .await;
                tasks.abort();
                process.terminate(shutdown_grace).await;
                return Err(err);
            }
        };

        let context = Arc::new(SessionContext::new(
            host,
            Arc::new(connection.clone()),
            editor,
            Settings::from_config(&config.editor),
            PanelBridge::new(config.panel.title.clone(), html),
        ));
        let dispatcher = tokio::spawn(dispatch_notifications(Arc::clone(&context), notifications));

        Ok(Self {
            port,
            context,
            connection,
            tasks,
            dispatcher,
            process,
            capabilities,
            shutdown_grace,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn context(&self) -> &Arc<SessionContext<H>> {
        &self.context
    }

    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub fn set_highlight_mode(&self, mode: CommandHighlightMode) {
        info!(%mode, "command highlight mode changed");
        self.context.settings().set_highlight_mode(mode);
    }

    pub async fn execute_command(&self, command: &str, arguments: &[Value]) -> Result<(), CommandError> {
        self.context.execute_command(command, arguments).await
    }

    pub async fn code_lenses(&self, uri: &Url) -> Result<Vec<CodeLens>, RpcError> {
        self.context.provide_code_lenses(uri).await
    }

    pub async fn document_links(&self, uri: &Url) -> Result<Vec<DocumentLink>, RpcError> {
        self.context.provide_document_links(uri).await
    }

    /// Open `document` the way an editor does: `didOpen` followed by the first code
    /// lens request, which fills the lens cache used by under-cursor execution.
    pub async fn open_document(&self, document: &TextDocument, text: String) -> Result<Vec<CodeLens>, RpcError> {
        if !self.context.settings().is_synchronized(document) {
            return Ok(Vec::new());
        }
        self.did_open(document, 1, text).await?;
        self.code_lenses(&document.uri).await
    }

    pub async fn did_open(&self, document: &TextDocument, version: i32, text: String) -> Result<(), RpcError> {
        if !self.context.settings().is_synchronized(document) {
            return Ok(());
        }
        self.connection
            .send_notification::<DidOpenTextDocument>(DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: document.uri.clone(),
                    language_id: document.language_id.clone(),
                    version,
                    text,
                },
            })
            .await
    }

    /// Full-document sync: every change carries the whole text.
    pub async fn did_change(&self, document: &TextDocument, version: i32, text: String) -> Result<(), RpcError> {
        if !self.context.settings().is_synchronized(document) {
            return Ok(());
        }
        self.connection
            .send_notification::<DidChangeTextDocument>(DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: document.uri.clone(),
                    version,
                },
                content_changes: vec![TextDocumentContentChangeEvent {
                    range: None,
                    range_length: None,
                    text,
                }],
            })
            .await
    }

    pub async fn did_save(&self, document: &TextDocument, text: Option<String>) -> Result<(), RpcError> {
        if !self.context.settings().is_synchronized(document) {
            return Ok(());
        }
        self.connection
            .send_notification::<DidSaveTextDocument>(DidSaveTextDocumentParams {
                text_document: TextDocumentIdentifier {
                    uri: document.uri.clone(),
                },
                text,
            })
            .await
    }

    pub async fn did_close(&self, document: &TextDocument) -> Result<(), RpcError> {
        if !self.context.settings().is_synchronized(document) {
            return Ok(());
        }
        self.connection
            .send_notification::<DidCloseTextDocument>(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier {
                    uri: document.uri.clone(),
                },
            })
            .await
    }

    /// Shut the server down politely, then make sure the process is gone.
    pub async fn deactivate(self) -> Termination {
        self.dispatcher.abort();

        let handshake = async {
            self.connection.send_request::<Shutdown>(()).await?;
            self.connection.send_notification::<Exit>(()).await
        };
        match timeout(self.shutdown_grace, handshake).await {
            Ok(Ok(())) => debug!("language server acknowledged shutdown"),
            Ok(Err(err)) => debug!("shutdown handshake failed: {err}"),
            Err(_) => warn!(grace = ?self.shutdown_grace, "language server did not acknowledge shutdown"),
        }

        let termination = self.process.terminate(self.shutdown_grace).await;
        self.tasks.abort();
        self.context.panel().shutdown();
        info!(?termination, "session deactivated");
        termination
    }
}

async fn panel_document(config: &AlloyConfig) -> Result<Arc<str>, SessionError> {
    match &config.panel.html {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map(Arc::from)
            .map_err(|source| SessionError::PanelDocument {
                path: path.clone(),
                source,
            }),
        None => Ok(Arc::from(PANEL_HTML)),
    }
}

fn initialize_params() -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        client_info: Some(ClientInfo {
            name: CLIENT_NAME.to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        capabilities: ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(TextDocumentSyncClientCapabilities {
                    did_save: Some(true),
                    ..Default::default()
                }),
                code_lens: Some(Default::default()),
                document_link: Some(DocumentLinkClientCapabilities {
                    dynamic_registration: None,
                    tooltip_support: None,
                }),
                ..Default::default()
            }),
            window: Some(WindowClientCapabilities {
                work_done_progress: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn initialize(connection: &Connection, limit: Duration) -> Result<ServerCapabilities, SessionError> {
    let result = timeout(limit, connection.send_request::<Initialize>(initialize_params()))
        .await
        .map_err(|_| SessionError::InitializeTimeout(limit))?
        .map_err(SessionError::Initialize)?;
    if let Some(server) = &result.server_info {
        info!(name = %server.name, version = ?server.version, "language server initialized");
    }
    connection
        .send_notification::<Initialized>(InitializedParams {})
        .await
        .map_err(SessionError::Initialize)?;
    Ok(result.capabilities)
}

async fn dispatch_notifications<H, S>(
    context: Arc<SessionContext<H, S>>,
    mut notifications: mpsc::UnboundedReceiver<ServerNotification>,
) where
    H: EditorHost,
    S: AlloyServer,
{
    while let Some(notification) = notifications.recv().await {
        context.dispatch(notification).await;
    }
    warn!("connection to the Alloy language server closed");
    context
        .host()
        .show_warning("The Alloy language server connection was closed.".to_string())
        .await;
}

impl<H, S> SessionContext<H, S>
where
    H: EditorHost,
    S: AlloyServer,
{
    /// Route one server notification.
    pub async fn dispatch(self: &Arc<Self>, notification: ServerNotification) {
        let ServerNotification { method, params } = notification;
        match method.as_str() {
            m if m == ShowExecutionOutput::METHOD => self.show_execution_output(params),
            m if m == CommandsListResult::METHOD => {
                // A pending pick must not hold up execution output.
                let context = Arc::clone(self);
                tokio::spawn(async move { context.handle_command_listing(params).await });
            }
            m if m == LogMessage::METHOD => match serde_json::from_value::<LogMessageParams>(params) {
                Ok(log) => log_server_message(log.typ, &log.message),
                Err(err) => debug!("malformed {method}: {err}"),
            },
            m if m == ShowMessage::METHOD => match serde_json::from_value::<ShowMessageParams>(params) {
                Ok(shown) => {
                    log_server_message(shown.typ, &shown.message);
                    if shown.typ == MessageType::ERROR {
                        self.host.show_error(shown.message).await;
                    } else if shown.typ == MessageType::WARNING {
                        self.host.show_warning(shown.message).await;
                    }
                }
                Err(err) => debug!("malformed {method}: {err}"),
            },
            _ => debug!(%method, "ignoring server notification"),
        }
    }
}

fn log_server_message(typ: MessageType, message: &str) {
    if typ == MessageType::ERROR {
        error!(target: "alloy::server", "{message}");
    } else if typ == MessageType::WARNING {
        warn!(target: "alloy::server", "{message}");
    } else if typ == MessageType::INFO {
        info!(target: "alloy::server", "{message}");
    } else {
        debug!(target: "alloy::server", "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::{
        context, lens_command, settle, RecordingHost, RecordingServer,
    };
    use serde_json::json;

    fn notification(method: &str, params: Value) -> ServerNotification {
        ServerNotification {
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn execution_output_reaches_the_panel() {
        let (context, host, _server) = context(RecordingHost::default(), RecordingServer::default());
        let output = json!({"message": "No counterexample found.", "messageType": 0, "bold": false});
        context
            .dispatch(notification("alloy/showExecutionOutput", output.clone()))
            .await;
        assert_eq!(host.panel(0).posted(), vec![output]);
    }

    #[tokio::test]
    async fn command_listing_is_handled_off_the_dispatcher() {
        let host = RecordingHost::default();
        host.answer_picks_with(Some(0));
        let (context, host, _server) = context(host, RecordingServer::default());
        let command = lens_command("file:///m.als", 0);
        context
            .dispatch(notification(
                "alloy/commandsListResult",
                json!({"commands": [{"title": "Run show", "command": command}]}),
            ))
            .await;
        settle(|| !host.executed().is_empty()).await;
        assert_eq!(host.executed(), vec![command]);
    }

    #[tokio::test]
    async fn show_message_errors_and_warnings_reach_the_host() {
        let (context, host, _server) = context(RecordingHost::default(), RecordingServer::default());
        context
            .dispatch(notification("window/showMessage", json!({"type": 1, "message": "boom"})))
            .await;
        context
            .dispatch(notification("window/showMessage", json!({"type": 2, "message": "careful"})))
            .await;
        context
            .dispatch(notification("window/showMessage", json!({"type": 3, "message": "fyi"})))
            .await;
        context
            .dispatch(notification("window/logMessage", json!({"type": 1, "message": "logged only"})))
            .await;
        assert_eq!(host.errors(), vec!["boom".to_string()]);
        assert_eq!(host.warnings(), vec!["careful".to_string()]);
    }

    #[tokio::test]
    async fn unknown_notifications_are_ignored() {
        let (context, host, server) = context(RecordingHost::default(), RecordingServer::default());
        context
            .dispatch(notification("$/progress", json!({"token": 1, "value": {}})))
            .await;
        assert_eq!(host.panel_count(), 0);
        assert!(server.notifications().is_empty());
    }

    #[tokio::test]
    async fn closed_notification_stream_warns_the_host() {
        let (context, host, _server) = context(RecordingHost::default(), RecordingServer::default());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(notification(
            "alloy/showExecutionOutput",
            json!({"message": "last words", "messageType": 0}),
        ))
        .unwrap();
        drop(tx);
        dispatch_notifications(context, rx).await;
        assert_eq!(host.panel(0).posted().len(), 1);
        assert_eq!(host.warnings().len(), 1);
    }

    #[test]
    fn initialize_params_identify_the_client() {
        let params = initialize_params();
        assert_eq!(params.process_id, Some(std::process::id()));
        assert_eq!(params.client_info.unwrap().name, CLIENT_NAME);
        let text_document = params.capabilities.text_document.unwrap();
        assert!(text_document.code_lens.is_some());
        assert!(text_document.document_link.is_some());
    }
}
