//! Editor bridge for the Alloy language server
//!
//!     This crate connects an editor to the Alloy analyzer. The analyzer runs as a separate
//!     JVM process that speaks the Language Server Protocol; the bridge starts it, talks to
//!     it and turns its custom notifications into editor behaviour: command execution,
//!     command listing, a result panel and model instance links.
//!
//! Design Decision: client-owned socket
//!
//!     The Alloy server does not speak LSP over stdio. It is started as
//!     `<runtime> -jar <archive> ls <port>` and connects back to a port the client already
//!     listens on. Binding happens before the launch, so the process never races the
//!     listener, and the listener is dropped once the single connection is accepted.
//!
//!     tower-lsp is used for the LSP vocabulary (lsp-types, the jsonrpc error and id types)
//!     but not for the client itself: tower-lsp only implements servers, so the client side
//!     framing lives in [`rpc`].
//!
//! Architecture
//!
//!     Transport Layer:
//!         - [`transport`]: random ephemeral port, loopback listener, bounded accept
//!         - [`supervisor`]: process launch, output forwarding, graceful then forced exit
//!         - [`rpc`]: Content-Length framing, request/response matching, server requests
//!
//!     Session Layer:
//!         - [`session`]: activation, LSP handshake, document sync, deactivation
//!         - [`context`]: per-session state shared by the features
//!         - [`host`]: what the bridge needs from the editor
//!
//!     Feature Layer:
//!         - [`features::commands`]: editor commands to Alloy notifications
//!         - [`features::lenses`]: code lens cache and the lens/link highlight gate
//!         - [`features::panel`]: the result panel and instance tracking
//!
//!     Features are written against [`host::EditorHost`] and [`protocol::AlloyServer`], so
//!     their tests run against recorders instead of a JVM.
//!
//! Custom Protocol
//!
//!     Client to server: `ExecuteAlloyCommand`, `ListAlloyCommands`, `OpenModel`,
//!     `StopExecution`. Server to client: `alloy/showExecutionOutput`,
//!     `alloy/commandsListResult`. See [`protocol`].
//!
//! Usage
//!
//!     ```rust
//!     use std::sync::Arc;
//!     use alloy_lsp::Session;
//!
//!     async fn run<H: alloy_lsp::EditorHost>(host: Arc<H>) -> anyhow::Result<()> {
//!         let config = alloy_config::Loader::new().build()?;
//!         let session = Session::activate(&config, host).await?;
//!         session.execute_command("alloy.executeAllCommands", &[]).await?;
//!         session.deactivate().await;
//!         Ok(())
//!     }
//!     ```

pub mod context;
pub mod features;
pub mod host;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use context::{SessionContext, Settings};
pub use features::commands::{CommandError, COMMANDS};
pub use host::{ActiveEditor, CreatedPanel, EditorHost, PanelEvent, PanelView, QuickPickItem, TextDocument};
pub use protocol::{AlloyServer, Outbound};
pub use rpc::{Connection, RpcError};
pub use session::{Session, SessionError};
pub use supervisor::{JarCommand, Launcher, ServerProcess, StandaloneEditor, SupervisorError, Termination};
pub use transport::TransportError;
