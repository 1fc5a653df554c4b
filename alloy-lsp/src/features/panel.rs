//! Result panel bridge.
//!
//! At most one panel exists per session. It is created the first time output needs to
//! be shown, revealed in place while it exists, and forgotten when the user closes it.
//! Execution output flows from the server into the panel verbatim; messages posted by
//! the panel flow back as notifications and update the latest instance link.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::SessionContext;
use crate::host::{EditorHost, PanelEvent, PanelView, QuickPickItem};
use crate::protocol::{AlloyServer, CommandListing, ExecutionOutput, Outbound};

/// Document loaded into every new panel unless configured otherwise.
pub const PANEL_HTML: &str = include_str!("../../assets/panel.html");

pub const PICK_PLACEHOLDER: &str = "Select a command to execute";

/// Most recent model instance surfaced by the server or the panel. Last write wins.
#[derive(Debug, Default)]
pub struct InstanceTracker {
    latest: Mutex<Option<String>>,
}

impl InstanceTracker {
    pub fn record(&self, link: impl Into<String>) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(link.into());
    }

    pub fn latest(&self) -> Option<String> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Messages posted by the panel's script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelMessage {
    Model { link: String },
    InstanceCreated { link: String },
    Stop,
}

impl PanelMessage {
    /// Parse `{method, data}`. Unknown methods and missing links yield `None`.
    pub fn parse(message: &Value) -> Option<Self> {
        let link = || {
            message
                .get("data")
                .and_then(|data| data.get("link"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match message.get("method").and_then(Value::as_str)? {
            "model" => link().map(|link| PanelMessage::Model { link }),
            "instanceCreated" => link().map(|link| PanelMessage::InstanceCreated { link }),
            "stop" => Some(PanelMessage::Stop),
            _ => None,
        }
    }
}

enum PanelState {
    Absent,
    Open {
        generation: u64,
        view: Arc<dyn PanelView>,
        relay: JoinHandle<()>,
    },
}

pub struct PanelBridge {
    title: String,
    html: Arc<str>,
    state: Mutex<PanelState>,
    generations: AtomicU64,
}

impl PanelBridge {
    pub fn new(title: impl Into<String>, html: impl Into<Arc<str>>) -> Self {
        Self {
            title: title.into(),
            html: html.into(),
            state: Mutex::new(PanelState::Absent),
            generations: AtomicU64::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock_state(), PanelState::Open { .. })
    }

    /// Forget the panel if it is still the one identified by `generation`.
    fn release(&self, generation: u64) -> bool {
        let mut state = self.lock_state();
        match &*state {
            PanelState::Open { generation: current, .. } if *current == generation => {
                *state = PanelState::Absent;
                true
            }
            _ => false,
        }
    }

    /// Stop relaying panel events. Used when the session ends.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), PanelState::Absent);
        if let PanelState::Open { relay, .. } = previous {
            relay.abort();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PanelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H, S> SessionContext<H, S>
where
    H: EditorHost,
    S: AlloyServer,
{
    /// Return the current panel, creating it if needed.
    pub fn ensure_panel(self: &Arc<Self>) -> Arc<dyn PanelView> {
        let mut state = self.panel.lock_state();
        if let PanelState::Open { view, .. } = &*state {
            if !view.is_visible() {
                view.reveal();
            }
            return Arc::clone(view);
        }

        let created = self.host.create_panel(&self.panel.title, &self.panel.html);
        let generation = self.panel.generations.fetch_add(1, Ordering::Relaxed);
        let relay = tokio::spawn(relay_panel_events(
            Arc::clone(self),
            generation,
            created.events,
        ));
        created.view.reveal();
        debug!(generation, "result panel created");
        *state = PanelState::Open {
            generation,
            view: Arc::clone(&created.view),
            relay,
        };
        created.view
    }

    /// Forward an `alloy/showExecutionOutput` payload to the panel unchanged.
    pub fn show_execution_output(self: &Arc<Self>, output: Value) {
        if let Ok(parsed) = serde_json::from_value::<ExecutionOutput>(output.clone()) {
            debug!(message_type = parsed.message_type, bold = parsed.bold, "{}", parsed.message);
        }
        let view = self.ensure_panel();
        if !view.post_message(output) {
            warn!("result panel did not accept execution output");
        }
    }

    pub async fn handle_panel_message(&self, message: Value) {
        match PanelMessage::parse(&message) {
            Some(PanelMessage::Model { link }) => {
                self.instances.record(link.clone());
                if let Err(err) = self.server.notify(Outbound::OpenModel(link)).await {
                    warn!("failed to open model: {err}");
                }
            }
            Some(PanelMessage::InstanceCreated { link }) => {
                debug!(%link, "instance created");
                self.instances.record(link);
            }
            Some(PanelMessage::Stop) => {
                if let Err(err) = self.server.notify(Outbound::StopExecution).await {
                    warn!("failed to stop execution: {err}");
                }
            }
            None => debug!(%message, "ignoring panel message"),
        }
    }

    /// Offer the listed commands in a quick pick and run the chosen one.
    pub async fn handle_command_listing(&self, params: Value) {
        let listing: CommandListing = match serde_json::from_value(params) {
            Ok(listing) => listing,
            Err(err) => {
                warn!("malformed command listing: {err}");
                return;
            }
        };
        debug!(count = listing.commands.len(), "received command listing");
        let items = listing
            .commands
            .into_iter()
            .map(|entry| QuickPickItem {
                label: entry.title,
                command: entry.command,
            })
            .collect();
        if let Some(item) = self.host.pick(items, PICK_PLACEHOLDER).await {
            self.host.execute_command(item.command).await;
        }
    }
}

async fn relay_panel_events<H, S>(
    context: Arc<SessionContext<H, S>>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<PanelEvent>,
) where
    H: EditorHost,
    S: AlloyServer,
{
    while let Some(event) = events.recv().await {
        match event {
            PanelEvent::Message(message) => context.handle_panel_message(message).await,
            PanelEvent::Disposed => break,
        }
    }
    if context.panel.release(generation) {
        debug!(generation, "result panel closed");
    }
}
