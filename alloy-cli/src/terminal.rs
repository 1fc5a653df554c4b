//! The terminal playing the editor: one active document, a printed result panel and
//! quick picks answered by number.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_lsp::protocol::ExecutionOutput;
use alloy_lsp::{ActiveEditor, CreatedPanel, EditorHost, PanelEvent, PanelView, QuickPickItem};
use crossterm::style::Stylize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tower_lsp::async_trait;
use tower_lsp::lsp_types::{Command, Position};

struct PendingPick {
    items: Vec<QuickPickItem>,
    answer: oneshot::Sender<Option<QuickPickItem>>,
}

pub struct TerminalHost {
    active: Mutex<Option<ActiveEditor>>,
    pending_pick: Mutex<Option<PendingPick>>,
    commands: mpsc::UnboundedSender<Command>,
    panel_events: Mutex<Option<mpsc::UnboundedSender<PanelEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TerminalHost {
    /// Commands the bridge asks the editor to run arrive on the returned receiver.
    pub fn new(active: Option<ActiveEditor>) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let host = Self {
            active: Mutex::new(active),
            pending_pick: Mutex::new(None),
            commands,
            panel_events: Mutex::new(None),
        };
        (host, receiver)
    }

    pub fn move_cursor(&self, cursor: Position) -> bool {
        match lock(&self.active).as_mut() {
            Some(editor) => {
                editor.cursor = cursor;
                true
            }
            None => false,
        }
    }

    /// Send `message` as if the panel had posted it. False when no panel is open.
    pub fn post_from_panel(&self, message: Value) -> bool {
        match lock(&self.panel_events).as_ref() {
            Some(events) => events.send(PanelEvent::Message(message)).is_ok(),
            None => false,
        }
    }

    /// The active editor, or a hint on stderr when no document is open.
    pub fn active_editor_or_hint(&self) -> Option<ActiveEditor> {
        let editor = self.active_editor();
        if editor.is_none() {
            eprintln!("no document is open");
        }
        editor
    }

    pub fn has_pending_pick(&self) -> bool {
        lock(&self.pending_pick).is_some()
    }

    /// Answer the pending quick pick with the 1-based `choice`, or dismiss it with `None`.
    pub fn answer_pick(&self, choice: Option<usize>) -> bool {
        let Some(pending) = lock(&self.pending_pick).take() else {
            return false;
        };
        let item = choice
            .and_then(|choice| choice.checked_sub(1))
            .and_then(|index| pending.items.into_iter().nth(index));
        // The picker may have gone away with its session.
        let _ = pending.answer.send(item);
        true
    }
}

#[async_trait]
impl EditorHost for TerminalHost {
    fn active_editor(&self) -> Option<ActiveEditor> {
        lock(&self.active).clone()
    }

    async fn show_warning(&self, message: String) {
        eprintln!("{} {message}", "warning:".yellow().bold());
    }

    async fn show_error(&self, message: String) {
        eprintln!("{} {message}", "error:".red().bold());
    }

    async fn pick(&self, items: Vec<QuickPickItem>, placeholder: &str) -> Option<QuickPickItem> {
        if items.is_empty() {
            println!("{placeholder}: nothing to choose from");
            return None;
        }
        println!("{}", placeholder.bold());
        for (number, item) in items.iter().enumerate() {
            println!("  {}. {}", number + 1, item.label);
        }
        println!("Type a number, or anything else to dismiss.");

        let (answer, choice) = oneshot::channel();
        *lock(&self.pending_pick) = Some(PendingPick { items, answer });
        choice.await.ok().flatten()
    }

    async fn execute_command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("command loop has stopped");
        }
    }

    fn create_panel(&self, title: &str, _html: &str) -> CreatedPanel {
        let (events, receiver) = mpsc::unbounded_channel();
        *lock(&self.panel_events) = Some(events);
        CreatedPanel {
            view: Arc::new(TerminalPanel::new(title)),
            events: receiver,
        }
    }
}

/// Prints execution output as it arrives.
pub struct TerminalPanel {
    title: String,
    revealed: AtomicBool,
}

impl TerminalPanel {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            revealed: AtomicBool::new(false),
        }
    }
}

impl PanelView for TerminalPanel {
    fn post_message(&self, message: Value) -> bool {
        let Ok(output) = serde_json::from_value::<ExecutionOutput>(message) else {
            return false;
        };
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", render_output(&output)).is_ok()
    }

    fn is_visible(&self) -> bool {
        self.revealed.load(Ordering::Relaxed)
    }

    fn reveal(&self) {
        if !self.revealed.swap(true, Ordering::Relaxed) {
            println!("{}", format!("── {} ──", self.title).bold());
        }
    }
}

/// Errors in red, warnings in yellow, bold when asked.
pub fn render_output(output: &ExecutionOutput) -> String {
    let styled = match output.message_type {
        1 => output.message.clone().red(),
        2 => output.message.clone().yellow(),
        _ => output.message.clone().stylize(),
    };
    if output.bold {
        styled.bold().to_string()
    } else {
        styled.to_string()
    }
}
