use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_config::CommandHighlightMode;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_lsp::async_trait;
use tower_lsp::lsp_types::{CodeLens, Command, DocumentLink, Position, Range, Url};

use crate::context::{SessionContext, Settings};
use crate::features::panel::{PanelBridge, PANEL_HTML};
use crate::host::{ActiveEditor, CreatedPanel, EditorHost, PanelEvent, PanelView, QuickPickItem, TextDocument};
use crate::protocol::{AlloyServer, Outbound};
use crate::rpc::RpcError;
use crate::supervisor::{StandaloneEditor, SupervisorError};

pub(crate) type TestContext = SessionContext<RecordingHost, RecordingServer>;

pub(crate) struct Fixture {
    pub context: Arc<TestContext>,
    pub host: Arc<RecordingHost>,
    pub server: Arc<RecordingServer>,
    pub editor: Arc<RecordingEditor>,
}

pub(crate) fn fixture_with_mode(
    host: RecordingHost,
    server: RecordingServer,
    mode: CommandHighlightMode,
) -> Fixture {
    let host = Arc::new(host);
    let server = Arc::new(server);
    let editor = Arc::new(RecordingEditor::default());
    let context = Arc::new(SessionContext::new(
        host.clone(),
        server.clone(),
        editor.clone(),
        Settings::new("alloy", mode),
        PanelBridge::new("Alloy", PANEL_HTML),
    ));
    Fixture {
        context,
        host,
        server,
        editor,
    }
}

pub(crate) fn fixture(host: RecordingHost, server: RecordingServer) -> Fixture {
    fixture_with_mode(host, server, CommandHighlightMode::CodeLens)
}

pub(crate) fn context(
    host: RecordingHost,
    server: RecordingServer,
) -> (Arc<TestContext>, Arc<RecordingHost>, Arc<RecordingServer>) {
    context_with_mode(host, server, CommandHighlightMode::CodeLens)
}

pub(crate) fn context_with_mode(
    host: RecordingHost,
    server: RecordingServer,
    mode: CommandHighlightMode,
) -> (Arc<TestContext>, Arc<RecordingHost>, Arc<RecordingServer>) {
    let f = fixture_with_mode(host, server, mode);
    (f.context, f.host, f.server)
}

/// Poll `condition` until it holds, yielding to spawned tasks in between.
pub(crate) async fn settle(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub(crate) fn lens_command(uri: &str, index: i64) -> Command {
    Command {
        title: format!("Execute command {index}"),
        command: "ExecuteAlloyCommand".into(),
        arguments: Some(vec![json!(uri), json!(index), json!(0), json!(0)]),
    }
}

fn range(start: (u32, u32), end: (u32, u32)) -> Range {
    Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1))
}

pub(crate) fn code_lens(uri: &str, index: i64, start: (u32, u32), end: (u32, u32)) -> CodeLens {
    CodeLens {
        range: range(start, end),
        command: Some(lens_command(uri, index)),
        data: None,
    }
}

pub(crate) fn document_link(uri: &str, index: i64, start: (u32, u32), end: (u32, u32)) -> DocumentLink {
    DocumentLink {
        range: range(start, end),
        target: Url::parse(&format!("command:ExecuteAlloyCommand?[\"{uri}\",{index},0,0]")).ok(),
        tooltip: None,
        data: None,
    }
}

pub(crate) fn alloy_editor(uri: &str, line: u32, character: u32) -> ActiveEditor {
    ActiveEditor {
        document: TextDocument::file(Url::parse(uri).unwrap(), "alloy"),
        cursor: Position::new(line, character),
    }
}

#[derive(Default)]
pub(crate) struct RecordingHost {
    active: Mutex<Option<ActiveEditor>>,
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    pick_answer: Mutex<Option<usize>>,
    offered: Mutex<Vec<(Vec<String>, String)>>,
    executed: Mutex<Vec<Command>>,
    panels: Mutex<Vec<(Arc<RecordingPanel>, mpsc::UnboundedSender<PanelEvent>)>>,
}

impl RecordingHost {
    pub fn set_active_editor(&self, editor: Option<ActiveEditor>) {
        *self.active.lock().unwrap() = editor;
    }

    pub fn answer_picks_with(&self, index: Option<usize>) {
        *self.pick_answer.lock().unwrap() = index;
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn offered_picks(&self) -> Vec<(Vec<String>, String)> {
        self.offered.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<Command> {
        self.executed.lock().unwrap().clone()
    }

    pub fn panel_count(&self) -> usize {
        self.panels.lock().unwrap().len()
    }

    pub fn panel(&self, index: usize) -> Arc<RecordingPanel> {
        self.panels.lock().unwrap()[index].0.clone()
    }

    pub fn post_from_panel(&self, index: usize, message: Value) {
        let panels = self.panels.lock().unwrap();
        panels[index].1.send(PanelEvent::Message(message)).unwrap();
    }

    pub fn dispose_panel(&self, index: usize) {
        let panels = self.panels.lock().unwrap();
        panels[index].1.send(PanelEvent::Disposed).unwrap();
    }
}

#[async_trait]
impl EditorHost for RecordingHost {
    fn active_editor(&self) -> Option<ActiveEditor> {
        self.active.lock().unwrap().clone()
    }

    async fn show_warning(&self, message: String) {
        self.warnings.lock().unwrap().push(message);
    }

    async fn show_error(&self, message: String) {
        self.errors.lock().unwrap().push(message);
    }

    async fn pick(&self, items: Vec<QuickPickItem>, placeholder: &str) -> Option<QuickPickItem> {
        let labels = items.iter().map(|item| item.label.clone()).collect();
        self.offered
            .lock()
            .unwrap()
            .push((labels, placeholder.to_string()));
        let answer = *self.pick_answer.lock().unwrap();
        answer.and_then(|index| items.into_iter().nth(index))
    }

    async fn execute_command(&self, command: Command) {
        self.executed.lock().unwrap().push(command);
    }

    fn create_panel(&self, _title: &str, html: &str) -> CreatedPanel {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let panel = Arc::new(RecordingPanel {
            html: html.to_string(),
            ..RecordingPanel::default()
        });
        self.panels
            .lock()
            .unwrap()
            .push((panel.clone(), events_tx));
        CreatedPanel {
            view: panel,
            events: events_rx,
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingPanel {
    html: String,
    posted: Mutex<Vec<Value>>,
    visible: AtomicBool,
    reveals: AtomicUsize,
}

impl RecordingPanel {
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn posted(&self) -> Vec<Value> {
        self.posted.lock().unwrap().clone()
    }

    pub fn reveals(&self) -> usize {
        self.reveals.load(Ordering::SeqCst)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }
}

impl PanelView for RecordingPanel {
    fn post_message(&self, message: Value) -> bool {
        self.posted.lock().unwrap().push(message);
        true
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn reveal(&self) {
        self.visible.store(true, Ordering::SeqCst);
        self.reveals.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingServer {
    notifications: Mutex<Vec<Outbound>>,
    lenses: Mutex<Vec<CodeLens>>,
    links: Mutex<Vec<DocumentLink>>,
    lens_requests: AtomicUsize,
    link_requests: AtomicUsize,
    closed: AtomicBool,
}

impl RecordingServer {
    pub fn notifications(&self) -> Vec<Outbound> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn set_lenses(&self, lenses: Vec<CodeLens>) {
        *self.lenses.lock().unwrap() = lenses;
    }

    pub fn set_links(&self, links: Vec<DocumentLink>) {
        *self.links.lock().unwrap() = links;
    }

    pub fn lens_requests(&self) -> usize {
        self.lens_requests.load(Ordering::SeqCst)
    }

    pub fn link_requests(&self) -> usize {
        self.link_requests.load(Ordering::SeqCst)
    }

    /// Make every later call fail as if the socket had closed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RpcError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AlloyServer for RecordingServer {
    async fn notify(&self, notification: Outbound) -> Result<(), RpcError> {
        self.check_open()?;
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }

    async fn code_lenses(&self, _uri: &Url) -> Result<Vec<CodeLens>, RpcError> {
        self.check_open()?;
        self.lens_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.lenses.lock().unwrap().clone())
    }

    async fn document_links(&self, _uri: &Url) -> Result<Vec<DocumentLink>, RpcError> {
        self.check_open()?;
        self.link_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.links.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub(crate) struct RecordingEditor {
    opened: Mutex<Vec<Option<PathBuf>>>,
    fail: AtomicBool,
}

impl RecordingEditor {
    pub fn opened(&self) -> Vec<Option<PathBuf>> {
        self.opened.lock().unwrap().clone()
    }

    pub fn fail_with_missing_runtime(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl StandaloneEditor for RecordingEditor {
    fn open(&self, file: Option<&Path>) -> Result<(), SupervisorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SupervisorError::Spawn {
                program: "java".into(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }
        self.opened.lock().unwrap().push(file.map(Path::to_path_buf));
        Ok(())
    }
}
