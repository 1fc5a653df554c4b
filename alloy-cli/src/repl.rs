//! Line commands read from stdin while a session is active.

use std::sync::Arc;

use alloy_config::CommandHighlightMode;
use alloy_lsp::features::commands::{
    COMMAND_EXECUTE, COMMAND_EXECUTE_ALL, COMMAND_EXECUTE_UNDER_CURSOR, COMMAND_LIST,
    COMMAND_OPEN_EDITOR, COMMAND_OPEN_LATEST_INSTANCE,
};
use alloy_lsp::Session;
use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tower_lsp::lsp_types::{Command, Position};

use crate::terminal::TerminalHost;

pub const HELP: &str = "\
Commands:
  all                    execute every command of the document
  run <index>            execute one command by index
  list                   choose a command from the server's list
  lenses                 show the code lenses of the document
  links                  show the document links of the document
  cursor <line> <char>   move the cursor (0-based)
  under                  execute the command under the cursor
  stop                   stop the running execution
  open <link>            open a model instance
  latest                 open the latest model instance
  editor                 open the standalone Alloy editor
  mode <mode>            switch the highlight mode (codelens, link, ...)
  help                   show this help
  quit                   end the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    All,
    Run(i64),
    List,
    Lenses,
    Links,
    Cursor(Position),
    Under,
    Stop,
    Open(String),
    Latest,
    Editor,
    Mode(CommandHighlightMode),
    Help,
    Quit,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();
        let command = match (head, rest.as_slice()) {
            ("all", []) => ReplCommand::All,
            ("run", [index]) => ReplCommand::Run(
                index
                    .parse()
                    .map_err(|_| format!("`{index}` is not a command index"))?,
            ),
            ("list", []) => ReplCommand::List,
            ("lenses", []) => ReplCommand::Lenses,
            ("links", []) => ReplCommand::Links,
            ("cursor", [line, character]) => {
                let line = line
                    .parse()
                    .map_err(|_| format!("`{line}` is not a line number"))?;
                let character = character
                    .parse()
                    .map_err(|_| format!("`{character}` is not a character offset"))?;
                ReplCommand::Cursor(Position::new(line, character))
            }
            ("under", []) => ReplCommand::Under,
            ("stop", []) => ReplCommand::Stop,
            ("open", [link]) => ReplCommand::Open(link.to_string()),
            ("latest", []) => ReplCommand::Latest,
            ("editor", []) => ReplCommand::Editor,
            ("mode", [mode]) => ReplCommand::Mode(CommandHighlightMode::from(*mode)),
            ("help", []) => ReplCommand::Help,
            ("quit" | "exit", []) => ReplCommand::Quit,
            _ => return Err(format!("unrecognized command `{}`, try `help`", line.trim())),
        };
        Ok(Some(command))
    }
}

/// Read commands until `quit` or end of input.
pub async fn run(
    session: &Session<TerminalHost>,
    host: Arc<TerminalHost>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if host.has_pending_pick() {
                    host.answer_pick(line.trim().parse().ok());
                    continue;
                }
                match ReplCommand::parse(&line) {
                    Ok(Some(ReplCommand::Quit)) => break,
                    Ok(Some(command)) => handle(session, &host, command).await,
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                }
            }
            Some(command) = commands.recv() => {
                let arguments = command.arguments.unwrap_or_default();
                if let Err(err) = session.execute_command(&command.command, &arguments).await {
                    eprintln!("{err}");
                }
            }
        }
    }
    Ok(())
}

async fn handle(session: &Session<TerminalHost>, host: &TerminalHost, command: ReplCommand) {
    let result = match command {
        ReplCommand::All => session.execute_command(COMMAND_EXECUTE_ALL, &[]).await,
        ReplCommand::List => session.execute_command(COMMAND_LIST, &[]).await,
        ReplCommand::Under => {
            session
                .execute_command(COMMAND_EXECUTE_UNDER_CURSOR, &[])
                .await
        }
        ReplCommand::Latest => {
            session
                .execute_command(COMMAND_OPEN_LATEST_INSTANCE, &[])
                .await
        }
        ReplCommand::Editor => session.execute_command(COMMAND_OPEN_EDITOR, &[]).await,
        ReplCommand::Run(index) => {
            let Some(editor) = host.active_editor_or_hint() else {
                return;
            };
            let arguments = [
                json!(editor.document.uri.as_str()),
                json!(index),
                json!(editor.cursor.line),
                json!(editor.cursor.character),
            ];
            session.execute_command(COMMAND_EXECUTE, &arguments).await
        }
        ReplCommand::Lenses => {
            let Some(editor) = host.active_editor_or_hint() else {
                return;
            };
            match session.code_lenses(&editor.document.uri).await {
                Ok(lenses) if lenses.is_empty() => println!("no code lenses"),
                Ok(lenses) => {
                    for lens in lenses {
                        let title = lens.command.map(|command| command.title).unwrap_or_default();
                        println!(
                            "{}:{}-{}:{}  {title}",
                            lens.range.start.line,
                            lens.range.start.character,
                            lens.range.end.line,
                            lens.range.end.character
                        );
                    }
                }
                Err(err) => eprintln!("{err}"),
            }
            return;
        }
        ReplCommand::Links => {
            let Some(editor) = host.active_editor_or_hint() else {
                return;
            };
            match session.document_links(&editor.document.uri).await {
                Ok(links) if links.is_empty() => println!("no document links"),
                Ok(links) => {
                    for link in links {
                        let target = link.target.map(|target| target.to_string()).unwrap_or_default();
                        println!("{}:{}  {target}", link.range.start.line, link.range.start.character);
                    }
                }
                Err(err) => eprintln!("{err}"),
            }
            return;
        }
        ReplCommand::Cursor(position) => {
            if !host.move_cursor(position) {
                eprintln!("no document is open");
            }
            return;
        }
        ReplCommand::Stop => {
            panel_message(session, host, json!({"method": "stop"})).await;
            return;
        }
        ReplCommand::Open(link) => {
            panel_message(session, host, json!({"method": "model", "data": {"link": link}})).await;
            return;
        }
        ReplCommand::Mode(mode) => {
            session.set_highlight_mode(mode);
            return;
        }
        ReplCommand::Help => {
            println!("{HELP}");
            return;
        }
        ReplCommand::Quit => return,
    };
    if let Err(err) = result {
        eprintln!("{err}");
    }
}

/// Route through the open panel when there is one, as a click would.
async fn panel_message(session: &Session<TerminalHost>, host: &TerminalHost, message: Value) {
    if !host.post_from_panel(message.clone()) {
        session.context().handle_panel_message(message).await;
    }
}
