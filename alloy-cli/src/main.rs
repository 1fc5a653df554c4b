//! Command-line front end for the Alloy editor bridge
//! The terminal stands in for the editor: it starts a session against the Alloy language
//! server, opens one model as the active document and forwards typed commands.
//!
//! Usage:
//!   alloy [--config `<file>`] [--highlight `<mode>`] [`<model>`]   - Start an interactive session
//!   alloy editor [`<model>`]                                      - Open the standalone Alloy editor

mod repl;
mod terminal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy_config::{AlloyConfig, Loader};
use alloy_lsp::{ActiveEditor, JarCommand, Session, TextDocument};
use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use crossterm::style::Stylize;
use tower_lsp::lsp_types::{Position, Url};
use tracing_subscriber::EnvFilter;

use crate::terminal::TerminalHost;

const LOG_ENV: &str = "ALLOY_LOG";

fn cli() -> Command {
    Command::new("alloy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run Alloy models through the Alloy language server from a terminal")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Configuration file layered over the built-in defaults"),
        )
        .arg(
            Arg::new("highlight")
                .long("highlight")
                .help("Command highlight mode: codelens, link, or anything else to hide both"),
        )
        .arg(
            Arg::new("model")
                .help("Alloy model to open as the active document")
                .value_parser(clap::value_parser!(PathBuf))
                .index(1),
        )
        .subcommand(
            Command::new("editor")
                .about("Open the standalone Alloy editor")
                .arg(
                    Arg::new("model")
                        .help("Model to open in the editor")
                        .value_parser(clap::value_parser!(PathBuf))
                        .index(1),
                ),
        )
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(matches: &ArgMatches) -> Result<AlloyConfig> {
    let mut loader = Loader::new();
    if let Some(path) = matches.get_one::<PathBuf>("config") {
        loader = loader.with_file(path);
    }
    if let Some(mode) = matches.get_one::<String>("highlight") {
        loader = loader.with_highlight_mode(mode)?;
    }
    loader.build().context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let matches = cli().get_matches();
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("editor", sub)) => open_editor(&config, sub.get_one::<PathBuf>("model")),
        _ => run_session(config, matches.get_one::<PathBuf>("model")).await,
    }
}

fn open_editor(config: &AlloyConfig, model: Option<&PathBuf>) -> Result<()> {
    let jar = JarCommand::from_config(&config.server);
    jar.spawn_standalone_editor(model.map(PathBuf::as_path))
        .map_err(|err| anyhow!(err.user_message()))?;
    println!("Alloy editor started");
    Ok(())
}

async fn read_document(path: &Path, language_id: &str) -> Result<(TextDocument, String)> {
    let path = path
        .canonicalize()
        .with_context(|| format!("cannot open {}", path.display()))?;
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let uri = Url::from_file_path(&path)
        .map_err(|_| anyhow!("cannot turn {} into a file URI", path.display()))?;
    let language_id = match path.extension().and_then(|ext| ext.to_str()) {
        Some("als") => language_id.to_string(),
        Some(other) => other.to_string(),
        None => "plaintext".to_string(),
    };
    Ok((TextDocument::file(uri, language_id), text))
}

async fn run_session(config: AlloyConfig, model: Option<&PathBuf>) -> Result<()> {
    let document = match model {
        Some(path) => Some(read_document(path, &config.editor.language_id).await?),
        None => None,
    };
    let active = document.as_ref().map(|(document, _)| ActiveEditor {
        document: document.clone(),
        cursor: Position::new(0, 0),
    });

    let (host, commands) = TerminalHost::new(active);
    let host = Arc::new(host);
    let session = Session::activate(&config, host.clone()).await?;
    println!(
        "{} on port {} (type `help` for commands)",
        "Alloy language server ready".bold(),
        session.port()
    );

    if let Some((document, text)) = &document {
        if let Err(err) = session.open_document(document, text.clone()).await {
            eprintln!("{err}");
        }
    }

    let outcome = repl::run(&session, host, commands).await;

    if let Some((document, _)) = &document {
        if let Err(err) = session.did_close(document).await {
            tracing::debug!("didClose not delivered: {err}");
        }
    }
    let termination = session.deactivate().await;
    tracing::info!(?termination, "language server stopped");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn highlight_flag_overrides_config() {
        let matches = cli().get_matches_from(["alloy", "--highlight", "link"]);
        let config = load_config(&matches).unwrap();
        assert_eq!(
            config.editor.command_highlight_mode,
            alloy_config::CommandHighlightMode::Link
        );
    }

    #[test]
    fn editor_subcommand_takes_a_model() {
        let matches = cli().get_matches_from(["alloy", "editor", "hotel.als"]);
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "editor");
        assert_eq!(sub.get_one::<PathBuf>("model"), Some(&PathBuf::from("hotel.als")));
    }

    #[test]
    fn editor_subcommand_follows_the_config_option() {
        let matches = cli().get_matches_from(["alloy", "--config", "c.toml", "editor"]);
        assert_eq!(matches.get_one::<PathBuf>("model"), None);
        assert_eq!(matches.get_one::<PathBuf>("config"), Some(&PathBuf::from("c.toml")));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "editor");
        assert_eq!(sub.get_one::<PathBuf>("model"), None);
    }

    #[test]
    fn model_alone_starts_a_session() {
        let matches = cli().get_matches_from(["alloy", "-c", "c.toml", "hotel.als"]);
        assert!(matches.subcommand().is_none());
        assert_eq!(matches.get_one::<PathBuf>("model"), Some(&PathBuf::from("hotel.als")));
    }

    #[tokio::test]
    async fn alloy_files_get_the_configured_language() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotel.als");
        std::fs::write(&path, "sig Room {}\n").unwrap();
        let (document, text) = read_document(&path, "alloy").await.unwrap();
        assert_eq!(document.language_id, "alloy");
        assert_eq!(document.uri.scheme(), "file");
        assert_eq!(text, "sig Room {}\n");
    }
}
