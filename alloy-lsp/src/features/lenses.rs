//! Code lens and document link gating.
//!
//! The Alloy server reports runnable commands both as code lenses and as document
//! links. Which of the two the editor shows depends on the live highlight mode, but
//! lenses are always fetched and cached so "execute command under cursor" works in
//! every mode.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tower_lsp::lsp_types::{CodeLens, DocumentLink, Position, Range, Url};
use tracing::debug;

use crate::context::SessionContext;
use crate::host::EditorHost;
use crate::protocol::AlloyServer;
use crate::rpc::RpcError;

/// Last lenses reported per document. Replaced wholesale on every request.
#[derive(Debug, Default)]
pub struct LensCache {
    entries: RwLock<HashMap<Url, Vec<CodeLens>>>,
}

impl LensCache {
    pub async fn replace(&self, uri: Url, lenses: Vec<CodeLens>) {
        self.entries.write().await.insert(uri, lenses);
    }

    pub async fn get(&self, uri: &Url) -> Vec<CodeLens> {
        self.entries
            .read()
            .await
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    /// First lens of `uri` that covers `position` and targets `uri` itself.
    pub async fn find_at(&self, uri: &Url, position: Position) -> Option<CodeLens> {
        let entries = self.entries.read().await;
        entries
            .get(uri)?
            .iter()
            .find(|lens| contains(&lens.range, position) && targets(lens, uri))
            .cloned()
    }
}

/// Inclusive on both ends.
fn contains(range: &Range, position: Position) -> bool {
    let at = (position.line, position.character);
    (range.start.line, range.start.character) <= at && at <= (range.end.line, range.end.character)
}

fn targets(lens: &CodeLens, uri: &Url) -> bool {
    lens.command
        .as_ref()
        .and_then(|command| command.arguments.as_ref())
        .and_then(|arguments| arguments.first())
        .and_then(|first| first.as_str())
        .is_some_and(|first| first == uri.as_str())
}

impl<H, S> SessionContext<H, S>
where
    H: EditorHost,
    S: AlloyServer,
{
    /// Fetch and cache the lenses of `uri`; show them only in code lens mode.
    pub async fn provide_code_lenses(&self, uri: &Url) -> Result<Vec<CodeLens>, RpcError> {
        let lenses = self.server.code_lenses(uri).await?;
        debug!(%uri, count = lenses.len(), "caching code lenses");
        self.lenses.replace(uri.clone(), lenses.clone()).await;
        if self.settings.highlight_mode().shows_code_lenses() {
            Ok(lenses)
        } else {
            Ok(Vec::new())
        }
    }

    /// Document links are only requested in link mode.
    pub async fn provide_document_links(&self, uri: &Url) -> Result<Vec<DocumentLink>, RpcError> {
        if self.settings.highlight_mode().shows_links() {
            self.server.document_links(uri).await
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_config::CommandHighlightMode;
    use crate::features::test_support::{
        code_lens, context_with_mode, document_link, RecordingHost, RecordingServer,
    };
    use rstest::rstest;

    fn uri() -> Url {
        Url::parse("file:///models/hotel.als").unwrap()
    }

    #[tokio::test]
    async fn lookup_is_inclusive_and_first_match_wins() {
        let cache = LensCache::default();
        let uri = uri();
        cache
            .replace(
                uri.clone(),
                vec![
                    code_lens(uri.as_str(), 0, (2, 0), (2, 10)),
                    code_lens(uri.as_str(), 1, (2, 5), (4, 0)),
                ],
            )
            .await;

        let hit = |line, character| cache.find_at(&uri, Position::new(line, character));
        assert_eq!(argument_index(hit(2, 0).await), Some(0));
        assert_eq!(argument_index(hit(2, 10).await), Some(0));
        assert_eq!(argument_index(hit(2, 11).await), Some(1));
        assert_eq!(argument_index(hit(4, 0).await), Some(1));
        assert_eq!(hit(4, 1).await, None);
        assert_eq!(hit(1, 99).await, None);
    }

    #[tokio::test]
    async fn lookup_skips_lenses_targeting_other_documents() {
        let cache = LensCache::default();
        let uri = uri();
        cache
            .replace(
                uri.clone(),
                vec![
                    code_lens("file:///models/other.als", 0, (0, 0), (0, 20)),
                    code_lens(uri.as_str(), 3, (0, 0), (0, 20)),
                ],
            )
            .await;
        let found = cache.find_at(&uri, Position::new(0, 4)).await;
        assert_eq!(argument_index(found), Some(3));
    }

    #[tokio::test]
    async fn lenses_without_arguments_never_match() {
        let cache = LensCache::default();
        let uri = uri();
        let mut lens = code_lens(uri.as_str(), 0, (0, 0), (0, 20));
        lens.command = None;
        cache.replace(uri.clone(), vec![lens]).await;
        assert_eq!(cache.find_at(&uri, Position::new(0, 1)).await, None);
    }

    #[tokio::test]
    async fn unknown_document_has_no_lenses() {
        let cache = LensCache::default();
        assert!(cache.get(&uri()).await.is_empty());
        assert_eq!(cache.find_at(&uri(), Position::new(0, 0)).await, None);
    }

    #[rstest]
    #[case::codelens(CommandHighlightMode::CodeLens, 2, 0, 0)]
    #[case::link(CommandHighlightMode::Link, 0, 1, 1)]
    #[case::hidden(CommandHighlightMode::Hidden("none".into()), 0, 0, 0)]
    #[tokio::test]
    async fn highlight_mode_gates_lenses_and_links(
        #[case] mode: CommandHighlightMode,
        #[case] shown_lenses: usize,
        #[case] shown_links: usize,
        #[case] link_requests: usize,
    ) {
        let uri = uri();
        let server = RecordingServer::default();
        server.set_lenses(vec![
            code_lens(uri.as_str(), 0, (0, 0), (0, 10)),
            code_lens(uri.as_str(), 1, (3, 0), (3, 10)),
        ]);
        server.set_links(vec![document_link(uri.as_str(), 0, (0, 0), (0, 10))]);
        let (context, _host, server) = context_with_mode(RecordingHost::default(), server, mode);

        let lenses = context.provide_code_lenses(&uri).await.unwrap();
        let links = context.provide_document_links(&uri).await.unwrap();

        assert_eq!(lenses.len(), shown_lenses);
        assert_eq!(links.len(), shown_links);
        assert_eq!(server.lens_requests(), 1);
        assert_eq!(server.link_requests(), link_requests);
        assert_eq!(context.lenses().get(&uri).await.len(), 2);
    }

    #[tokio::test]
    async fn cache_entry_is_fully_replaced() {
        let uri = uri();
        let server = RecordingServer::default();
        server.set_lenses(vec![
            code_lens(uri.as_str(), 0, (0, 0), (0, 10)),
            code_lens(uri.as_str(), 1, (3, 0), (3, 10)),
        ]);
        let (context, _host, server) = context_with_mode(
            RecordingHost::default(),
            server,
            CommandHighlightMode::CodeLens,
        );
        context.provide_code_lenses(&uri).await.unwrap();

        server.set_lenses(vec![code_lens(uri.as_str(), 7, (9, 0), (9, 1))]);
        context.provide_code_lenses(&uri).await.unwrap();
        let cached = context.lenses().get(&uri).await;
        assert_eq!(cached.len(), 1);
        assert_eq!(argument_index(cached.into_iter().next()), Some(7));
    }

    #[tokio::test]
    async fn mode_change_applies_to_the_next_request() {
        let uri = uri();
        let server = RecordingServer::default();
        server.set_lenses(vec![code_lens(uri.as_str(), 0, (0, 0), (0, 10))]);
        let (context, _host, _server) = context_with_mode(
            RecordingHost::default(),
            server,
            CommandHighlightMode::CodeLens,
        );
        assert_eq!(context.provide_code_lenses(&uri).await.unwrap().len(), 1);
        context.settings().set_highlight_mode(CommandHighlightMode::Link);
        assert!(context.provide_code_lenses(&uri).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_leaves_cache_untouched() {
        let uri = uri();
        let server = RecordingServer::default();
        server.set_lenses(vec![code_lens(uri.as_str(), 0, (0, 0), (0, 10))]);
        let (context, _host, server) = context_with_mode(
            RecordingHost::default(),
            server,
            CommandHighlightMode::CodeLens,
        );
        context.provide_code_lenses(&uri).await.unwrap();
        server.close();
        assert!(matches!(
            context.provide_code_lenses(&uri).await,
            Err(RpcError::ConnectionClosed)
        ));
        assert_eq!(context.lenses().get(&uri).await.len(), 1);
    }

    fn argument_index(lens: Option<CodeLens>) -> Option<i64> {
        lens?.command?.arguments?.get(1)?.as_i64()
    }
}
