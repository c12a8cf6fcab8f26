//! Retrieval service contract.
//!
//! The semantic index itself lives elsewhere; this module defines the query
//! contract, an HTTP client for it, and the best-effort lookup the
//! orchestrator uses so that a failing index degrades a turn instead of
//! aborting it.

use crate::error::{Result, TutorError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// One excerpt from a learner's corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub source: String,
    pub page: u32,
    pub content: String,
    pub score: f32,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Returns up to `k` passages ordered by relevance.
    async fn search(
        &self,
        owner_id: &str,
        corpus_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedPassage>>;

    /// Whether the corpus exists for that owner. Absence is not an error.
    async fn has_corpus(&self, owner_id: &str, corpus_id: &str) -> Result<bool>;
}

/// What retrieval produced for a turn, as far as prompt assembly cares.
#[derive(Debug, Clone, PartialEq)]
pub enum Grounding {
    /// No corpus is linked to the session.
    Unlinked,
    /// Retrieval could not be completed; the turn proceeds ungrounded.
    Unavailable,
    /// A corpus is linked but yielded nothing for the query, either because
    /// nothing matched or because the index does not hold it.
    NoMatches,
    Passages(Vec<RetrievedPassage>),
}

impl Grounding {
    pub fn passage_count(&self) -> usize {
        match self {
            Grounding::Passages(p) => p.len(),
            _ => 0,
        }
    }
}

/// Looks up grounding passages without ever failing the turn.
///
/// Each call to the service is bounded by `timeout`. Errors and timeouts are
/// logged and reported as [`Grounding::Unavailable`].
pub async fn fetch_grounding(
    service: &dyn RetrievalService,
    owner_id: &str,
    corpus_id: Option<&str>,
    query: &str,
    k: usize,
    timeout: Duration,
) -> Grounding {
    let Some(corpus_id) = corpus_id else {
        return Grounding::Unlinked;
    };

    match tokio::time::timeout(timeout, service.has_corpus(owner_id, corpus_id)).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            debug!(%corpus_id, "Linked corpus is not indexed");
            return Grounding::NoMatches;
        }
        Ok(Err(e)) => {
            warn!(%corpus_id, error = %e, "Corpus lookup failed, continuing without grounding");
            return Grounding::Unavailable;
        }
        Err(_) => {
            warn!(%corpus_id, "Corpus lookup timed out, continuing without grounding");
            return Grounding::Unavailable;
        }
    }

    match tokio::time::timeout(timeout, service.search(owner_id, corpus_id, query, k)).await {
        Ok(Ok(passages)) if passages.is_empty() => Grounding::NoMatches,
        Ok(Ok(passages)) => Grounding::Passages(passages),
        Ok(Err(e)) => {
            warn!(%corpus_id, error = %e, "Retrieval failed, continuing without grounding");
            Grounding::Unavailable
        }
        Err(_) => {
            warn!(%corpus_id, "Retrieval timed out, continuing without grounding");
            Grounding::Unavailable
        }
    }
}

/// Used when no retrieval backend is configured: no corpus ever exists.
pub struct NoRetrieval;

#[async_trait]
impl RetrievalService for NoRetrieval {
    async fn search(&self, _: &str, _: &str, _: &str, _: usize) -> Result<Vec<RetrievedPassage>> {
        Ok(Vec::new())
    }

    async fn has_corpus(&self, _: &str, _: &str) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    owner_id: &'a str,
    corpus_id: &'a str,
    query: &'a str,
    k: usize,
}

/// Client for an external retrieval index speaking JSON over HTTP.
pub struct HttpRetrievalClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRetrievalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RetrievalService for HttpRetrievalClient {
    async fn search(
        &self,
        owner_id: &str,
        corpus_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedPassage>> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SearchRequest {
                owner_id,
                corpus_id,
                query,
                k,
            })
            .send()
            .await
            .map_err(|e| TutorError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TutorError::UpstreamUnavailable(format!(
                "retrieval search returned {}",
                response.status()
            )));
        }

        response
            .json::<Vec<RetrievedPassage>>()
            .await
            .map_err(|e| TutorError::UpstreamMalformed(e.to_string()))
    }

    async fn has_corpus(&self, owner_id: &str, corpus_id: &str) -> Result<bool> {
        let url = format!("{}/corpora/{}/{}", self.base_url, owner_id, corpus_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TutorError::UpstreamUnavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(TutorError::UpstreamUnavailable(format!(
                "corpus lookup returned {}",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(page: u32) -> RetrievedPassage {
        RetrievedPassage {
            source: "physics.pdf".into(),
            page,
            content: "파동함수는 입자의 상태를 나타낸다".into(),
            score: 0.9,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_unlinked_session_never_queries() {
        let service = MockRetrievalService::new();
        let grounding = fetch_grounding(&service, "u", None, "q", 5, TIMEOUT).await;
        assert_eq!(grounding, Grounding::Unlinked);
    }

    #[tokio::test]
    async fn test_missing_corpus_yields_no_matches() {
        let mut service = MockRetrievalService::new();
        service.expect_has_corpus().returning(|_, _| Ok(false));
        service.expect_search().never();
        let grounding = fetch_grounding(&service, "u", Some("c"), "q", 5, TIMEOUT).await;
        assert_eq!(grounding, Grounding::NoMatches);
    }

    #[tokio::test]
    async fn test_empty_search_is_no_matches() {
        let mut service = MockRetrievalService::new();
        service.expect_has_corpus().returning(|_, _| Ok(true));
        service.expect_search().returning(|_, _, _, _| Ok(vec![]));
        let grounding = fetch_grounding(&service, "u", Some("c"), "q", 5, TIMEOUT).await;
        assert_eq!(grounding, Grounding::NoMatches);
    }

    #[tokio::test]
    async fn test_passages_forwarded_with_k() {
        let mut service = MockRetrievalService::new();
        service.expect_has_corpus().returning(|_, _| Ok(true));
        service
            .expect_search()
            .withf(|owner, corpus, query, k| {
                owner == "u" && corpus == "c" && query == "양자역학 definition" && *k == 3
            })
            .returning(|_, _, _, _| Ok(vec![passage(1), passage(2)]));
        let grounding =
            fetch_grounding(&service, "u", Some("c"), "양자역학 definition", 3, TIMEOUT).await;
        assert_eq!(grounding.passage_count(), 2);
    }

    #[tokio::test]
    async fn test_search_failure_degrades() {
        let mut service = MockRetrievalService::new();
        service.expect_has_corpus().returning(|_, _| Ok(true));
        service
            .expect_search()
            .returning(|_, _, _, _| Err(TutorError::UpstreamUnavailable("down".into())));
        let grounding = fetch_grounding(&service, "u", Some("c"), "q", 5, TIMEOUT).await;
        assert_eq!(grounding, Grounding::Unavailable);
    }

    #[tokio::test]
    async fn test_no_retrieval_reports_no_corpus() {
        let grounding = fetch_grounding(&NoRetrieval, "u", Some("c"), "q", 5, TIMEOUT).await;
        assert_eq!(grounding, Grounding::NoMatches);
        let grounding = fetch_grounding(&NoRetrieval, "u", None, "q", 5, TIMEOUT).await;
        assert_eq!(grounding, Grounding::Unlinked);
    }

    /// An index that hangs on whichever call `stall_lookup` selects.
    struct StalledIndex {
        stall_lookup: bool,
    }

    #[async_trait]
    impl RetrievalService for StalledIndex {
        async fn search(&self, _: &str, _: &str, _: &str, _: usize) -> Result<Vec<RetrievedPassage>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![passage(1)])
        }

        async fn has_corpus(&self, _: &str, _: &str) -> Result<bool> {
            if self.stall_lookup {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_corpus_lookup_timeout_degrades() {
        let service = StalledIndex { stall_lookup: true };
        let grounding =
            fetch_grounding(&service, "u", Some("c"), "q", 5, Duration::from_secs(10)).await;
        assert_eq!(grounding, Grounding::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_timeout_degrades() {
        let service = StalledIndex { stall_lookup: false };
        let grounding =
            fetch_grounding(&service, "u", Some("c"), "q", 5, Duration::from_secs(10)).await;
        assert_eq!(grounding, Grounding::Unavailable);
    }
}
