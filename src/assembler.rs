//! Batch search and playlist assembly.
//!
//! Every query is searched independently (bounded by a semaphore), results
//! are put back into request order, and only then does anything mutate the
//! user's library: one create call, and one add call when at least one
//! query resolved.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::ToolError;
use crate::matcher::{MatchConfig, SearchQuery, match_query};
use crate::session::Session;
use crate::types::{PlaylistSummary, SearchKind, SearchResults, SearchType, Track};

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub search_page_size: u32,
    pub batch_cap: usize,
    pub concurrency: usize,
    pub query_timeout: Duration,
    pub matching: MatchConfig,
}

impl AssemblerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search_page_size: config.search_page_size,
            batch_cap: config.batch_cap,
            concurrency: config.batch_concurrency,
            // Covers one retried read.
            query_timeout: config.request_timeout * 2,
            matching: MatchConfig {
                min_confidence: config.min_match_confidence,
                tie_epsilon: config.match_tie_epsilon,
                ..MatchConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnresolvedReason {
    NoCandidates,
    LowConfidence,
    UpstreamTimeout,
    UpstreamError,
}

impl UnresolvedReason {
    fn from_error(err: &ToolError) -> Self {
        match err {
            ToolError::UpstreamTimeout(_) => Self::UpstreamTimeout,
            _ => Self::UpstreamError,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedSong {
    pub index: usize,
    pub query: String,
    pub track: Track,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedSong {
    pub index: usize,
    pub query: String,
    pub reason: UnresolvedReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Resolution state of one assembly call before anything is written upstream.
#[derive(Debug, Clone)]
pub struct PlaylistDraft {
    pub name: String,
    pub description: String,
    pub matched: Vec<MatchedSong>,
    pub unmatched: Vec<UnmatchedSong>,
}

impl PlaylistDraft {
    /// Resolved ids in request order.
    pub fn track_ids(&self) -> Vec<String> {
        self.matched.iter().map(|m| m.track.id.clone()).collect()
    }

    pub fn match_rate(&self) -> String {
        format!(
            "{}/{}",
            self.matched.len(),
            self.matched.len() + self.unmatched.len()
        )
    }
}

#[derive(Debug, Clone)]
pub struct AssembleRequest {
    pub title: String,
    pub description: String,
    pub queries: Vec<SearchQuery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblyOutcome {
    pub playlist: PlaylistSummary,
    pub matched_songs: Vec<MatchedSong>,
    pub unmatched_songs: Vec<UnmatchedSong>,
    pub match_rate: String,
    pub tracks_added: usize,
}

pub fn validate_batch(len: usize, cap: usize) -> Result<(), ToolError> {
    if len == 0 {
        return Err(ToolError::validation("At least one query is required"));
    }
    if len > cap {
        return Err(ToolError::validation(format!(
            "{len} queries requested; at most {cap} are allowed per call"
        )));
    }
    Ok(())
}

struct SearchJob {
    query: SearchQuery,
    kinds: Vec<SearchKind>,
    limit: u32,
}

/// Run every search concurrently and return the results in request order.
/// An `AuthRequired` from any query aborts the remaining work.
async fn search_all(
    catalog: &Arc<dyn Catalog>,
    session: &Session,
    jobs: Vec<SearchJob>,
    concurrency: usize,
    query_timeout: Duration,
) -> Result<Vec<(SearchQuery, Result<SearchResults, ToolError>)>, ToolError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(jobs.len());

    for job in jobs {
        let sem = semaphore.clone();
        let catalog = catalog.clone();
        let session = session.clone();
        let query = job.query.clone();
        handles.push((
            query,
            tokio::task::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return Err(ToolError::UpstreamUnavailable(
                        "search worker pool closed".to_string(),
                    ));
                };
                let text = job.query.search_text();
                match tokio::time::timeout(
                    query_timeout,
                    catalog.search(&session, &text, &job.kinds, job.limit),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::UpstreamTimeout(format!(
                        "search for '{text}' timed out after {}s",
                        query_timeout.as_secs_f32()
                    ))),
                }
            }),
        ));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut pending = handles.into_iter();
    while let Some((query, handle)) = pending.next() {
        let result = handle.await.unwrap_or_else(|e| {
            Err(ToolError::UpstreamUnavailable(format!(
                "search task failed: {e}"
            )))
        });
        if let Err(ToolError::AuthRequired(msg)) = &result {
            for (_, rest) in pending {
                rest.abort();
            }
            return Err(ToolError::AuthRequired(msg.clone()));
        }
        results.push((query, result));
    }
    Ok(results)
}

fn resolve(
    index: usize,
    query: SearchQuery,
    searched: Result<SearchResults, ToolError>,
    config: &MatchConfig,
) -> Result<MatchedSong, UnmatchedSong> {
    let candidates = match searched {
        Ok(results) => results.tracks,
        Err(e) => {
            return Err(UnmatchedSong {
                index,
                reason: UnresolvedReason::from_error(&e),
                detail: Some(e.to_string()),
                query: query.query,
            });
        }
    };
    if candidates.is_empty() {
        return Err(UnmatchedSong {
            index,
            query: query.query,
            reason: UnresolvedReason::NoCandidates,
            detail: None,
        });
    }
    let result = match_query(&query, &candidates, config);
    match result.best {
        Some(track) => Ok(MatchedSong {
            index,
            query: query.query,
            track,
            confidence: result.confidence,
        }),
        None => {
            let closest = result.alternatives.first().map(|alt| {
                format!(
                    "closest candidate '{}' by {} scored {:.2}",
                    alt.track.title, alt.track.artist, alt.score
                )
            });
            Err(UnmatchedSong {
                index,
                query: query.query,
                reason: UnresolvedReason::LowConfidence,
                detail: closest,
            })
        }
    }
}

/// Search and match every query, then create the playlist and add the
/// resolved tracks in request order.
pub async fn assemble(
    catalog: Arc<dyn Catalog>,
    session: &Session,
    request: AssembleRequest,
    config: &AssemblerConfig,
) -> Result<AssemblyOutcome, ToolError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ToolError::validation("Playlist title cannot be empty"));
    }
    validate_batch(request.queries.len(), config.batch_cap)?;
    if let Some(pos) = request.queries.iter().position(|q| q.query.trim().is_empty()) {
        return Err(ToolError::validation(format!(
            "Song description at index {pos} is empty"
        )));
    }

    let jobs = request
        .queries
        .into_iter()
        .map(|query| SearchJob {
            query,
            kinds: vec![SearchKind::Track],
            limit: config.search_page_size,
        })
        .collect();
    let searched = search_all(
        &catalog,
        session,
        jobs,
        config.concurrency,
        config.query_timeout,
    )
    .await?;

    let mut draft = PlaylistDraft {
        name: title.to_string(),
        description: request.description,
        matched: Vec::new(),
        unmatched: Vec::new(),
    };
    for (index, (query, result)) in searched.into_iter().enumerate() {
        match resolve(index, query, result, &config.matching) {
            Ok(song) => draft.matched.push(song),
            Err(song) => draft.unmatched.push(song),
        }
    }
    tracing::info!(
        title = %draft.name,
        match_rate = %draft.match_rate(),
        "resolved playlist songs"
    );

    let playlist = catalog
        .create_playlist(session, &draft.name, &draft.description)
        .await?;

    let track_ids = draft.track_ids();
    let tracks_added = if track_ids.is_empty() {
        0
    } else {
        match catalog
            .add_tracks(session, &playlist.id, &track_ids, false)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(playlist_id = %playlist.id, error = %e, "adding tracks failed after create");
                return Err(ToolError::PartialFailure {
                    message: format!(
                        "Playlist '{}' was created but adding its tracks failed: {e}",
                        draft.name
                    ),
                    details: serde_json::json!({
                        "playlist_id": playlist.id,
                        "playlist_url": playlist.url,
                        "upstream_kind": e.kind(),
                        "matched_songs": draft.matched,
                        "unmatched_songs": draft.unmatched,
                        "match_rate": draft.match_rate(),
                    }),
                });
            }
        }
    };

    let match_rate = draft.match_rate();
    let mut playlist = playlist;
    playlist.track_count = playlist.track_count.max(tracks_added as u32);
    Ok(AssemblyOutcome {
        playlist,
        matched_songs: draft.matched,
        unmatched_songs: draft.unmatched,
        match_rate,
        tracks_added,
    })
}

/// One entry of a `batch_search_tidal` request.
#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct BatchQuery {
    #[serde(flatten)]
    pub query: SearchQuery,
    #[schemars(description = "What to search for: track (default), album, artist, playlist, or all")]
    #[serde(default = "default_batch_type", rename = "type")]
    pub search_type: SearchType,
}

fn default_batch_type() -> SearchType {
    SearchType::Track
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSearchEntry {
    pub index: usize,
    pub query: String,
    #[serde(rename = "type")]
    pub search_type: SearchType,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<SearchResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_match: Option<Track>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnresolvedReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSearchOutcome {
    pub results: Vec<BatchSearchEntry>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The search half of assembly on its own: candidates plus the best pick
/// for every query, in request order. Never mutates anything.
pub async fn batch_search(
    catalog: Arc<dyn Catalog>,
    session: &Session,
    queries: Vec<BatchQuery>,
    limit_per_query: u32,
    config: &AssemblerConfig,
) -> Result<BatchSearchOutcome, ToolError> {
    validate_batch(queries.len(), config.batch_cap)?;
    if let Some(pos) = queries.iter().position(|q| q.query.query.trim().is_empty()) {
        return Err(ToolError::validation(format!("Query at index {pos} is empty")));
    }

    let types: Vec<SearchType> = queries.iter().map(|q| q.search_type).collect();
    let jobs = queries
        .into_iter()
        .map(|q| SearchJob {
            kinds: q.search_type.kinds(),
            query: q.query,
            limit: limit_per_query,
        })
        .collect();
    let searched = search_all(
        &catalog,
        session,
        jobs,
        config.concurrency,
        config.query_timeout,
    )
    .await?;

    let mut entries = Vec::with_capacity(searched.len());
    for (index, ((query, result), search_type)) in searched.into_iter().zip(types).enumerate() {
        let entry = match result {
            Ok(results) => {
                let picked = if results.tracks.is_empty() {
                    None
                } else {
                    Some(match_query(&query, &results.tracks, &config.matching))
                };
                BatchSearchEntry {
                    index,
                    query: query.query,
                    search_type,
                    status: "ok",
                    best_match: picked.as_ref().and_then(|m| m.best.clone()),
                    confidence: picked.as_ref().map(|m| m.confidence),
                    reason: None,
                    error: None,
                    results: Some(results),
                }
            }
            Err(e) => BatchSearchEntry {
                index,
                query: query.query,
                search_type,
                status: "error",
                results: None,
                best_match: None,
                confidence: None,
                reason: Some(UnresolvedReason::from_error(&e)),
                error: Some(e.to_string()),
            },
        };
        entries.push(entry);
    }

    let failed = entries.iter().filter(|e| e.status == "error").count();
    Ok(BatchSearchOutcome {
        total: entries.len(),
        succeeded: entries.len() - failed,
        failed,
        results: entries,
    })
}
