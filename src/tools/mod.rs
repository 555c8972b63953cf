use std::sync::{Arc, Mutex, MutexGuard};

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use serde::Serialize;

mod login;
mod params;

use params::*;

use crate::assembler::{self, AssembleRequest, AssemblerConfig};
use crate::auth::{self, Credentials, PendingLogin};
use crate::catalog::{Catalog, TidalCatalog};
use crate::config::Config;
use crate::download::{DownloadTarget, Downloader};
use crate::error::ToolError;
use crate::matcher::SearchQuery;
use crate::recommend::{self, RecommendOptions};
use crate::session::{Session, SessionStore, unix_now};
use crate::types::{FavoriteKind, SearchResults, SearchType, sort_recent_first};

fn internal(msg: String) -> McpError {
    McpError::internal_error(msg, None)
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| internal(format!("{e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Domain failures become structured tool errors; only serialization faults
/// escape as MCP errors.
fn respond<T: Serialize>(result: Result<T, ToolError>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => json_result(&value),
        Err(e) => Ok(e.into_call_result()),
    }
}

fn bound(value: Option<u32>, default: u32, max: u32) -> u32 {
    value.unwrap_or(default).clamp(1, max)
}

fn require_non_empty(value: &str, what: &str) -> Result<String, ToolError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ToolError::validation(format!("{what} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn clean_ids(ids: &[String]) -> Vec<String> {
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

struct ServerState {
    config: Config,
    sessions: SessionStore,
    catalog: Arc<dyn Catalog>,
    http: reqwest::Client,
    downloader: Downloader,
    pending_login: Mutex<Option<PendingLogin>>,
}

#[derive(Clone)]
pub struct TidalServer {
    state: Arc<ServerState>,
    tool_router: ToolRouter<Self>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    search_type: SearchType,
    #[serde(flatten)]
    results: SearchResults,
}

impl TidalServer {
    fn pending_login(&self) -> MutexGuard<'_, Option<PendingLogin>> {
        self.state
            .pending_login
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig::from_config(&self.state.config)
    }

    /// The live session, refreshing an expired one once when a refresh
    /// token is available.
    async fn active_session(&self) -> Result<Session, ToolError> {
        let now = unix_now();
        if let Ok(session) = self.state.sessions.current(now) {
            return Ok(session);
        }
        let Some(stale) = self.state.sessions.snapshot() else {
            return Err(ToolError::auth_required());
        };
        if stale.refresh_token.is_none() {
            return Err(ToolError::auth_required());
        }
        let creds =
            Credentials::from_config(&self.state.config).map_err(|_| ToolError::auth_required())?;
        let refreshed =
            auth::refresh_session(&self.state.http, &self.state.config, &creds, &stale, now)
                .await?;
        if let Err(e) = self.state.sessions.install(refreshed.clone()) {
            tracing::warn!(error = %e, "could not persist refreshed session");
        }
        tracing::info!(user_id = refreshed.user_id, "refreshed TIDAL session");
        Ok(refreshed)
    }
}

#[tool_router]
impl TidalServer {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tidal-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        let sessions = SessionStore::open(config.session_path.clone());
        let catalog: Arc<dyn Catalog> = Arc::new(TidalCatalog::new(http.clone(), &config.api_base));
        Ok(Self::with_parts(config, sessions, catalog, http))
    }

    pub(crate) fn with_parts(
        config: Config,
        sessions: SessionStore,
        catalog: Arc<dyn Catalog>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            state: Arc::new(ServerState {
                downloader: Downloader::new(config.download_tool_path.clone()),
                config,
                sessions,
                catalog,
                http,
                pending_login: Mutex::new(None),
            }),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Log in to TIDAL. Starts a browser-based device login and returns a link to open; \
                       call again after approving to finish. Reports the current session when already logged in."
    )]
    async fn tidal_login(&self) -> Result<CallToolResult, McpError> {
        respond(login::login(self).await)
    }

    #[tool(description = "Log out of TIDAL and delete the stored session")]
    async fn tidal_logout(&self) -> Result<CallToolResult, McpError> {
        *self.pending_login() = None;
        let result = self
            .state
            .sessions
            .invalidate()
            .map(|had_session| {
                serde_json::json!({
                    "status": "logged_out",
                    "had_session": had_session,
                })
            })
            .map_err(|e| internal(format!("could not remove session file: {e}")))?;
        json_result(&result)
    }

    #[tool(description = "Get the user's favorite tracks, most recently added first")]
    async fn get_favorite_tracks(
        &self,
        params: Parameters<FavoriteTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = bound(params.0.limit, 20, 50);
        let result = async {
            let session = self.active_session().await?;
            let tracks = self.state.catalog.favorite_tracks(&session, limit).await?;
            Ok(serde_json::json!({ "count": tracks.len(), "tracks": tracks }))
        }
        .await;
        respond(result)
    }

    #[tool(
        description = "Search the TIDAL catalog for tracks, albums, artists and playlists. \
                       Returns the top hit plus results grouped by type."
    )]
    async fn search_tidal(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = async {
            let query = require_non_empty(&p.query, "Search query")?;
            let search_type = match p.search_type.as_deref() {
                Some(raw) => raw.parse::<SearchType>().map_err(ToolError::validation)?,
                None => SearchType::default(),
            };
            let limit = bound(p.limit, 50, 300);
            let session = self.active_session().await?;
            let results = self
                .state
                .catalog
                .search(&session, &query, &search_type.kinds(), limit)
                .await?;
            Ok(SearchResponse {
                query,
                search_type,
                results,
            })
        }
        .await;
        respond(result)
    }

    #[tool(
        description = "Run many catalog searches in one call (max 100). Each query may carry a type, \
                       an artist hint and a duration hint; results come back in request order with \
                       the best-matching track for each."
    )]
    async fn batch_search_tidal(
        &self,
        params: Parameters<BatchSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let config = self.assembler_config();
        let result = async {
            assembler::validate_batch(p.queries.len(), config.batch_cap)?;
            let session = self.active_session().await?;
            assembler::batch_search(
                self.state.catalog.clone(),
                &session,
                p.queries,
                bound(p.limit_per_query, 5, 20),
                &config,
            )
            .await
        }
        .await;
        respond(result)
    }

    #[tool(
        description = "Create a playlist from free-text song descriptions (1-100). Each description is \
                       searched and fuzzy-matched; confident matches are added in order and the rest \
                       are reported as unmatched with a reason."
    )]
    async fn create_playlist_from_songs(
        &self,
        params: Parameters<SongsPlaylistParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let config = self.assembler_config();
        let result = async {
            require_non_empty(&p.title, "Playlist title")?;
            assembler::validate_batch(p.song_descriptions.len(), config.batch_cap)?;
            let session = self.active_session().await?;
            let request = AssembleRequest {
                title: p.title,
                description: p.description.unwrap_or_default(),
                queries: p.song_descriptions.into_iter().map(SearchQuery::text).collect(),
            };
            assembler::assemble(self.state.catalog.clone(), &session, request, &config).await
        }
        .await;
        respond(result)
    }

    #[tool(
        description = "Recommend tracks similar to the given seed track ids, or to the user's recent \
                       favorites when no ids are given. filter_criteria is echoed back for you to \
                       apply to the results."
    )]
    async fn recommend_tracks(
        &self,
        params: Parameters<RecommendParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = async {
            let session = self.active_session().await?;
            let explicit = clean_ids(p.track_ids.as_deref().unwrap_or_default());
            let (seeds, seed_tracks) = if explicit.is_empty() {
                let favorites = self
                    .state
                    .catalog
                    .favorite_tracks(&session, bound(p.limit_from_favorite, 20, 50))
                    .await?;
                let ids = favorites.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
                (ids, Some(favorites))
            } else {
                let mut found = Vec::with_capacity(explicit.len());
                for id in &explicit {
                    match self.state.catalog.track(&session, id).await {
                        Ok(track) => found.push(track),
                        Err(e @ ToolError::AuthRequired(_)) => return Err(e),
                        Err(e) => tracing::debug!(track_id = %id, error = %e, "seed lookup failed"),
                    }
                }
                (explicit, Some(found))
            };

            if seeds.is_empty() {
                return Ok(serde_json::json!({
                    "seed_track_ids": seeds,
                    "recommendations": [],
                    "failed_seeds": [],
                    "filter_criteria": p.filter_criteria,
                    "message": "No seed tracks: pass track_ids or add some favorites first.",
                }));
            }

            let options = RecommendOptions {
                limit_per_seed: bound(p.limit_per_track, 20, recommend::MAX_PER_SEED),
                limit: p.limit,
                concurrency: self.state.config.batch_concurrency,
            };
            let out =
                recommend::recommend(self.state.catalog.clone(), &session, &seeds, options).await?;
            let mut payload = serde_json::json!({
                "seed_track_ids": seeds,
                "count": out.recommendations.len(),
                "recommendations": out.recommendations,
                "failed_seeds": out.failed_seeds,
                "filter_criteria": p.filter_criteria,
            });
            if let Some(tracks) = seed_tracks {
                payload["seed_tracks"] = serde_json::to_value(tracks)
                    .map_err(|e| ToolError::UpstreamUnavailable(e.to_string()))?;
            }
            Ok(payload)
        }
        .await;
        respond(result)
    }

    #[tool(description = "Create a playlist from track ids, added in the given order")]
    async fn create_tidal_playlist(
        &self,
        params: Parameters<CreatePlaylistParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = async {
            let title = require_non_empty(&p.title, "Playlist title")?;
            let track_ids = clean_ids(&p.track_ids);
            if track_ids.is_empty() {
                return Err(ToolError::validation("At least one track id is required"));
            }
            let session = self.active_session().await?;
            let catalog = &self.state.catalog;
            let description = p.description.unwrap_or_default();
            let mut playlist = catalog.create_playlist(&session, &title, &description).await?;
            let added = catalog
                .add_tracks(&session, &playlist.id, &track_ids, false)
                .await
                .map_err(|e| ToolError::PartialFailure {
                    message: format!("Playlist '{title}' was created but adding tracks failed: {e}"),
                    details: serde_json::json!({
                        "playlist_id": playlist.id,
                        "playlist_url": playlist.url,
                        "upstream_kind": e.kind(),
                        "track_ids": track_ids,
                    }),
                })?;
            playlist.track_count = playlist.track_count.max(added as u32);
            Ok(serde_json::json!({
                "status": "success",
                "playlist": playlist,
                "tracks_added": added,
            }))
        }
        .await;
        respond(result)
    }

    #[tool(description = "Append track ids to an existing playlist, in order")]
    async fn add_tracks_to_playlist(
        &self,
        params: Parameters<AddTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = async {
            let playlist_id = require_non_empty(&p.playlist_id, "Playlist id")?;
            let track_ids = clean_ids(&p.track_ids);
            if track_ids.is_empty() {
                return Err(ToolError::validation("At least one track id is required"));
            }
            let session = self.active_session().await?;
            let added = self
                .state
                .catalog
                .add_tracks(
                    &session,
                    &playlist_id,
                    &track_ids,
                    p.allow_duplicates.unwrap_or(false),
                )
                .await?;
            Ok(serde_json::json!({
                "status": "success",
                "playlist_id": playlist_id,
                "tracks_added": added,
            }))
        }
        .await;
        respond(result)
    }

    #[tool(description = "List the user's playlists, most recently updated first")]
    async fn get_user_playlists(&self) -> Result<CallToolResult, McpError> {
        let result = async {
            let session = self.active_session().await?;
            let mut playlists = self.state.catalog.user_playlists(&session).await?;
            sort_recent_first(&mut playlists);
            Ok(serde_json::json!({ "count": playlists.len(), "playlists": playlists }))
        }
        .await;
        respond(result)
    }

    #[tool(description = "Get the tracks of a playlist, with offset/limit paging")]
    async fn get_playlist_tracks(
        &self,
        params: Parameters<PlaylistTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = async {
            let playlist_id = require_non_empty(&p.playlist_id, "Playlist id")?;
            let limit = bound(p.limit, 100, 500);
            let offset = p.offset.unwrap_or(0);
            let session = self.active_session().await?;
            let playlist = self.state.catalog.playlist(&session, &playlist_id).await?;
            let page = self
                .state
                .catalog
                .playlist_tracks(&session, &playlist_id, offset, limit)
                .await?;
            Ok(serde_json::json!({
                "playlist_id": page.playlist_id,
                "title": playlist.title,
                "count": page.tracks.len(),
                "total_available": page.total_available,
                "offset": page.offset,
                "limit": page.limit,
                "tracks": page.tracks,
            }))
        }
        .await;
        respond(result)
    }

    #[tool(description = "Delete one of the user's playlists")]
    async fn delete_tidal_playlist(
        &self,
        params: Parameters<PlaylistIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let playlist_id = require_non_empty(&params.0.playlist_id, "Playlist id")?;
            let session = self.active_session().await?;
            self.state
                .catalog
                .delete_playlist(&session, &playlist_id)
                .await?;
            Ok(serde_json::json!({
                "status": "success",
                "message": format!("Playlist {playlist_id} deleted"),
            }))
        }
        .await;
        respond(result)
    }

    #[tool(description = "Download a track with tidal-dl-ng")]
    async fn download_track(
        &self,
        params: Parameters<DownloadIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let id = require_non_empty(&params.0.id, "Track id")?;
            self.state
                .downloader
                .dispatch(DownloadTarget::Track(id))
                .await
        }
        .await;
        respond(result)
    }

    #[tool(description = "Download a full album with tidal-dl-ng")]
    async fn download_album(
        &self,
        params: Parameters<DownloadIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let id = require_non_empty(&params.0.id, "Album id")?;
            self.state
                .downloader
                .dispatch(DownloadTarget::Album(id))
                .await
        }
        .await;
        respond(result)
    }

    #[tool(description = "Download every track of a playlist with tidal-dl-ng")]
    async fn download_playlist(
        &self,
        params: Parameters<DownloadIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let id = require_non_empty(&params.0.id, "Playlist id")?;
            self.state
                .downloader
                .dispatch(DownloadTarget::Playlist(id))
                .await
        }
        .await;
        respond(result)
    }

    #[tool(description = "Download the user's favorites (tracks, albums, artists or videos) with tidal-dl-ng")]
    async fn download_favorites(
        &self,
        params: Parameters<DownloadFavoritesParams>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let kind = match params.0.favorite_type.as_deref() {
                Some(raw) => raw.parse::<FavoriteKind>().map_err(ToolError::validation)?,
                None => FavoriteKind::Tracks,
            };
            self.state
                .downloader
                .dispatch(DownloadTarget::Favorites(kind))
                .await
        }
        .await;
        respond(result)
    }

    #[tool(description = "Check whether tidal-dl-ng is installed and which version")]
    async fn download_status(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.state.downloader.status().await)
    }
}

#[tool_handler]
impl ServerHandler for TidalServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "TIDAL music server. Search the catalog, build playlists from free-text song \
                 lists, get recommendations and download with tidal-dl-ng. Call tidal_login \
                 first when a tool reports AuthRequired."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
