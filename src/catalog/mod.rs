//! Upstream catalog seam. Orchestration code talks to `dyn Catalog`; the
//! production implementation is [`tidal::TidalCatalog`].

use async_trait::async_trait;

use crate::error::ToolError;
use crate::session::Session;
use crate::types::{PlaylistPage, PlaylistSummary, SearchKind, SearchResults, Track};

#[cfg(test)]
pub mod fake;
pub mod tidal;

pub use tidal::TidalCatalog;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn search(
        &self,
        session: &Session,
        query: &str,
        kinds: &[SearchKind],
        limit: u32,
    ) -> Result<SearchResults, ToolError>;

    async fn track(&self, session: &Session, track_id: &str) -> Result<Track, ToolError>;

    /// Favorite tracks, most recently added first.
    async fn favorite_tracks(&self, session: &Session, limit: u32)
    -> Result<Vec<Track>, ToolError>;

    /// Tracks similar to `track_id` (the track radio).
    async fn similar_tracks(
        &self,
        session: &Session,
        track_id: &str,
        limit: u32,
    ) -> Result<Vec<Track>, ToolError>;

    async fn create_playlist(
        &self,
        session: &Session,
        title: &str,
        description: &str,
    ) -> Result<PlaylistSummary, ToolError>;

    /// Append `track_ids` in order. Returns how many tracks the playlist
    /// grew by, so skipped duplicates are not counted. Falls back to the
    /// number submitted when the playlist cannot be re-read afterwards.
    async fn add_tracks(
        &self,
        session: &Session,
        playlist_id: &str,
        track_ids: &[String],
        allow_duplicates: bool,
    ) -> Result<usize, ToolError>;

    async fn user_playlists(&self, session: &Session) -> Result<Vec<PlaylistSummary>, ToolError>;

    async fn playlist(
        &self,
        session: &Session,
        playlist_id: &str,
    ) -> Result<PlaylistSummary, ToolError>;

    async fn playlist_tracks(
        &self,
        session: &Session,
        playlist_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<PlaylistPage, ToolError>;

    async fn delete_playlist(&self, session: &Session, playlist_id: &str)
    -> Result<(), ToolError>;
}
