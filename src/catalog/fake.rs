//! In-memory catalog for orchestration and router tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::Catalog;
use crate::error::ToolError;
use crate::session::Session;
use crate::types::{
    PlaylistPage, PlaylistSummary, SearchKind, SearchResults, Track, playlist_url, track_url,
};

#[derive(Debug, Default, Clone)]
pub struct CallLog {
    pub searches: Vec<String>,
    pub creates: usize,
    pub adds: usize,
    pub last_added: Vec<String>,
    pub similar: Vec<String>,
    pub deletes: Vec<String>,
}

#[derive(Default)]
struct Inner {
    /// Query text => search hits, in upstream order.
    search_hits: HashMap<String, Vec<Track>>,
    search_errors: HashMap<String, ToolError>,
    search_delays: HashMap<String, Duration>,
    similar: HashMap<String, Vec<Track>>,
    similar_errors: HashMap<String, ToolError>,
    favorites: Vec<Track>,
    playlists: Vec<(PlaylistSummary, Vec<Track>)>,
    create_error: Option<ToolError>,
    add_error: Option<ToolError>,
    next_playlist: u32,
    log: CallLog,
}

#[derive(Default)]
pub struct FakeCatalog {
    inner: Mutex<Inner>,
}

pub fn track(id: &str, title: &str, artist: &str) -> Track {
    Track {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        artists: vec![artist.to_string()],
        album: String::new(),
        duration: 200,
        popularity: 50,
        url: track_url(id),
        source_track_id: None,
    }
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn with_search(self, query: &str, hits: Vec<Track>) -> Self {
        self.inner().search_hits.insert(query.to_string(), hits);
        self
    }

    pub fn with_search_error(self, query: &str, err: ToolError) -> Self {
        self.inner().search_errors.insert(query.to_string(), err);
        self
    }

    pub fn with_search_delay(self, query: &str, delay: Duration) -> Self {
        self.inner().search_delays.insert(query.to_string(), delay);
        self
    }

    pub fn with_similar(self, seed: &str, tracks: Vec<Track>) -> Self {
        self.inner().similar.insert(seed.to_string(), tracks);
        self
    }

    pub fn with_similar_error(self, seed: &str, err: ToolError) -> Self {
        self.inner().similar_errors.insert(seed.to_string(), err);
        self
    }

    pub fn with_favorites(self, tracks: Vec<Track>) -> Self {
        self.inner().favorites = tracks;
        self
    }

    pub fn with_playlist(self, summary: PlaylistSummary, tracks: Vec<Track>) -> Self {
        self.inner().playlists.push((summary, tracks));
        self
    }

    pub fn failing_create(self, err: ToolError) -> Self {
        self.inner().create_error = Some(err);
        self
    }

    pub fn failing_add(self, err: ToolError) -> Self {
        self.inner().add_error = Some(err);
        self
    }

    pub fn log(&self) -> CallLog {
        self.inner().log.clone()
    }
}

pub fn playlist(id: &str, title: &str, last_updated: Option<&str>) -> PlaylistSummary {
    PlaylistSummary {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        created: None,
        last_updated: last_updated.map(String::from),
        track_count: 0,
        duration: 0,
        url: playlist_url(id),
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn search(
        &self,
        _session: &Session,
        query: &str,
        kinds: &[SearchKind],
        limit: u32,
    ) -> Result<SearchResults, ToolError> {
        let delay = {
            let mut inner = self.inner();
            inner.log.searches.push(query.to_string());
            inner.search_delays.get(query).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner();
        if let Some(err) = inner.search_errors.get(query) {
            return Err(err.clone());
        }
        let mut results = SearchResults::default();
        if kinds.contains(&SearchKind::Track) {
            results.tracks = inner
                .search_hits
                .get(query)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .take(limit as usize)
                .collect();
        }
        Ok(results)
    }

    async fn track(&self, _session: &Session, track_id: &str) -> Result<Track, ToolError> {
        let inner = self.inner();
        inner
            .search_hits
            .values()
            .flatten()
            .chain(inner.favorites.iter())
            .find(|t| t.id == track_id)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(format!("track {track_id} not found")))
    }

    async fn favorite_tracks(
        &self,
        _session: &Session,
        limit: u32,
    ) -> Result<Vec<Track>, ToolError> {
        Ok(self
            .inner()
            .favorites
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn similar_tracks(
        &self,
        _session: &Session,
        track_id: &str,
        limit: u32,
    ) -> Result<Vec<Track>, ToolError> {
        let mut inner = self.inner();
        inner.log.similar.push(track_id.to_string());
        if let Some(err) = inner.similar_errors.get(track_id) {
            return Err(err.clone());
        }
        Ok(inner
            .similar
            .get(track_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(limit as usize)
            .collect())
    }

    async fn create_playlist(
        &self,
        _session: &Session,
        title: &str,
        description: &str,
    ) -> Result<PlaylistSummary, ToolError> {
        let mut inner = self.inner();
        inner.log.creates += 1;
        if let Some(err) = inner.create_error.clone() {
            return Err(err);
        }
        inner.next_playlist += 1;
        let id = format!("pl-{}", inner.next_playlist);
        let mut summary = playlist(&id, title, Some("2025-01-01T00:00:00.000+0000"));
        summary.description = description.to_string();
        inner.playlists.push((summary.clone(), Vec::new()));
        Ok(summary)
    }

    async fn add_tracks(
        &self,
        _session: &Session,
        playlist_id: &str,
        track_ids: &[String],
        allow_duplicates: bool,
    ) -> Result<usize, ToolError> {
        let mut inner = self.inner();
        inner.log.adds += 1;
        inner.log.last_added = track_ids.to_vec();
        if let Some(err) = inner.add_error.clone() {
            return Err(err);
        }
        let Some((summary, tracks)) = inner
            .playlists
            .iter_mut()
            .find(|(p, _)| p.id == playlist_id)
        else {
            return Err(ToolError::NotFound(format!("playlist {playlist_id} not found")));
        };
        let before = tracks.len();
        for id in track_ids {
            if allow_duplicates || !tracks.iter().any(|t| &t.id == id) {
                tracks.push(track(id, id, "Unknown"));
            }
        }
        summary.track_count = tracks.len() as u32;
        Ok(tracks.len() - before)
    }

    async fn user_playlists(&self, _session: &Session) -> Result<Vec<PlaylistSummary>, ToolError> {
        Ok(self
            .inner()
            .playlists
            .iter()
            .map(|(p, _)| p.clone())
            .collect())
    }

    async fn playlist(
        &self,
        _session: &Session,
        playlist_id: &str,
    ) -> Result<PlaylistSummary, ToolError> {
        self.inner()
            .playlists
            .iter()
            .find(|(p, _)| p.id == playlist_id)
            .map(|(p, _)| p.clone())
            .ok_or_else(|| ToolError::NotFound(format!("playlist {playlist_id} not found")))
    }

    async fn playlist_tracks(
        &self,
        _session: &Session,
        playlist_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<PlaylistPage, ToolError> {
        let inner = self.inner();
        let (_, tracks) = inner
            .playlists
            .iter()
            .find(|(p, _)| p.id == playlist_id)
            .ok_or_else(|| ToolError::NotFound(format!("playlist {playlist_id} not found")))?;
        Ok(PlaylistPage {
            playlist_id: playlist_id.to_string(),
            tracks: tracks
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect(),
            total_available: tracks.len() as u32,
            offset,
            limit,
        })
    }

    async fn delete_playlist(
        &self,
        _session: &Session,
        playlist_id: &str,
    ) -> Result<(), ToolError> {
        let mut inner = self.inner();
        inner.log.deletes.push(playlist_id.to_string());
        let before = inner.playlists.len();
        inner.playlists.retain(|(p, _)| p.id != playlist_id);
        if inner.playlists.len() == before {
            return Err(ToolError::NotFound(format!("playlist {playlist_id} not found")));
        }
        Ok(())
    }
}
