use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::Catalog;
use crate::error::ToolError;
use crate::session::Session;
use crate::types::{
    Album, Artist, PlaylistPage, PlaylistSummary, SearchKind, SearchResults, TopHit, Track,
    album_url, artist_url, playlist_url, track_url,
};

/// Upstream page size for playlist item and playlist listings.
const PAGE_CHUNK: u32 = 100;
const RETRY_PAUSE: Duration = Duration::from_millis(500);

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn segment(s: &str) -> String {
    utf8_percent_encode(s, PATH_SEGMENT).to_string()
}

// --- Upstream records ---

/// Ids arrive as numbers for tracks/albums/artists and as UUID strings for
/// playlists.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(u64),
    Text(String),
}

fn id_string(raw: Option<RawId>) -> Option<String> {
    match raw? {
        RawId::Num(n) => Some(n.to_string()),
        RawId::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        RawId::Text(_) => None,
    }
}

#[derive(Deserialize)]
struct RawNamed {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawAlbumRef {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct RawTrack {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    duration: Option<u32>,
    #[serde(default)]
    popularity: Option<u32>,
    #[serde(default)]
    artist: Option<RawNamed>,
    #[serde(default)]
    artists: Vec<RawNamed>,
    #[serde(default)]
    album: Option<RawAlbumRef>,
}

impl RawTrack {
    fn into_track(self) -> Option<Track> {
        let id = id_string(self.id)?;
        let artists: Vec<String> = self.artists.into_iter().filter_map(|a| a.name).collect();
        let artist = self
            .artist
            .and_then(|a| a.name)
            .or_else(|| artists.first().cloned())
            .unwrap_or_else(|| "Unknown".to_string());
        let artists = if artists.is_empty() {
            vec![artist.clone()]
        } else {
            artists
        };
        let base_title = self.title.unwrap_or_else(|| "Unknown".to_string());
        let title = match self.version.filter(|v| !v.trim().is_empty()) {
            Some(version) if !base_title.contains(&version) => format!("{base_title} ({version})"),
            _ => base_title,
        };
        Some(Track {
            url: track_url(&id),
            id,
            title,
            artist,
            artists,
            album: self
                .album
                .and_then(|a| a.title)
                .unwrap_or_else(|| "Unknown".to_string()),
            duration: self.duration.unwrap_or(0),
            popularity: self.popularity.unwrap_or(0),
            source_track_id: None,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAlbum {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<RawNamed>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    number_of_tracks: Option<u32>,
    #[serde(default)]
    duration: Option<u32>,
}

impl RawAlbum {
    fn into_album(self) -> Option<Album> {
        let id = id_string(self.id)?;
        Some(Album {
            url: album_url(&id),
            id,
            title: self.title.unwrap_or_else(|| "Unknown".to_string()),
            artist: self
                .artist
                .and_then(|a| a.name)
                .unwrap_or_else(|| "Unknown".to_string()),
            release_date: self.release_date,
            num_tracks: self.number_of_tracks.unwrap_or(0),
            duration: self.duration.unwrap_or(0),
        })
    }
}

#[derive(Deserialize)]
struct RawArtist {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    name: Option<String>,
}

impl RawArtist {
    fn into_artist(self) -> Option<Artist> {
        let id = id_string(self.id)?;
        Some(Artist {
            url: artist_url(&id),
            id,
            name: self.name.unwrap_or_else(|| "Unknown".to_string()),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlaylist {
    #[serde(default)]
    uuid: Option<RawId>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    number_of_tracks: Option<u32>,
    #[serde(default)]
    duration: Option<u32>,
}

impl RawPlaylist {
    fn into_summary(self) -> Option<PlaylistSummary> {
        let id = id_string(self.uuid)?;
        Some(PlaylistSummary {
            url: playlist_url(&id),
            id,
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            created: self.created,
            last_updated: self.last_updated,
            track_count: self.number_of_tracks.unwrap_or(0),
            duration: self.duration.unwrap_or(0),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    total_number_of_items: Option<u32>,
}

/// Wrapper used by favorites and playlist item listings.
#[derive(Deserialize)]
struct RawWrapped<T> {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    item: T,
}

#[derive(Deserialize)]
struct RawTopHit {
    #[serde(rename = "type")]
    kind: String,
    value: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSearch {
    #[serde(default)]
    top_hit: Option<RawTopHit>,
    #[serde(default)]
    tracks: Option<RawPage<RawTrack>>,
    #[serde(default)]
    albums: Option<RawPage<RawAlbum>>,
    #[serde(default)]
    artists: Option<RawPage<RawArtist>>,
    #[serde(default)]
    playlists: Option<RawPage<RawPlaylist>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawErrorBody {
    #[serde(default)]
    user_message: Option<String>,
}

fn collect<T, U>(items: Vec<T>, convert: impl Fn(T) -> Option<U>, what: &str) -> Vec<U> {
    let total = items.len();
    let kept: Vec<U> = items.into_iter().filter_map(convert).collect();
    if kept.len() < total {
        tracing::debug!(dropped = total - kept.len(), what, "dropped records without an id");
    }
    kept
}

fn top_hit(raw: RawTopHit) -> Option<TopHit> {
    let parsed = match raw.kind.as_str() {
        "TRACKS" => serde_json::from_value::<RawTrack>(raw.value)
            .ok()
            .and_then(RawTrack::into_track)
            .map(TopHit::Track),
        "ALBUMS" => serde_json::from_value::<RawAlbum>(raw.value)
            .ok()
            .and_then(RawAlbum::into_album)
            .map(TopHit::Album),
        "ARTISTS" => serde_json::from_value::<RawArtist>(raw.value)
            .ok()
            .and_then(RawArtist::into_artist)
            .map(TopHit::Artist),
        "PLAYLISTS" => serde_json::from_value::<RawPlaylist>(raw.value)
            .ok()
            .and_then(RawPlaylist::into_summary)
            .map(TopHit::Playlist),
        _ => None,
    };
    if parsed.is_none() {
        tracing::debug!(kind = %raw.kind, "ignoring unusable top hit");
    }
    parsed
}

fn into_search_results(raw: RawSearch, kinds: &[SearchKind]) -> SearchResults {
    let wants = |kind: SearchKind| kinds.contains(&kind);
    let mut results = SearchResults {
        top_hit: raw.top_hit.and_then(top_hit),
        ..SearchResults::default()
    };
    if wants(SearchKind::Track)
        && let Some(page) = raw.tracks
    {
        results.tracks = collect(page.items, RawTrack::into_track, "track");
    }
    if wants(SearchKind::Album)
        && let Some(page) = raw.albums
    {
        results.albums = collect(page.items, RawAlbum::into_album, "album");
    }
    if wants(SearchKind::Artist)
        && let Some(page) = raw.artists
    {
        results.artists = collect(page.items, RawArtist::into_artist, "artist");
    }
    if wants(SearchKind::Playlist)
        && let Some(page) = raw.playlists
    {
        results.playlists = collect(page.items, RawPlaylist::into_summary, "playlist");
    }
    results
}

// --- Client ---

pub struct TidalCatalog {
    http: Client,
    base_url: String,
}

impl TidalCatalog {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: Method, session: &Session, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .header(reqwest::header::AUTHORIZATION, session.authorization())
            .query(&[("countryCode", session.country_code.as_str())])
    }

    /// Send once and map non-success statuses onto `ToolError`.
    async fn send(req: RequestBuilder, context: &str) -> Result<Response, ToolError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ToolError::from_transport(&e, context))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<RawErrorBody>(&body)
            .ok()
            .and_then(|b| b.user_message)
            .unwrap_or_else(|| body.chars().take(200).collect());
        let message = if detail.is_empty() {
            format!("{context}: HTTP {status}")
        } else {
            format!("{context}: HTTP {status}: {detail}")
        };
        Err(ToolError::from_status(status.as_u16(), message))
    }

    /// Read-only GET with one retry on transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        params: &[(&str, String)],
        context: &str,
    ) -> Result<T, ToolError> {
        let mut attempt = 0;
        loop {
            let req = self.request(Method::GET, session, path).query(params);
            let result = match Self::send(req, context).await {
                Ok(resp) => resp.json::<T>().await.map_err(|e| {
                    ToolError::UpstreamUnavailable(format!("{context}: unexpected response: {e}"))
                }),
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.is_transient() && attempt == 0 => {
                    attempt += 1;
                    tracing::debug!(context, error = %e, "retrying read after transient failure");
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                other => return other,
            }
        }
    }

    /// Current ETag and track count of a playlist.
    async fn playlist_state(
        &self,
        session: &Session,
        playlist_id: &str,
    ) -> Result<(String, u32), ToolError> {
        let req = self.request(
            Method::GET,
            session,
            &format!("playlists/{}", segment(playlist_id)),
        );
        let resp = Self::send(req, "playlist lookup").await?;
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("*")
            .to_string();
        let raw: RawPlaylist = resp.json().await.map_err(|e| {
            ToolError::UpstreamUnavailable(format!("playlist lookup: unexpected response: {e}"))
        })?;
        Ok((etag, raw.number_of_tracks.unwrap_or(0)))
    }
}

#[async_trait]
impl Catalog for TidalCatalog {
    async fn search(
        &self,
        session: &Session,
        query: &str,
        kinds: &[SearchKind],
        limit: u32,
    ) -> Result<SearchResults, ToolError> {
        let types = kinds
            .iter()
            .map(|k| k.as_upstream())
            .collect::<Vec<_>>()
            .join(",");
        let raw: RawSearch = self
            .get_json(
                session,
                "search",
                &[
                    ("query", query.to_string()),
                    ("limit", limit.to_string()),
                    ("offset", "0".to_string()),
                    ("types", types),
                ],
                "search",
            )
            .await?;
        Ok(into_search_results(raw, kinds))
    }

    async fn track(&self, session: &Session, track_id: &str) -> Result<Track, ToolError> {
        let raw: RawTrack = self
            .get_json(
                session,
                &format!("tracks/{}", segment(track_id)),
                &[],
                "track lookup",
            )
            .await?;
        raw.into_track()
            .ok_or_else(|| ToolError::NotFound(format!("track {track_id} has no usable id")))
    }

    async fn favorite_tracks(
        &self,
        session: &Session,
        limit: u32,
    ) -> Result<Vec<Track>, ToolError> {
        let page: RawPage<RawWrapped<RawTrack>> = self
            .get_json(
                session,
                &format!("users/{}/favorites/tracks", session.user_id),
                &[
                    ("limit", limit.to_string()),
                    ("order", "DATE".to_string()),
                    ("orderDirection", "DESC".to_string()),
                ],
                "favorites",
            )
            .await?;
        Ok(collect(page.items, |w| w.item.into_track(), "favorite"))
    }

    async fn similar_tracks(
        &self,
        session: &Session,
        track_id: &str,
        limit: u32,
    ) -> Result<Vec<Track>, ToolError> {
        let page: RawPage<RawTrack> = self
            .get_json(
                session,
                &format!("tracks/{}/radio", segment(track_id)),
                &[("limit", limit.to_string())],
                "track radio",
            )
            .await?;
        Ok(collect(page.items, RawTrack::into_track, "radio track"))
    }

    async fn create_playlist(
        &self,
        session: &Session,
        title: &str,
        description: &str,
    ) -> Result<PlaylistSummary, ToolError> {
        let req = self
            .request(
                Method::POST,
                session,
                &format!("users/{}/playlists", session.user_id),
            )
            .form(&[("title", title), ("description", description)]);
        let resp = Self::send(req, "create playlist").await?;
        let raw: RawPlaylist = resp.json().await.map_err(|e| {
            ToolError::UpstreamUnavailable(format!("create playlist: unexpected response: {e}"))
        })?;
        let summary = raw.into_summary().ok_or_else(|| {
            ToolError::UpstreamUnavailable("create playlist: response carried no id".to_string())
        })?;
        tracing::info!(playlist_id = %summary.id, "created playlist");
        Ok(summary)
    }

    async fn add_tracks(
        &self,
        session: &Session,
        playlist_id: &str,
        track_ids: &[String],
        allow_duplicates: bool,
    ) -> Result<usize, ToolError> {
        if track_ids.is_empty() {
            return Ok(0);
        }
        let (etag, before) = self.playlist_state(session, playlist_id).await?;
        let on_dupes = if allow_duplicates { "ADD" } else { "SKIP" };
        let req = self
            .request(
                Method::POST,
                session,
                &format!("playlists/{}/items", segment(playlist_id)),
            )
            .header(reqwest::header::IF_NONE_MATCH, etag)
            .form(&[
                ("trackIds", track_ids.join(",")),
                ("onDupes", on_dupes.to_string()),
                ("onArtifactNotFound", "SKIP".to_string()),
            ]);
        Self::send(req, "add tracks").await?;
        let added = match self.playlist_state(session, playlist_id).await {
            Ok((_, after)) => after.saturating_sub(before) as usize,
            Err(e) => {
                tracing::warn!(playlist_id, error = %e, "could not re-read playlist after adding tracks");
                track_ids.len()
            }
        };
        tracing::info!(
            playlist_id,
            submitted = track_ids.len(),
            added,
            "added tracks to playlist"
        );
        Ok(added)
    }

    async fn user_playlists(&self, session: &Session) -> Result<Vec<PlaylistSummary>, ToolError> {
        let path = format!("users/{}/playlists", session.user_id);
        let mut playlists = Vec::new();
        let mut offset = 0u32;
        loop {
            let page: RawPage<RawPlaylist> = self
                .get_json(
                    session,
                    &path,
                    &[
                        ("limit", PAGE_CHUNK.to_string()),
                        ("offset", offset.to_string()),
                    ],
                    "list playlists",
                )
                .await?;
            let fetched = page.items.len() as u32;
            playlists.extend(collect(page.items, RawPlaylist::into_summary, "playlist"));
            offset += fetched;
            let total = page.total_number_of_items.unwrap_or(offset);
            if fetched < PAGE_CHUNK || offset >= total {
                break;
            }
        }
        Ok(playlists)
    }

    async fn playlist(
        &self,
        session: &Session,
        playlist_id: &str,
    ) -> Result<PlaylistSummary, ToolError> {
        let raw: RawPlaylist = self
            .get_json(
                session,
                &format!("playlists/{}", segment(playlist_id)),
                &[],
                "playlist lookup",
            )
            .await?;
        raw.into_summary()
            .ok_or_else(|| ToolError::NotFound(format!("playlist {playlist_id} not found")))
    }

    async fn playlist_tracks(
        &self,
        session: &Session,
        playlist_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<PlaylistPage, ToolError> {
        let path = format!("playlists/{}/items", segment(playlist_id));
        let mut tracks = Vec::new();
        let mut cursor = offset;
        let mut total_available = 0u32;
        while (tracks.len() as u32) < limit {
            let want = (limit - tracks.len() as u32).min(PAGE_CHUNK);
            let page: RawPage<RawWrapped<RawTrack>> = self
                .get_json(
                    session,
                    &path,
                    &[("limit", want.to_string()), ("offset", cursor.to_string())],
                    "playlist items",
                )
                .await?;
            let fetched = page.items.len() as u32;
            total_available = page.total_number_of_items.unwrap_or(cursor + fetched);
            tracks.extend(collect(
                page.items,
                |w| match w.kind.as_deref() {
                    None | Some("track") => w.item.into_track(),
                    Some(_) => None,
                },
                "playlist item",
            ));
            cursor += fetched;
            if fetched < want || cursor >= total_available {
                break;
            }
        }
        tracks.truncate(limit as usize);
        Ok(PlaylistPage {
            playlist_id: playlist_id.to_string(),
            tracks,
            total_available,
            offset,
            limit,
        })
    }

    async fn delete_playlist(
        &self,
        session: &Session,
        playlist_id: &str,
    ) -> Result<(), ToolError> {
        let req = self.request(
            Method::DELETE,
            session,
            &format!("playlists/{}", segment(playlist_id)),
        );
        Self::send(req, "delete playlist").await?;
        tracing::info!(playlist_id, "deleted playlist");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tracks_without_ids_are_rejected() {
        let raw: RawPage<RawTrack> = serde_json::from_value(json!({
            "items": [
                { "id": 77, "title": "Bohemian Rhapsody", "duration": 354, "popularity": 88,
                  "artist": { "id": 1, "name": "Queen" },
                  "artists": [{ "id": 1, "name": "Queen" }],
                  "album": { "id": 9, "title": "A Night at the Opera" } },
                { "title": "Ghost Track" },
                { "id": "", "title": "Blank Id" }
            ],
            "totalNumberOfItems": 3
        }))
        .unwrap();
        let tracks = collect(raw.items, RawTrack::into_track, "track");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, "77");
        assert_eq!(tracks[0].artist, "Queen");
        assert_eq!(tracks[0].album, "A Night at the Opera");
        assert_eq!(tracks[0].url, "https://tidal.com/browse/track/77");
    }

    #[test]
    fn version_is_appended_to_title_once() {
        let raw: RawTrack = serde_json::from_value(json!({
            "id": 5, "title": "Hey Jude", "version": "Remastered 2015",
            "artists": [{ "name": "The Beatles" }]
        }))
        .unwrap();
        let track = raw.into_track().unwrap();
        assert_eq!(track.title, "Hey Jude (Remastered 2015)");
        assert_eq!(track.artist, "The Beatles");
        assert_eq!(track.artists, vec!["The Beatles".to_string()]);
    }

    #[test]
    fn search_response_maps_top_hit_and_requested_kinds() {
        let raw: RawSearch = serde_json::from_value(json!({
            "topHit": { "type": "ARTISTS", "value": { "id": 8, "name": "Queen" } },
            "tracks": { "items": [{ "id": 1, "title": "Radio Ga Ga" }] },
            "albums": { "items": [{ "id": 2, "title": "Innuendo", "numberOfTracks": 12 }] },
            "playlists": { "items": [{ "uuid": "abc-def", "title": "Queen Essentials",
                                       "lastUpdated": "2024-01-01T00:00:00.000+0000" }] }
        }))
        .unwrap();
        let results = into_search_results(raw, &[SearchKind::Track, SearchKind::Playlist]);
        match results.top_hit {
            Some(TopHit::Artist(ref artist)) => assert_eq!(artist.name, "Queen"),
            ref other => panic!("unexpected top hit: {other:?}"),
        }
        assert_eq!(results.tracks.len(), 1);
        assert!(results.albums.is_empty());
        assert_eq!(results.playlists[0].id, "abc-def");
        assert_eq!(results.playlists[0].url, "https://tidal.com/playlist/abc-def");
    }

    #[test]
    fn wrapped_items_unwrap_to_tracks() {
        let raw: RawPage<RawWrapped<RawTrack>> = serde_json::from_value(json!({
            "items": [
                { "created": "2024-05-01", "item": { "id": 10, "title": "A" } },
                { "type": "track", "item": { "id": 11, "title": "B" } }
            ]
        }))
        .unwrap();
        let ids: Vec<String> = collect(raw.items, |w| w.item.into_track(), "favorite")
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["10", "11"]);
    }

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!(segment("abc-123_x.y~z"), "abc-123_x.y~z");
        assert_eq!(segment("../etc"), "..%2Fetc");
    }

    // --- Against a local upstream ---

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::{get, post};
    use axum::{Form, Json, Router};

    use crate::session::test_session;

    const BIG_PLAYLIST_LEN: u32 = 200;
    const SMALL_ETAG: &str = "\"etag-small\"";

    #[derive(Default)]
    struct Upstream {
        item_windows: Mutex<Vec<(u32, u32)>>,
        track_hits: Mutex<HashMap<String, usize>>,
        create_hits: Mutex<usize>,
        small_tracks: Mutex<Vec<String>>,
    }

    type Shared = Arc<Upstream>;

    #[derive(Deserialize)]
    struct Window {
        limit: u32,
        offset: u32,
    }

    async fn big_items(State(up): State<Shared>, Query(w): Query<Window>) -> Json<serde_json::Value> {
        up.item_windows.lock().unwrap().push((w.offset, w.limit));
        let end = (w.offset + w.limit).min(BIG_PLAYLIST_LEN);
        let items: Vec<_> = (w.offset..end)
            .map(|i| json!({ "type": "track", "item": { "id": i, "title": format!("Song {i}") } }))
            .collect();
        Json(json!({ "items": items, "totalNumberOfItems": BIG_PLAYLIST_LEN }))
    }

    async fn lookup_track(State(up): State<Shared>, Path(id): Path<String>) -> AxumResponse {
        let hits = {
            let mut all = up.track_hits.lock().unwrap();
            let hits = all.entry(id.clone()).or_default();
            *hits += 1;
            *hits
        };
        if id == "down" || hits == 1 {
            return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
        }
        Json(json!({ "id": id.parse::<u64>().unwrap_or(0), "title": "Recovered" })).into_response()
    }

    async fn create_playlist(State(up): State<Shared>) -> AxumResponse {
        *up.create_hits.lock().unwrap() += 1;
        (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response()
    }

    async fn small_playlist(State(up): State<Shared>) -> AxumResponse {
        let count = up.small_tracks.lock().unwrap().len();
        (
            [(header::ETAG, SMALL_ETAG)],
            Json(json!({ "uuid": "small", "title": "Small", "numberOfTracks": count })),
        )
            .into_response()
    }

    async fn add_small_items(
        State(up): State<Shared>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> AxumResponse {
        if headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) != Some(SMALL_ETAG) {
            return StatusCode::PRECONDITION_FAILED.into_response();
        }
        let skip_dupes = form.get("onDupes").map(String::as_str) == Some("SKIP");
        let mut tracks = up.small_tracks.lock().unwrap();
        for id in form.get("trackIds").map(String::as_str).unwrap_or("").split(',') {
            if !(skip_dupes && tracks.iter().any(|t| t == id)) {
                tracks.push(id.to_string());
            }
        }
        Json(json!({ "lastUpdated": 1 })).into_response()
    }

    async fn spawn_upstream(up: Shared) -> String {
        let app = Router::new()
            .route("/playlists/big/items", get(big_items))
            .route("/playlists/small", get(small_playlist))
            .route("/playlists/small/items", post(add_small_items))
            .route("/tracks/{id}", get(lookup_track))
            .route("/users/{uid}/playlists", post(create_playlist))
            .with_state(up);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn catalog_with(up: &Shared) -> TidalCatalog {
        let base = spawn_upstream(up.clone()).await;
        TidalCatalog::new(Client::new(), base)
    }

    fn ids(page: &PlaylistPage) -> Vec<String> {
        page.tracks.iter().map(|t| t.id.clone()).collect()
    }

    #[tokio::test]
    async fn playlist_window_comes_back_in_playlist_order() {
        let up = Shared::default();
        let catalog = catalog_with(&up).await;
        let page = catalog
            .playlist_tracks(&test_session(), "big", 50, 25)
            .await
            .unwrap();
        let expected: Vec<String> = (50..75).map(|i| i.to_string()).collect();
        assert_eq!(ids(&page), expected);
        assert_eq!(page.total_available, 200);
        assert_eq!(*up.item_windows.lock().unwrap(), vec![(50, 25)]);
    }

    #[tokio::test]
    async fn large_windows_are_fetched_in_chunks_of_one_hundred() {
        let up = Shared::default();
        let catalog = catalog_with(&up).await;
        let page = catalog
            .playlist_tracks(&test_session(), "big", 30, 150)
            .await
            .unwrap();
        let expected: Vec<String> = (30..180).map(|i| i.to_string()).collect();
        assert_eq!(ids(&page), expected);
        assert_eq!(*up.item_windows.lock().unwrap(), vec![(30, 100), (130, 50)]);
    }

    #[tokio::test]
    async fn window_past_the_end_stops_at_the_last_track() {
        let up = Shared::default();
        let catalog = catalog_with(&up).await;
        let page = catalog
            .playlist_tracks(&test_session(), "big", 150, 500)
            .await
            .unwrap();
        assert_eq!(page.tracks.len(), 50);
        assert_eq!(page.tracks.last().map(|t| t.id.as_str()), Some("199"));
        assert_eq!(page.total_available, 200);
        assert_eq!(*up.item_windows.lock().unwrap(), vec![(150, 100)]);
    }

    #[tokio::test]
    async fn transient_read_failure_is_retried_once() {
        let up = Shared::default();
        let catalog = catalog_with(&up).await;
        let track = catalog.track(&test_session(), "5").await.unwrap();
        assert_eq!(track.id, "5");
        assert_eq!(track.title, "Recovered");
        assert_eq!(up.track_hits.lock().unwrap()["5"], 2);
    }

    #[tokio::test]
    async fn persistent_read_failure_gives_up_after_one_retry() {
        let up = Shared::default();
        let catalog = catalog_with(&up).await;
        let err = catalog.track(&test_session(), "down").await.unwrap_err();
        assert_eq!(err.kind(), "UpstreamUnavailable");
        assert_eq!(up.track_hits.lock().unwrap()["down"], 2);
    }

    #[tokio::test]
    async fn mutating_calls_are_never_retried() {
        let up = Shared::default();
        let catalog = catalog_with(&up).await;
        let err = catalog
            .create_playlist(&test_session(), "Retry Me", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UpstreamUnavailable");
        assert_eq!(*up.create_hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn added_count_reflects_skipped_duplicates() {
        let up = Shared::default();
        up.small_tracks.lock().unwrap().push("1".to_string());
        let catalog = catalog_with(&up).await;
        let ids = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let added = catalog
            .add_tracks(&test_session(), "small", &ids, false)
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(*up.small_tracks.lock().unwrap(), vec!["1", "2", "3"]);
    }
}
