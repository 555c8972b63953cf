use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const TIDAL_WEB_BASE: &str = "https://tidal.com";

pub fn track_url(id: &str) -> String {
    format!("{TIDAL_WEB_BASE}/browse/track/{id}")
}

pub fn album_url(id: &str) -> String {
    format!("{TIDAL_WEB_BASE}/browse/album/{id}")
}

pub fn artist_url(id: &str) -> String {
    format!("{TIDAL_WEB_BASE}/browse/artist/{id}")
}

pub fn playlist_url(id: &str) -> String {
    format!("{TIDAL_WEB_BASE}/playlist/{id}")
}

/// Flat track record handed to the calling model. `id` is always the
/// upstream catalog id and never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub artists: Vec<String>,
    pub album: String,
    /// Seconds.
    pub duration: u32,
    /// Upstream popularity, 0-100.
    pub popularity: u32,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_track_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub release_date: Option<String>,
    pub num_tracks: u32,
    pub duration: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created: Option<String>,
    pub last_updated: Option<String>,
    pub track_count: u32,
    pub duration: u32,
    pub url: String,
}

/// Most recently updated first; playlists without a timestamp sink to the end.
pub fn sort_recent_first(playlists: &mut [PlaylistSummary]) {
    playlists.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
}

/// One window of a playlist's items.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistPage {
    pub playlist_id: String,
    pub tracks: Vec<Track>,
    pub total_available: u32,
    pub offset: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Track,
    Album,
    Artist,
    Playlist,
}

impl SearchKind {
    pub const ALL: [SearchKind; 4] = [Self::Track, Self::Album, Self::Artist, Self::Playlist];

    /// Value of the upstream `types` search parameter.
    pub fn as_upstream(self) -> &'static str {
        match self {
            Self::Track => "TRACKS",
            Self::Album => "ALBUMS",
            Self::Artist => "ARTISTS",
            Self::Playlist => "PLAYLISTS",
        }
    }
}

/// Search scope accepted by the search tools: a single kind or everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Track,
    Album,
    Artist,
    Playlist,
    #[default]
    All,
}

impl SearchType {
    pub fn kinds(self) -> Vec<SearchKind> {
        match self {
            Self::Track => vec![SearchKind::Track],
            Self::Album => vec![SearchKind::Album],
            Self::Artist => vec![SearchKind::Artist],
            Self::Playlist => vec![SearchKind::Playlist],
            Self::All => SearchKind::ALL.to_vec(),
        }
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "track" | "tracks" => Ok(Self::Track),
            "album" | "albums" => Ok(Self::Album),
            "artist" | "artists" => Ok(Self::Artist),
            "playlist" | "playlists" => Ok(Self::Playlist),
            "all" | "" => Ok(Self::All),
            other => Err(format!(
                "Invalid search type '{other}'. Use track, album, artist, playlist or all."
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TopHit {
    Track(Track),
    Album(Album),
    Artist(Artist),
    Playlist(PlaylistSummary),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_hit: Option<TopHit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<Track>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub albums: Vec<Album>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<Artist>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub playlists: Vec<PlaylistSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteKind {
    Tracks,
    Albums,
    Artists,
    Videos,
}

impl FavoriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tracks => "tracks",
            Self::Albums => "albums",
            Self::Artists => "artists",
            Self::Videos => "videos",
        }
    }
}

impl FromStr for FavoriteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tracks" | "" => Ok(Self::Tracks),
            "albums" => Ok(Self::Albums),
            "artists" => Ok(Self::Artists),
            "videos" => Ok(Self::Videos),
            other => Err(format!(
                "Invalid favorite type '{other}'. Use tracks, albums, artists or videos."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(id: &str, last_updated: Option<&str>) -> PlaylistSummary {
        PlaylistSummary {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            created: None,
            last_updated: last_updated.map(String::from),
            track_count: 0,
            duration: 0,
            url: playlist_url(id),
        }
    }

    #[test]
    fn playlists_sort_most_recent_first() {
        let mut lists = vec![
            playlist("old", Some("2023-01-01T00:00:00.000+0000")),
            playlist("none", None),
            playlist("new", Some("2025-06-01T00:00:00.000+0000")),
        ];
        sort_recent_first(&mut lists);
        let ids: Vec<&str> = lists.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "none"]);
    }

    #[test]
    fn top_hit_serializes_with_type_tag() {
        let hit = TopHit::Artist(Artist {
            id: "1".into(),
            name: "Queen".into(),
            url: artist_url("1"),
        });
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["type"], "artist");
        assert_eq!(json["data"]["name"], "Queen");
    }

    #[test]
    fn search_type_all_expands_to_every_kind() {
        assert_eq!(SearchType::All.kinds().len(), 4);
        assert_eq!(SearchType::Album.kinds(), vec![SearchKind::Album]);
        let parsed: SearchType = serde_json::from_str("\"playlist\"").unwrap();
        assert_eq!(parsed, SearchType::Playlist);
    }

    #[test]
    fn loose_type_names_parse_and_unknown_ones_are_rejected() {
        assert_eq!("Tracks".parse::<SearchType>(), Ok(SearchType::Track));
        assert_eq!(" ".parse::<SearchType>(), Ok(SearchType::All));
        assert!("podcasts".parse::<SearchType>().unwrap_err().contains("podcasts"));
        assert_eq!("ALBUMS".parse::<FavoriteKind>(), Ok(FavoriteKind::Albums));
        assert!("mixes".parse::<FavoriteKind>().is_err());
    }
}
