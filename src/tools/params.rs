use schemars::JsonSchema;
use serde::Deserialize;

use crate::assembler::BatchQuery;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FavoriteTracksParams {
    #[schemars(description = "Number of tracks to return (default 20, max 50)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Search text, e.g. an artist, album or song name")]
    pub query: String,
    #[schemars(description = "Restrict results: track, album, artist, playlist, or all (default)")]
    pub search_type: Option<String>,
    #[schemars(description = "Max results per type (default 50, max 300)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BatchSearchParams {
    #[schemars(
        description = "Queries to run, each {query, type?, artist?, duration?}. At most 100."
    )]
    pub queries: Vec<BatchQuery>,
    #[schemars(description = "Results per query (default 5, max 20)")]
    pub limit_per_query: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SongsPlaylistParams {
    #[schemars(description = "Playlist title")]
    pub title: String,
    #[schemars(
        description = "Free-text song descriptions such as 'Bohemian Rhapsody Queen' (1-100)"
    )]
    pub song_descriptions: Vec<String>,
    #[schemars(description = "Optional playlist description")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecommendParams {
    #[schemars(
        description = "Seed track ids. When omitted, the user's most recent favorites are used."
    )]
    pub track_ids: Option<Vec<String>>,
    #[schemars(
        description = "Free-text criteria (genre, mood, era). Echoed back for you to apply; not filtered server-side."
    )]
    pub filter_criteria: Option<String>,
    #[schemars(description = "Similar tracks fetched per seed (default 20, max 50)")]
    pub limit_per_track: Option<u32>,
    #[schemars(description = "Favorites used as seeds when no track_ids are given (default 20, max 50)")]
    pub limit_from_favorite: Option<u32>,
    #[schemars(description = "Cap on the merged recommendation list")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreatePlaylistParams {
    #[schemars(description = "Playlist title")]
    pub title: String,
    #[schemars(description = "Track ids to add, in order")]
    pub track_ids: Vec<String>,
    #[schemars(description = "Optional playlist description")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddTracksParams {
    #[schemars(description = "Target playlist id")]
    pub playlist_id: String,
    #[schemars(description = "Track ids to append, in order")]
    pub track_ids: Vec<String>,
    #[schemars(description = "Add tracks already in the playlist again (default false)")]
    pub allow_duplicates: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlaylistTracksParams {
    #[schemars(description = "Playlist id")]
    pub playlist_id: String,
    #[schemars(description = "Max tracks to return (default 100, max 500)")]
    pub limit: Option<u32>,
    #[schemars(description = "Tracks to skip from the start (default 0)")]
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlaylistIdParams {
    #[schemars(description = "Playlist id")]
    pub playlist_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadIdParams {
    #[schemars(description = "TIDAL id of the item to download")]
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadFavoritesParams {
    #[schemars(description = "Which favorites to download: tracks (default), albums, artists, videos")]
    pub favorite_type: Option<String>,
}
