//! Best-match selection for free-text song descriptions.
//!
//! Scores are in `0.0..=1.0`. The title signal always applies; the artist and
//! duration signals only apply when the query carries the matching hint, and
//! the weights of absent signals are redistributed over the present ones.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use unicode_casefold::UnicodeCaseFold;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::types::Track;

const TITLE_WEIGHT: f64 = 0.7;
const ARTIST_WEIGHT: f64 = 0.2;
const DURATION_WEIGHT: f64 = 0.1;

/// Durations this close count as identical.
const DURATION_EXACT_SECS: f64 = 3.0;
/// Durations this far apart score zero.
const DURATION_CUTOFF_SECS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SearchQuery {
    #[schemars(description = "Song description, e.g. 'Bohemian Rhapsody Queen'")]
    pub query: String,
    #[schemars(description = "Optional artist name to weigh candidates by")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[schemars(description = "Optional expected duration in seconds")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

impl SearchQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            artist: None,
            duration: None,
        }
    }

    /// Text sent to the upstream search endpoint.
    pub fn search_text(&self) -> String {
        match self.artist.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(artist) if !normalize_text(&self.query).contains(&normalize_text(artist)) => {
                format!("{} {}", self.query.trim(), artist)
            }
            _ => self.query.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub min_confidence: f64,
    pub tie_epsilon: f64,
    /// How many runner-up candidates to report.
    pub alternatives: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.75,
            tie_epsilon: 0.02,
            alternatives: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTrack {
    pub track: Track,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub query: SearchQuery,
    /// `None` when nothing reached the confidence threshold.
    pub best: Option<Track>,
    pub confidence: f64,
    pub alternatives: Vec<ScoredTrack>,
}

/// Case-fold, strip diacritics and punctuation, collapse whitespace.
pub fn normalize_text(input: &str) -> String {
    let stripped: String = input.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let folded: String = stripped.as_str().case_fold().collect();
    folded
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}' | '`'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokens(s: &str) -> HashSet<&str> {
    s.split_whitespace().collect()
}

/// Sørensen-Dice overlap of two token sets.
fn dice(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    2.0 * shared / (a.len() + b.len()) as f64
}

fn duration_similarity(expected: u32, actual: u32) -> f64 {
    let diff = (expected as f64 - actual as f64).abs();
    if diff <= DURATION_EXACT_SECS {
        1.0
    } else if diff >= DURATION_CUTOFF_SECS {
        0.0
    } else {
        1.0 - (diff - DURATION_EXACT_SECS) / (DURATION_CUTOFF_SECS - DURATION_EXACT_SECS)
    }
}

struct PreparedQuery {
    text: String,
    artist: Option<String>,
    duration: Option<u32>,
}

impl PreparedQuery {
    fn new(query: &SearchQuery) -> Self {
        Self {
            text: normalize_text(&query.query),
            artist: query
                .artist
                .as_deref()
                .map(normalize_text)
                .filter(|a| !a.is_empty()),
            duration: query.duration.filter(|d| *d > 0),
        }
    }

    fn score(&self, track: &Track) -> f64 {
        let title = normalize_text(&track.title);
        let artists: Vec<String> = if track.artists.is_empty() {
            vec![normalize_text(&track.artist)]
        } else {
            track.artists.iter().map(|a| normalize_text(a)).collect()
        };

        let query_tokens = tokens(&self.text);
        let mut candidate_tokens = tokens(&title);
        for artist in &artists {
            candidate_tokens.extend(tokens(artist));
        }
        let title_score =
            strsim::jaro_winkler(&self.text, &title).max(dice(&query_tokens, &candidate_tokens));

        let mut weighted = TITLE_WEIGHT * title_score;
        let mut total_weight = TITLE_WEIGHT;

        if let Some(hint) = &self.artist {
            let artist_score = artists
                .iter()
                .map(|a| strsim::jaro_winkler(hint, a))
                .fold(0.0, f64::max);
            weighted += ARTIST_WEIGHT * artist_score;
            total_weight += ARTIST_WEIGHT;
        }

        if let Some(expected) = self.duration {
            weighted += DURATION_WEIGHT * duration_similarity(expected, track.duration);
            total_weight += DURATION_WEIGHT;
        }

        weighted / total_weight
    }
}

fn round_score(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}

/// Pick the best candidate for `query`. Pure and deterministic: candidate
/// order only matters for exact ties, where the earlier candidate wins.
pub fn match_query(query: &SearchQuery, candidates: &[Track], config: &MatchConfig) -> MatchResult {
    let prepared = PreparedQuery::new(query);
    let scored: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(idx, track)| (idx, prepared.score(track)))
        .collect();

    let top = scored.iter().map(|(_, s)| *s).fold(0.0, f64::max);

    let best_idx = if scored.is_empty() || top < config.min_confidence {
        None
    } else {
        scored
            .iter()
            .filter(|(_, s)| *s >= top - config.tie_epsilon && *s >= config.min_confidence)
            .max_by(|(ia, _), (ib, _)| {
                candidates[*ia]
                    .popularity
                    .cmp(&candidates[*ib].popularity)
                    .then(ib.cmp(ia))
            })
            .map(|(idx, _)| *idx)
    };

    let confidence = match best_idx {
        Some(idx) => scored[idx].1,
        None => top,
    };

    let mut rest: Vec<&(usize, f64)> = scored
        .iter()
        .filter(|(idx, _)| Some(*idx) != best_idx)
        .collect();
    rest.sort_by(|(ia, a), (ib, b)| b.total_cmp(a).then(ia.cmp(ib)));
    let alternatives = rest
        .into_iter()
        .take(config.alternatives)
        .map(|(idx, score)| ScoredTrack {
            track: candidates[*idx].clone(),
            score: round_score(*score),
        })
        .collect();

    MatchResult {
        query: query.clone(),
        best: best_idx.map(|idx| candidates[idx].clone()),
        confidence: round_score(confidence),
        alternatives,
    }
}

#[cfg(test)]
pub(crate) fn test_track(id: &str, title: &str, artist: &str, popularity: u32) -> Track {
    Track {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        artists: vec![artist.to_string()],
        album: format!("{title} (Album)"),
        duration: 240,
        popularity,
        url: crate::types::track_url(id),
        source_track_id: None,
    }
}
