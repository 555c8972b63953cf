use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::catalog::Catalog;
use crate::error::ToolError;
use crate::session::Session;
use crate::types::Track;

pub const MAX_PER_SEED: u32 = 50;

#[derive(Debug, Clone, Copy)]
pub struct RecommendOptions {
    pub limit_per_seed: u32,
    /// Cap on the merged list; unlimited when `None`.
    pub limit: Option<usize>,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedSeed {
    pub track_id: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
    pub recommendations: Vec<Track>,
    pub failed_seeds: Vec<FailedSeed>,
}

/// Merge per-seed results in seed order; first occurrence of a track wins.
fn merge(per_seed: Vec<(String, Vec<Track>)>, limit: Option<usize>) -> Vec<Track> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for (seed, tracks) in per_seed {
        for mut track in tracks {
            if !seen.insert(track.id.clone()) {
                continue;
            }
            track.source_track_id = Some(seed.clone());
            merged.push(track);
        }
    }
    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    merged
}

/// Fetch similar tracks for every seed and merge them. A failing seed is
/// reported, not fatal, unless the session itself is rejected.
pub async fn recommend(
    catalog: Arc<dyn Catalog>,
    session: &Session,
    seeds: &[String],
    options: RecommendOptions,
) -> Result<Recommendations, ToolError> {
    let limit_per_seed = options.limit_per_seed.clamp(1, MAX_PER_SEED);
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut handles = Vec::with_capacity(seeds.len());

    for seed in seeds {
        let sem = semaphore.clone();
        let catalog = catalog.clone();
        let session = session.clone();
        let seed = seed.clone();
        handles.push(tokio::task::spawn(async move {
            let result = match sem.acquire().await {
                Ok(_permit) => catalog.similar_tracks(&session, &seed, limit_per_seed).await,
                Err(_) => Err(ToolError::UpstreamUnavailable(
                    "recommendation worker pool closed".to_string(),
                )),
            };
            (seed, result)
        }));
    }

    let mut per_seed = Vec::with_capacity(handles.len());
    let mut failed_seeds = Vec::new();
    for handle in handles {
        let (seed, result) = handle
            .await
            .map_err(|e| ToolError::UpstreamUnavailable(format!("recommendation task failed: {e}")))?;
        match result {
            Ok(tracks) => per_seed.push((seed, tracks)),
            Err(e @ ToolError::AuthRequired(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(seed = %seed, error = %e, "similar-track lookup failed");
                failed_seeds.push(FailedSeed {
                    track_id: seed,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(Recommendations {
        recommendations: merge(per_seed, options.limit),
        failed_seeds,
    })
}
