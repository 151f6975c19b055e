// Duplicate detection for incoming reports.
//
// Candidates are scanned oldest first and the first qualifying match wins:
// - an exact image match (tiny Hamming distance) is sufficient on its own
// - a loose image match needs corroboration from both location and text

use crate::core::fingerprint::Fingerprint;
use crate::core::geo::{haversine_meters, Coordinates};
use crate::core::settings::Settings;
use crate::core::text;
use crate::database::models::Report;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchThresholds {
    pub exact_image_distance: u32,
    pub loose_image_distance: u32,
    pub geo_radius_meters: f64,
    pub text_similarity: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for MatchThresholds {
    fn from(settings: &Settings) -> Self {
        Self {
            exact_image_distance: settings.image_hash_threshold,
            loose_image_distance: settings.loose_image_hash_threshold,
            geo_radius_meters: settings.geo_radius_meters,
            text_similarity: settings.duplicate_threshold,
        }
    }
}

/// What the resolver knows about the report being submitted.
#[derive(Debug, Clone, Copy)]
pub struct DraftEvidence<'a> {
    pub fingerprint: Option<&'a Fingerprint>,
    pub coordinates: Coordinates,
    pub description: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    ExactImage,
    CombinedEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub report_id: String,
    pub kind: MatchKind,
    pub image_distance: u32,
    pub geo_distance_meters: Option<f64>,
    pub text_similarity: Option<f64>,
}

pub struct DuplicateResolver {
    thresholds: MatchThresholds,
}

impl DuplicateResolver {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &MatchThresholds {
        &self.thresholds
    }

    /// Find the first active report in creation order that the draft duplicates.
    ///
    /// Inert reports (resolved or duplicate) in `corpus` are skipped. Without a
    /// draft fingerprint nothing can match: geo and text alone are never enough.
    pub fn resolve(&self, draft: &DraftEvidence<'_>, corpus: &[Report]) -> Option<DuplicateMatch> {
        if draft.fingerprint.is_none() {
            info!("No fingerprint for draft; skipping duplicate detection");
            return None;
        }

        let mut candidates: Vec<&Report> = corpus.iter().filter(|r| r.is_active()).collect();
        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let found = candidates
            .par_iter()
            .find_map_first(|candidate| self.evaluate(draft, candidate));

        match &found {
            Some(m) => info!(
                "Duplicate of {} ({:?}, image distance {})",
                m.report_id, m.kind, m.image_distance
            ),
            None => debug!("No duplicate among {} active reports", candidates.len()),
        }

        found
    }

    /// Check the draft against a single candidate.
    pub fn evaluate(
        &self,
        draft: &DraftEvidence<'_>,
        candidate: &Report,
    ) -> Option<DuplicateMatch> {
        let draft_fingerprint = draft.fingerprint?;
        let candidate_fingerprint = candidate.image_fingerprint.as_ref()?;

        let image_distance = match draft_fingerprint.distance(candidate_fingerprint) {
            Ok(distance) => distance,
            Err(err) => {
                debug!("No image evidence against {}: {}", candidate.id, err);
                return None;
            }
        };

        if image_distance <= self.thresholds.exact_image_distance {
            return Some(DuplicateMatch {
                report_id: candidate.id.clone(),
                kind: MatchKind::ExactImage,
                image_distance,
                geo_distance_meters: None,
                text_similarity: None,
            });
        }

        if image_distance >= self.thresholds.loose_image_distance {
            return None;
        }

        let geo_distance = haversine_meters(&draft.coordinates, &candidate.coordinates);
        if geo_distance >= self.thresholds.geo_radius_meters {
            return None;
        }

        let similarity = text::similarity(draft.description, &candidate.description);
        debug!(
            "Candidate {}: image {}, {:.1} m, text {:.3}",
            candidate.id, image_distance, geo_distance, similarity
        );
        if similarity <= self.thresholds.text_similarity {
            return None;
        }

        Some(DuplicateMatch {
            report_id: candidate.id.clone(),
            kind: MatchKind::CombinedEvidence,
            image_distance,
            geo_distance_meters: Some(geo_distance),
            text_similarity: Some(similarity),
        })
    }
}

impl Default for DuplicateResolver {
    fn default() -> Self {
        Self::new(MatchThresholds::default())
    }
}
