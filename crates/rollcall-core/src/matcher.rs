//! Identity decision over a student's enrolled embeddings.

use crate::types::Embedding;

/// Euclidean distance below which two 128-d dlib-style embeddings are the
/// same face.
///
/// Stricter than the usual 0.6: a false accept puts the wrong name on an
/// official record, a false reject only asks the student to re-verify.
/// Other embedding models scale differently; see
/// [`FaceAnalyzer::match_threshold`](crate::analyzer::FaceAnalyzer::match_threshold).
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.4;

/// Number of enrollment embeddings that must fall under the threshold when
/// more than one is on file.
pub const DEFAULT_MIN_CORROBORATION: usize = 2;

/// Distance summary behind a match decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchDecision {
    pub matched: bool,
    /// Smallest distance to any known embedding (`INFINITY` when none).
    pub min_distance: f32,
    /// Known embeddings strictly closer than the threshold.
    pub close_matches: usize,
}

/// Threshold plus corroboration rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatcher {
    pub threshold: f32,
    pub min_corroboration: usize,
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            min_corroboration: DEFAULT_MIN_CORROBORATION,
        }
    }
}

impl FaceMatcher {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn with_min_corroboration(mut self, min_corroboration: usize) -> Self {
        self.min_corroboration = min_corroboration;
        self
    }

    /// Compare `probe` against every known embedding of one student.
    ///
    /// With a single known embedding the minimum distance decides alone. With
    /// several, at least `min_corroboration` of them (capped at the number on
    /// file) must also be within the threshold, so one noisy enrollment photo
    /// cannot produce a match by itself.
    pub fn evaluate(&self, known: &[Embedding], probe: &Embedding) -> MatchDecision {
        let mut min_distance = f32::INFINITY;
        let mut close_matches = 0usize;

        for enc in known {
            let d = probe.euclidean_distance(enc);
            if d < min_distance {
                min_distance = d;
            }
            if d < self.threshold {
                close_matches += 1;
            }
        }

        let matched = match known.len() {
            0 => false,
            1 => min_distance < self.threshold,
            n => {
                let required = self.min_corroboration.clamp(1, n);
                min_distance < self.threshold && close_matches >= required
            }
        };

        MatchDecision {
            matched,
            min_distance,
            close_matches,
        }
    }

    pub fn is_same_person(&self, known: &[Embedding], probe: &Embedding) -> bool {
        self.evaluate(known, probe).matched
    }
}

/// Decide whether `probe` belongs to the student whose embeddings are `known`.
pub fn is_same_person(known: &[Embedding], probe: &Embedding, threshold: f32) -> bool {
    FaceMatcher::new(threshold).is_same_person(known, probe)
}
