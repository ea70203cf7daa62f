//! Recognizing roster students in classroom photos.

use crate::analyzer::FaceAnalyzer;
use crate::matcher::FaceMatcher;
use crate::types::EnrolledStudent;
use image::RgbImage;
use std::collections::BTreeSet;

/// What the photos of one session yielded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    /// Ids of roster students matched at least once.
    pub present_ids: BTreeSet<String>,
    pub faces_detected: usize,
    pub faces_unmatched: usize,
}

/// Match every face in every photo against the roster.
///
/// A face is attributed to the first roster student it matches and to no
/// one else. Photos with zero or many faces are normal; a photo or face the
/// analyzer fails on is skipped with a warning.
pub fn recognize_roster(
    analyzer: &mut dyn FaceAnalyzer,
    roster: &[EnrolledStudent],
    photos: &[RgbImage],
    matcher: &FaceMatcher,
) -> Recognition {
    let mut recognition = Recognition::default();

    for (i, photo) in photos.iter().enumerate() {
        let faces = match analyzer.detect(photo) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(photo = i + 1, error = %e, "attendance: detection failed; photo skipped");
                continue;
            }
        };
        tracing::debug!(photo = i + 1, faces = faces.len(), "attendance: faces detected");
        recognition.faces_detected += faces.len();

        for face in &faces {
            let embedding = match analyzer.embed(photo, face) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(photo = i + 1, error = %e, "attendance: embedding failed; face skipped");
                    recognition.faces_unmatched += 1;
                    continue;
                }
            };

            match roster
                .iter()
                .find(|s| matcher.is_same_person(&s.embeddings, &embedding))
            {
                Some(student) => {
                    recognition.present_ids.insert(student.id.clone());
                }
                None => recognition.faces_unmatched += 1,
            }
        }
    }

    recognition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::testing::{photo, ScriptedAnalyzer};
    use crate::types::Embedding;

    fn emb(x: f32) -> Embedding {
        Embedding::new(vec![x, 0.0])
    }

    fn student(id: &str, embeddings: Vec<Embedding>) -> EnrolledStudent {
        EnrolledStudent {
            id: id.into(),
            name: format!("student {id}"),
            semester: "5".into(),
            section: "A".into(),
            embeddings,
        }
    }

    #[test]
    fn test_student_in_several_photos_counted_once() {
        let roster = vec![student("1", vec![emb(0.0)]), student("2", vec![emb(5.0)])];
        let mut analyzer = ScriptedAnalyzer::new(vec![vec![emb(0.1)], vec![emb(0.05), emb(9.0)]]);

        let r = recognize_roster(&mut analyzer, &roster, &[photo(0), photo(1)], &FaceMatcher::default());
        assert_eq!(r.present_ids, BTreeSet::from(["1".to_string()]));
        assert_eq!(r.faces_detected, 3);
        assert_eq!(r.faces_unmatched, 1);
    }

    #[test]
    fn test_first_roster_match_wins() {
        // Both students' single enrollment embedding is close to the probe.
        let roster = vec![student("a", vec![emb(0.1)]), student("b", vec![emb(0.2)])];
        let mut analyzer = ScriptedAnalyzer::new(vec![vec![emb(0.15)]]);

        let r = recognize_roster(&mut analyzer, &roster, &[photo(0)], &FaceMatcher::default());
        assert_eq!(r.present_ids, BTreeSet::from(["a".to_string()]));
    }

    #[test]
    fn test_empty_photo_is_not_an_error() {
        let roster = vec![student("1", vec![emb(0.0)])];
        let mut analyzer = ScriptedAnalyzer::new(vec![vec![]]);

        let r = recognize_roster(&mut analyzer, &roster, &[photo(0)], &FaceMatcher::default());
        assert!(r.present_ids.is_empty());
        assert_eq!(r.faces_detected, 0);
    }

    #[test]
    fn test_corroboration_applies_in_class() {
        // Two enrollment photos, only one of them close: not enough.
        let roster = vec![student("1", vec![emb(0.0), emb(2.0)])];
        let mut analyzer = ScriptedAnalyzer::new(vec![vec![emb(0.1)]]);

        let r = recognize_roster(&mut analyzer, &roster, &[photo(0)], &FaceMatcher::default());
        assert!(r.present_ids.is_empty());
        assert_eq!(r.faces_unmatched, 1);
    }
}
