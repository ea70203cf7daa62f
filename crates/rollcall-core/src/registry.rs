//! Enrolled-student registry: the embedding store plus the lock discipline
//! around it.

use crate::analyzer::FaceAnalyzer;
use crate::attendance::recognize_roster;
use crate::enrollment::{extract_enrollment_embeddings, find_duplicate, EnrollRequest, EnrollStatus};
use crate::error::{require_field, AttendError};
use crate::matcher::FaceMatcher;
use crate::types::{AttendanceOutcome, EnrolledStudent};
use image::RgbImage;
use std::sync::{Arc, PoisonError, RwLock};

/// Durable collection of enrolled students keyed by id.
pub trait EmbeddingStore: Send + Sync {
    /// Every enrolled student. A store that does not exist yet is empty.
    fn load_all(&self) -> Result<Vec<EnrolledStudent>, AttendError>;

    /// Insert or wholesale replace the student with `student.id`, atomically.
    /// Returns true when an existing record was replaced.
    fn upsert(&self, student: &EnrolledStudent) -> Result<bool, AttendError>;

    /// Students of one semester and section.
    fn load_roster(&self, semester: &str, section: &str) -> Result<Vec<EnrolledStudent>, AttendError> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|s| s.in_class(semester, section))
            .collect())
    }
}

impl<S: EmbeddingStore + ?Sized> EmbeddingStore for Arc<S> {
    fn load_all(&self) -> Result<Vec<EnrolledStudent>, AttendError> {
        (**self).load_all()
    }

    fn upsert(&self, student: &EnrolledStudent) -> Result<bool, AttendError> {
        (**self).upsert(student)
    }

    fn load_roster(&self, semester: &str, section: &str) -> Result<Vec<EnrolledStudent>, AttendError> {
        (**self).load_roster(semester, section)
    }
}

/// Serializes enrollments and lets attendance read a consistent roster.
///
/// Enrollment holds the write side across load, duplicate check and upsert so
/// two racing enrollments cannot both pass the duplicate guard. Attendance
/// only holds the read side while loading its roster.
pub struct Registry<S> {
    store: S,
    matcher: FaceMatcher,
    gate: RwLock<()>,
}

impl<S: EmbeddingStore> Registry<S> {
    pub fn new(store: S, matcher: FaceMatcher) -> Self {
        Self {
            store,
            matcher,
            gate: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn matcher(&self) -> &FaceMatcher {
        &self.matcher
    }

    pub fn enroll(
        &self,
        analyzer: &mut dyn FaceAnalyzer,
        request: EnrollRequest,
    ) -> Result<EnrollStatus, AttendError> {
        let request = request.validated()?;
        let embeddings = extract_enrollment_embeddings(analyzer, &request.photos)?;

        let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let students = self.store.load_all()?;
        if let Some(dup) = find_duplicate(&students, &request.id, &embeddings, &self.matcher) {
            tracing::warn!(usn = %request.id, conflict = %dup.id, "enroll: duplicate identity");
            return Err(AttendError::DuplicateIdentity {
                id: dup.id.clone(),
                name: dup.name.clone(),
            });
        }

        let count = embeddings.len();
        let student = request.into_student(embeddings);
        let replaced = self.store.upsert(&student)?;
        let status = if replaced {
            EnrollStatus::Updated
        } else {
            EnrollStatus::Enrolled
        };

        tracing::info!(
            usn = %student.id,
            semester = %student.semester,
            section = %student.section,
            embeddings = count,
            ?status,
            "enroll: stored"
        );
        Ok(status)
    }

    /// Recognize the roster of `semester`/`section` in classroom photos.
    pub fn take_attendance(
        &self,
        analyzer: &mut dyn FaceAnalyzer,
        semester: &str,
        section: &str,
        photos: &[RgbImage],
    ) -> Result<AttendanceOutcome, AttendError> {
        let semester = require_field("semester", semester)?;
        let section = require_field("section", section)?;
        if photos.is_empty() {
            return Err(AttendError::MissingRequiredField("class_images"));
        }

        let roster = {
            let _guard = self.gate.read().unwrap_or_else(PoisonError::into_inner);
            self.store.load_roster(semester, section)?
        };

        let recognition = recognize_roster(analyzer, &roster, photos, &self.matcher);
        let outcome = AttendanceOutcome::reconcile(&roster, &recognition.present_ids);

        tracing::info!(
            semester,
            section,
            roster = roster.len(),
            present = outcome.present.len(),
            absent = outcome.absent.len(),
            faces = recognition.faces_detected,
            unmatched = recognition.faces_unmatched,
            "attendance: recognized"
        );
        Ok(outcome)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use crate::analyzer::testing::{photo, ScriptedAnalyzer};
    use crate::types::Embedding;

    fn emb(x: f32) -> Embedding {
        Embedding::new(vec![x, 0.0])
    }

    fn request(id: &str, name: &str, section: &str, photos: Vec<RgbImage>) -> EnrollRequest {
        EnrollRequest {
            id: id.into(),
            name: name.into(),
            semester: "5".into(),
            section: section.into(),
            photos,
        }
    }

    /// Scripts: 0 = Asha, 1 = Asha again, 2 = Ben, 3 = Asha's new look,
    /// 4 = classroom with Asha and a stranger.
    fn analyzer() -> ScriptedAnalyzer {
        ScriptedAnalyzer::new(vec![
            vec![emb(0.0)],
            vec![emb(0.1)],
            vec![emb(5.0)],
            vec![emb(10.0)],
            vec![emb(0.05), emb(20.0)],
        ])
    }

    #[test]
    fn test_enroll_then_update() {
        let registry = Registry::new(MemoryStore::default(), FaceMatcher::default());
        let mut a = analyzer();

        let first = registry
            .enroll(&mut a, request("1", "Asha", "A", vec![photo(0), photo(1)]))
            .unwrap();
        assert_eq!(first, EnrollStatus::Enrolled);

        let second = registry
            .enroll(&mut a, request("1", "Asha K", "B", vec![photo(3)]))
            .unwrap();
        assert_eq!(second, EnrollStatus::Updated);

        let all = registry.store().load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Asha K");
        assert_eq!(all[0].section, "B");
        assert_eq!(all[0].embeddings, vec![emb(10.0)]);
    }

    #[test]
    fn test_reenroll_replaces_old_embeddings() {
        let registry = Registry::new(MemoryStore::default(), FaceMatcher::default());
        let mut a = analyzer();
        registry.enroll(&mut a, request("1", "Asha", "A", vec![photo(0)])).unwrap();
        registry.enroll(&mut a, request("1", "Asha", "A", vec![photo(3)])).unwrap();

        // The old face no longer resolves to anyone.
        let stored = registry.store().load_all().unwrap();
        assert!(stored
            .iter()
            .all(|s| !registry.matcher().is_same_person(&s.embeddings, &emb(0.0))));
        // So a different id may now claim it.
        let status = registry.enroll(&mut a, request("2", "Other", "A", vec![photo(0)]));
        assert_eq!(status.unwrap(), EnrollStatus::Enrolled);
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let registry = Registry::new(MemoryStore::default(), FaceMatcher::default());
        let mut a = analyzer();
        registry.enroll(&mut a, request("1", "Asha", "A", vec![photo(0)])).unwrap();

        let err = registry
            .enroll(&mut a, request("2", "Impostor", "A", vec![photo(1)]))
            .unwrap_err();
        match err {
            AttendError::DuplicateIdentity { id, name } => {
                assert_eq!(id, "1");
                assert_eq!(name, "Asha");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.store().load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_racing_enrollments_admit_one_identity() {
        use std::sync::Barrier;

        let registry = Registry::new(MemoryStore::default(), FaceMatcher::default());
        let barrier = Barrier::new(2);

        let results: Vec<Result<EnrollStatus, AttendError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = [("1", "Asha"), ("2", "Asha again")]
                .into_iter()
                .map(|(id, name)| {
                    let registry = &registry;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let mut a = analyzer();
                        barrier.wait();
                        registry.enroll(&mut a, request(id, name, "A", vec![photo(0)]))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let enrolled = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(AttendError::DuplicateIdentity { .. })))
            .count();
        assert_eq!((enrolled, duplicates), (1, 1));
        assert_eq!(registry.store().load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_take_attendance_partitions_roster() {
        let registry = Registry::new(MemoryStore::default(), FaceMatcher::default());
        let mut a = analyzer();
        registry.enroll(&mut a, request("1", "Asha", "A", vec![photo(0)])).unwrap();
        registry.enroll(&mut a, request("2", "Ben", "A", vec![photo(2)])).unwrap();
        registry.enroll(&mut a, request("3", "Chen", "B", vec![photo(3)])).unwrap();

        let outcome = registry.take_attendance(&mut a, "5", "A", &[photo(4)]).unwrap();
        assert_eq!(outcome.present_entries(), vec!["Asha (1)".to_string()]);
        assert_eq!(outcome.absent_entries(), vec!["Ben (2)".to_string()]);
        assert_eq!(outcome.roster_size(), 2);
        assert!(outcome.present.is_disjoint(&outcome.absent));
    }

    #[test]
    fn test_take_attendance_requires_photos() {
        let registry = Registry::new(MemoryStore::default(), FaceMatcher::default());
        let err = registry
            .take_attendance(&mut analyzer(), "5", "A", &[])
            .unwrap_err();
        assert!(matches!(err, AttendError::MissingRequiredField("class_images")));
    }

    #[test]
    fn test_take_attendance_empty_roster() {
        let registry = Registry::new(MemoryStore::default(), FaceMatcher::default());
        let outcome = registry
            .take_attendance(&mut analyzer(), "5", "A", &[photo(4)])
            .unwrap();
        assert_eq!(outcome, AttendanceOutcome::default());
    }
}
