//! Enrollment photo validation and duplicate-identity guard.

use crate::analyzer::FaceAnalyzer;
use crate::error::{require_field, AttendError};
use crate::matcher::FaceMatcher;
use crate::types::{Embedding, EnrolledStudent};
use image::RgbImage;
use serde::Serialize;

/// A student to enroll, with their decoded enrollment photos.
#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub id: String,
    pub name: String,
    pub semester: String,
    pub section: String,
    pub photos: Vec<RgbImage>,
}

impl EnrollRequest {
    /// Trim every text field and check that nothing required is missing.
    pub fn validated(self) -> Result<Self, AttendError> {
        let id = require_field("usn", &self.id)?.to_string();
        let name = require_field("name", &self.name)?.to_string();
        let semester = require_field("semester", &self.semester)?.to_string();
        let section = require_field("section", &self.section)?.to_string();
        if self.photos.is_empty() {
            return Err(AttendError::MissingRequiredField("photos"));
        }
        Ok(Self {
            id,
            name,
            semester,
            section,
            photos: self.photos,
        })
    }

    pub fn into_student(self, embeddings: Vec<Embedding>) -> EnrolledStudent {
        EnrolledStudent {
            id: self.id,
            name: self.name,
            semester: self.semester,
            section: self.section,
            embeddings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollStatus {
    Enrolled,
    Updated,
}

impl EnrollStatus {
    pub fn message(self) -> &'static str {
        match self {
            Self::Enrolled => "Student enrolled successfully",
            Self::Updated => "Student updated successfully",
        }
    }
}

/// One embedding per photo. Every photo must show exactly one face; the first
/// photo that does not aborts the whole enrollment.
pub fn extract_enrollment_embeddings(
    analyzer: &mut dyn FaceAnalyzer,
    photos: &[RgbImage],
) -> Result<Vec<Embedding>, AttendError> {
    let mut embeddings = Vec::with_capacity(photos.len());

    for (i, photo) in photos.iter().enumerate() {
        let number = i + 1;
        let faces = analyzer.detect(photo)?;
        let face = match faces.as_slice() {
            [] => return Err(AttendError::NoFaceDetected { photo: number }),
            [face] => face,
            many => {
                return Err(AttendError::MultipleFacesDetected {
                    photo: number,
                    count: many.len(),
                })
            }
        };
        tracing::debug!(photo = number, confidence = face.confidence, "enroll: face accepted");
        embeddings.push(analyzer.embed(photo, face)?);
    }

    if embeddings.is_empty() {
        return Err(AttendError::NoValidEncodings);
    }
    Ok(embeddings)
}

/// First student other than `id` whose enrolled embeddings match any of the
/// new embeddings.
pub fn find_duplicate<'a>(
    students: &'a [EnrolledStudent],
    id: &str,
    embeddings: &[Embedding],
    matcher: &FaceMatcher,
) -> Option<&'a EnrolledStudent> {
    students
        .iter()
        .filter(|s| s.id != id)
        .find(|s| embeddings.iter().any(|e| matcher.is_same_person(&s.embeddings, e)))
}
