use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Embeddings of different dimension were produced by different models and
    /// are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled student with one embedding per enrollment photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledStudent {
    /// University serial number; unique across the store.
    pub id: String,
    pub name: String,
    pub semester: String,
    pub section: String,
    pub embeddings: Vec<Embedding>,
}

impl EnrolledStudent {
    pub fn student_ref(&self) -> StudentRef {
        StudentRef {
            name: self.name.clone(),
            id: self.id.clone(),
        }
    }

    pub fn in_class(&self, semester: &str, section: &str) -> bool {
        self.semester == semester && self.section == section
    }
}

/// (name, id) pair used for attendance outcomes. Displays as `name (id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudentRef {
    pub name: String,
    pub id: String,
}

impl fmt::Display for StudentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Present and absent partitions of a roster for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttendanceOutcome {
    pub present: BTreeSet<StudentRef>,
    pub absent: BTreeSet<StudentRef>,
}

impl AttendanceOutcome {
    /// Split `roster` into present and absent by student id.
    ///
    /// Ids in `present_ids` that are not on the roster are ignored, so the
    /// two sets always partition the roster exactly.
    pub fn reconcile(roster: &[EnrolledStudent], present_ids: &BTreeSet<String>) -> Self {
        let mut outcome = Self::default();
        for student in roster {
            if present_ids.contains(&student.id) {
                outcome.present.insert(student.student_ref());
            } else {
                outcome.absent.insert(student.student_ref());
            }
        }
        outcome
    }

    pub fn roster_size(&self) -> usize {
        self.present.len() + self.absent.len()
    }

    pub fn present_entries(&self) -> Vec<String> {
        self.present.iter().map(ToString::to_string).collect()
    }

    pub fn absent_entries(&self) -> Vec<String> {
        self.absent.iter().map(ToString::to_string).collect()
    }
}

/// One appended entry in a session log.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub timestamp: NaiveDateTime,
    pub subject: String,
    pub semester: String,
    pub section: String,
    /// `name (id)` entries.
    pub present: Vec<String>,
    pub absent: Vec<String>,
}

impl SessionRecord {
    pub fn from_outcome(
        outcome: &AttendanceOutcome,
        timestamp: NaiveDateTime,
        subject: &str,
        semester: &str,
        section: &str,
    ) -> Self {
        Self {
            timestamp,
            subject: subject.to_string(),
            semester: semester.to_string(),
            section: section.to_string(),
            present: outcome.present_entries(),
            absent: outcome.absent_entries(),
        }
    }
}
