//! rollcall-core — Face-recognition attendance engine.
//!
//! SCRFD detection and ArcFace embeddings over ONNX Runtime, identity
//! matching with a corroboration rule, enrollment with a duplicate-identity
//! guard, roster reconciliation, and attendance statistics replayed from
//! session logs.

pub mod alignment;
pub mod analyzer;
pub mod attendance;
pub mod collaborators;
pub mod detector;
pub mod enrollment;
pub mod error;
pub mod matcher;
pub mod recognizer;
pub mod registry;
pub mod session_log;
pub mod statistics;
pub mod types;

pub use analyzer::{decode_photo, AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use collaborators::{AttendanceRecord, RecordStore, ReportRenderer, SessionLogStore, SheetExporter};
pub use enrollment::{EnrollRequest, EnrollStatus};
pub use error::AttendError;
pub use matcher::{is_same_person, FaceMatcher, DEFAULT_MATCH_THRESHOLD, DEFAULT_MIN_CORROBORATION};
pub use registry::{EmbeddingStore, Registry};
pub use statistics::{compute_statistics, partition, AttendanceStat, StatisticsReport};
pub use types::{AttendanceOutcome, BoundingBox, Embedding, EnrolledStudent, SessionRecord, StudentRef};
