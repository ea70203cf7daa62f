use crate::analyzer::AnalyzerError;
use thiserror::Error;

/// Boxed backend error carried by [`AttendError::Store`].
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum AttendError {
    #[error("no face detected in photo {photo}; use clear, well-lit photos")]
    NoFaceDetected { photo: usize },
    #[error("{count} faces detected in photo {photo}; enrollment photos must show only the student")]
    MultipleFacesDetected { photo: usize, count: usize },
    #[error("no valid face encodings could be generated")]
    NoValidEncodings,
    #[error("face matches existing student {name} ({id}); verify the student's identity")]
    DuplicateIdentity { id: String, name: String },
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("photo {photo} could not be decoded: {reason}")]
    UnreadablePhoto { photo: usize, reason: String },
    #[error("unavailable: {0}")]
    StoreUnavailable(String),
    #[error("not found: {0}")]
    RecordNotFound(String),
    #[error("malformed session log at line {line}: {reason}")]
    ParseFailure { line: usize, reason: String },
    #[error("analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("store: {0}")]
    Store(#[source] BoxedError),
}

impl AttendError {
    pub fn store(err: impl Into<BoxedError>) -> Self {
        Self::Store(err.into())
    }

    /// Stable kind name surfaced in service outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoFaceDetected { .. } => "NoFaceDetected",
            Self::MultipleFacesDetected { .. } => "MultipleFacesDetected",
            Self::NoValidEncodings => "NoValidEncodings",
            Self::DuplicateIdentity { .. } => "DuplicateIdentity",
            Self::MissingRequiredField(_) => "MissingRequiredField",
            Self::InvalidField { .. } => "InvalidField",
            Self::UnreadablePhoto { .. } => "UnreadablePhoto",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::RecordNotFound(_) => "RecordNotFound",
            Self::ParseFailure { .. } => "ParseFailure",
            Self::Analyzer(_) => "Analyzer",
            Self::Store(_) => "Store",
        }
    }
}

/// Characters that would corrupt a session-log line or a file name.
const FORBIDDEN: &[char] = &[',', '\n', '\r', '/', '\\'];

/// Trim `value` and reject it when empty or when it contains a character the
/// session log or file layout cannot carry.
pub fn require_field<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AttendError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AttendError::MissingRequiredField(field));
    }
    if let Some(c) = trimmed.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(AttendError::InvalidField {
            field,
            reason: format!("must not contain {c:?}"),
        });
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_field_trims() {
        assert_eq!(require_field("name", "  Asha ").unwrap(), "Asha");
    }

    #[test]
    fn test_require_field_empty() {
        let err = require_field("usn", "   ").unwrap_err();
        assert!(matches!(err, AttendError::MissingRequiredField("usn")));
        assert_eq!(err.kind(), "MissingRequiredField");
    }

    #[test]
    fn test_require_field_rejects_separator() {
        let err = require_field("name", "Asha, Ben").unwrap_err();
        assert!(matches!(err, AttendError::InvalidField { field: "name", .. }));
        assert!(require_field("section", "A/B").is_err());
    }
}
