//! Face analysis capability: find faces in a photo, embed each one.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_MATCH_THRESHOLD};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detection and embedding behind one seam, so enrollment and attendance can
/// run against a scripted analyzer in tests.
pub trait FaceAnalyzer {
    fn detect(&mut self, photo: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError>;
    fn embed(&mut self, photo: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError>;

    /// Euclidean match threshold calibrated for this analyzer's embeddings,
    /// when it knows one.
    fn match_threshold(&self) -> Option<f32> {
        None
    }
}

/// SCRFD detector + ArcFace recognizer.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    pub fn load(
        detector_path: &Path,
        recognizer_path: &Path,
        confidence_threshold: f32,
    ) -> Result<Self, AnalyzerError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path, confidence_threshold)?,
            recognizer: FaceRecognizer::load(recognizer_path)?,
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, photo: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(photo)?)
    }

    fn embed(&mut self, photo: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        Ok(self.recognizer.extract(photo, face)?)
    }

    fn match_threshold(&self) -> Option<f32> {
        Some(ARCFACE_MATCH_THRESHOLD)
    }
}

/// Decode an uploaded photo (JPEG, PNG, ...) into RGB.
pub fn decode_photo(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
