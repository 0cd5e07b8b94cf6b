//! Seams to the learned models. The pipeline only relies on what these traits
//! promise: boxes with a confidence out of a detector, text fragments with a
//! confidence out of a recognizer.
//!
//! Both capabilities are loaded once, never mutated while running, and shared
//! between worker threads, so they have to be `Send + Sync`.

use image::DynamicImage;
use serde::{ Deserialize, Serialize };

use std::borrow::Cow;
use std::path::PathBuf;

use crate::error::LprError;
use crate::geometry::DetectionBox;

/// One text region reported by a recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFragment {
    pub text: String,
    pub confidence: f32,
}

impl RawFragment {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence }
    }
}

/// An image handed to a detector, either on disk or already decoded.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Memory(DynamicImage),
}

impl ImageSource {
    pub fn load(&self) -> Result<Cow<'_, DynamicImage>, LprError> {
        match self {
            ImageSource::Path(path) => Ok(Cow::Owned(image::open(path)?)),
            ImageSource::Memory(img) => Ok(Cow::Borrowed(img)),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(img: DynamicImage) -> Self {
        ImageSource::Memory(img)
    }
}

pub trait Detector: Send + Sync {
    /// Plate boxes in emission order. Confidence and overlap thresholds belong
    /// to the implementation's configuration.
    fn detect(&self, img: &DynamicImage) -> Result<Vec<DetectionBox>, LprError>;

    fn detect_source(&self, source: &ImageSource) -> Result<Vec<DetectionBox>, LprError> {
        let img = source.load()?;
        self.detect(&img)
    }
}

pub trait Recognizer: Send + Sync {
    /// Text fragments found in `region`, which may be grayscale or color.
    fn read(&self, region: &DynamicImage) -> Result<Vec<RawFragment>, LprError>;
}
