#[cfg(feature = "tensorflow")]
use tensorflow::Status;
use thiserror::Error;

use std::error::Error;
use std::fmt;
use std::io::Error as IOError;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub struct LprError(LprErrorKind);

#[derive(Debug, Error)]
pub enum LprErrorKind {
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    #[error("detector unavailable ({}): {reason}", .path.display())]
    DetectorUnavailable { path: PathBuf, reason: String },
    #[error("recognizer unavailable ({}): {reason}", .path.display())]
    RecognizerUnavailable { path: PathBuf, reason: String },
    #[error("recognition timed out after {0:?}")]
    RecognitionTimeout(Duration),
    #[error("recognition failed: {0}")]
    RecognitionFailure(String),
    #[error("no input images found in {}", .0.display())]
    NoInputFound(PathBuf),
    #[error("configuration: {0}")]
    Config(String),
    #[error(transparent)]
    IOError(#[from] IOError),
    #[error(transparent)]
    ImageError(#[from] image::ImageError),
    #[error(transparent)]
    CsvError(#[from] csv::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    #[error("font: {0}")]
    FontError(#[from] ab_glyph::InvalidFont),
    #[cfg(feature = "tensorflow")]
    #[error(transparent)]
    TensorflowError(#[from] Status),
}

impl LprError {
    pub fn kind(&self) -> &LprErrorKind {
        &self.0
    }

    pub fn invalid_region(message: impl Into<String>) -> Self {
        Self(LprErrorKind::InvalidRegion(message.into()))
    }

    pub fn recognition_failure(message: impl Into<String>) -> Self {
        Self(LprErrorKind::RecognitionFailure(message.into()))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self(LprErrorKind::Config(message.into()))
    }
}

impl<T> From<T> for LprError
where T: Into<LprErrorKind>
{
    fn from(e: T) -> Self {
        Self(e.into())
    }
}

impl fmt::Display for LprError {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.kind(), f)
    }
}

impl Error for LprError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.kind().source()
    }
}


#[cfg(test)]
mod test {

    use super::{LprError, LprErrorKind};

    use std::io;
    use std::time::Duration;

    #[test]
    fn constructors_pick_their_kind() {
        assert!(matches!(LprError::invalid_region("zero width").kind(), LprErrorKind::InvalidRegion(_)));
        assert!(matches!(LprError::recognition_failure("engine crashed").kind(), LprErrorKind::RecognitionFailure(_)));
        let timeout = LprError::from(LprErrorKind::RecognitionTimeout(Duration::from_millis(5)));
        assert!(matches!(timeout.kind(), LprErrorKind::RecognitionTimeout(_)));
        assert!(matches!(LprError::config("bad").kind(), LprErrorKind::Config(_)));
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert!(matches!(LprError::from(io_err).kind(), LprErrorKind::IOError(_)));
    }

    #[test]
    fn display_goes_through_kind() {
        let err = LprError::invalid_region("box 3 is empty");
        assert_eq!(err.to_string(), "invalid region: box 3 is empty");
        let err = LprError::from(LprErrorKind::NoInputFound("data/input".into()));
        assert_eq!(err.to_string(), "no input images found in data/input");
    }
}
