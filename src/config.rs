use serde::{ Deserialize, Serialize };

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use crate::error::LprError;
use crate::text::MergePolicy;

const LATIN_LANGUAGES: [&str; 2] = ["en", "latin"];

/// Run configuration. Every field has a default, so a config file only needs
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Detections with an area at or below this many pixels are ignored.
    pub min_area: u64,
    pub confidence_threshold: f32,
    /// Overlap above which the less confident of two boxes is dropped.
    pub iou_threshold: f32,
    /// Edge length the detector graph was exported for.
    pub input_size: u32,
    pub language_set: Vec<String>,
    pub gpu_enabled: bool,
    pub merge_policy: MergePolicy,
    /// Regions conditioned and recognized at once; 1 keeps everything on the
    /// calling thread.
    pub workers: usize,
    pub recognition_timeout_ms: Option<u64>,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub save_artifacts: bool,
    /// Empty the artifact folders before a run.
    pub clear_outputs: bool,
    pub results_csv: PathBuf,
    /// TrueType font for plate labels on annotated images. Boxes only when unset.
    pub font_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_area: 500,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
            language_set: vec!["en".to_string()],
            gpu_enabled: false,
            merge_policy: MergePolicy::default(),
            workers: 1,
            recognition_timeout_ms: None,
            detector_model: PathBuf::from("models/detect.pb"),
            recognizer_model: PathBuf::from("models/ocr_latin.pb"),
            input_dir: PathBuf::from("data/input"),
            output_dir: PathBuf::from("data/outputs"),
            save_artifacts: true,
            clear_outputs: true,
            results_csv: PathBuf::from("results.csv"),
            font_path: None,
        }
    }
}

impl Config {

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LprError> {
        let text = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LprError> {
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("iou_threshold", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LprError::config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if self.workers == 0 {
            return Err(LprError::config("workers must be at least 1"));
        }
        if let MergePolicy::FilteredJoin { min_len: 0 } = self.merge_policy {
            return Err(LprError::config("min_len of the filtered join must be at least 1"));
        }
        if self.language_set.is_empty() {
            return Err(LprError::config("language_set is empty"));
        }
        if let Some(lang) = self.language_set.iter().find(|l| !LATIN_LANGUAGES.contains(&l.to_lowercase().as_str())) {
            return Err(LprError::config(format!("unsupported language {:?}, only latin alphabets are read", lang)));
        }
        Ok(())
    }

    pub fn recognition_timeout(&self) -> Option<Duration> {
        self.recognition_timeout_ms.map(Duration::from_millis)
    }

    /// Where the result table goes; relative paths live under the output dir.
    pub fn results_csv_path(&self) -> PathBuf {
        if self.results_csv.is_absolute() {
            self.results_csv.clone()
        } else {
            self.output_dir.join(&self.results_csv)
        }
    }
}


#[cfg(test)]
mod test {

    use std::error::Error;
    use std::fs;
    use std::time::Duration;

    use super::Config;
    use crate::error::LprErrorKind;
    use crate::text::MergePolicy;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.min_area, 500);
        assert_eq!(config.confidence_threshold, 0.25);
        assert_eq!(config.language_set, vec!["en"]);
        assert!(!config.gpu_enabled);
        assert_eq!(config.merge_policy, MergePolicy::FilteredJoin { min_len: 3 });
        assert_eq!(config.recognition_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lpr.json");
        fs::write(&path, r#"{
            "min_area": 800,
            "workers": 4,
            "recognition_timeout_ms": 1500,
            "merge_policy": { "policy": "concatenate_all" }
        }"#)?;
        let config = Config::from_file(&path)?;
        assert_eq!(config.min_area, 800);
        assert_eq!(config.workers, 4);
        assert_eq!(config.recognition_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.merge_policy, MergePolicy::ConcatenateAll);
        assert_eq!(config.iou_threshold, 0.45);
        Ok(())
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = Config::default();
        config.confidence_threshold = 1.5;
        assert!(matches!(config.validate().unwrap_err().kind(), LprErrorKind::Config(_)));

        let mut config = Config::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.language_set = vec!["en".into(), "ch_sim".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.merge_policy = MergePolicy::FilteredJoin { min_len: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn results_csv_under_output_dir() {
        let config = Config::default();
        assert_eq!(config.results_csv_path(), std::path::Path::new("data/outputs/results.csv"));
    }
}
