use image::DynamicImage;
use rayon::prelude::*;
use rayon::{ ThreadPool, ThreadPoolBuilder };
use tracing::{ debug, info, warn };

use std::panic::{ self, AssertUnwindSafe };
use std::sync::mpsc::{ self, RecvTimeoutError };
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use capability::{ Detector, ImageSource, RawFragment, Recognizer };
use config::Config;
use error::{ LprError, LprErrorKind };
use geometry::DetectionBox;
use image_process::{ ConditionedImage, ImageConditioner };
use text::TextNormalizer;

pub mod batch;
pub mod capability;
pub mod config;
pub mod error;
pub mod geometry;
pub mod image_process;
pub mod output;
pub mod text;
pub mod utils;
#[cfg(feature = "tensorflow")]
pub mod tf;


/// Outcome for one detected plate region.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub source_image_id: String,
    /// Position among the detections that passed the area filter.
    pub region_index: usize,
    pub bounding_box: DetectionBox,
    /// Missing when the region could not be cropped or conditioned.
    pub conditioned: Option<ConditionedImage>,
    /// Empty when nothing legible was read.
    pub canonical_text: String,
    /// Why the region yielded no text, for regions that failed.
    pub failure: Option<String>,
}

impl ResultRecord {
    pub fn is_recognized(&self) -> bool {
        !self.canonical_text.is_empty()
    }
}

/// Crops, conditions, reads and normalizes every plate box of an image.
///
/// The recognizer is loaded once by the caller and shared; regions are
/// independent, so with more than one worker they run on a rayon pool.
/// Records always come back in detection order.
pub struct RecognitionPipeline {
    recognizer: Arc<dyn Recognizer>,
    conditioner: ImageConditioner,
    normalizer: TextNormalizer,
    min_area: u64,
    timeout: Option<Duration>,
    pool: Option<ThreadPool>,
}

impl RecognitionPipeline {

    pub fn new(recognizer: Arc<dyn Recognizer>, config: &Config) -> Result<Self, LprError> {
        config.validate()?;
        let pool = if config.workers > 1 {
            Some(ThreadPoolBuilder::new().num_threads(config.workers).build()?)
        } else {
            None
        };
        Ok(Self {
            recognizer,
            conditioner: ImageConditioner::new(),
            normalizer: TextNormalizer::new(config.merge_policy),
            min_area: config.min_area,
            timeout: config.recognition_timeout(),
            pool,
        })
    }

    /// One record per detection whose area exceeds `min_area`, in the order the
    /// detections were given. Region failures end up in the record, they never
    /// abort the image.
    pub fn process(&self, source_id: &str, img: &DynamicImage, detections: &[DetectionBox]) -> Vec<ResultRecord> {
        let surviving: Vec<DetectionBox> = detections
            .iter()
            .filter(|a_box| a_box.passes_area_threshold(self.min_area))
            .copied()
            .collect();
        debug!(source = source_id, detected = detections.len(), kept = surviving.len(), "area filter");

        let run = |(index, a_box): (usize, &DetectionBox)| self.process_region(source_id, img, index, *a_box);
        match &self.pool {
            Some(pool) => pool.install(|| surviving.par_iter().enumerate().map(run).collect()),
            None => surviving.iter().enumerate().map(run).collect(),
        }
    }

    /// Detect plates with `detector` and process them.
    pub fn process_source(&self, detector: &dyn Detector, source_id: &str, source: &ImageSource) -> Result<Vec<ResultRecord>, LprError> {
        let img = source.load()?;
        let detections = detector.detect(&img)?;
        Ok(self.process(source_id, &img, &detections))
    }

    // a panic inside the conditioner or the recognizer only fails this region
    fn process_region(&self, source_id: &str, img: &DynamicImage, region_index: usize, a_box: DetectionBox) -> ResultRecord {
        let record = ResultRecord {
            source_image_id: source_id.to_string(),
            region_index,
            bounding_box: a_box,
            conditioned: None,
            canonical_text: String::new(),
            failure: None,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| self.recognize_region(source_id, img, record.clone()))) {
            Ok(record) => record,
            Err(_) => {
                let e = LprError::recognition_failure("region processing panicked");
                warn!(source = source_id, region = region_index, error = %e, "region skipped");
                ResultRecord { failure: Some(e.to_string()), ..record }
            }
        }
    }

    fn recognize_region(&self, source_id: &str, img: &DynamicImage, mut record: ResultRecord) -> ResultRecord {
        let region_index = record.region_index;
        let a_box = record.bounding_box;

        let conditioned = match a_box.crop(img).and_then(|region| self.conditioner.condition(&region)) {
            Ok(conditioned) => conditioned,
            Err(e) => {
                warn!(source = source_id, region = region_index, error = %e, "region skipped");
                record.failure = Some(e.to_string());
                return record;
            }
        };

        match self.read(&conditioned) {
            Ok(fragments) => {
                record.canonical_text = self.normalizer.merge(&fragments);
                debug!(source = source_id, region = region_index, fragments = ?fragments, "recognizer output");
            }
            Err(e) => {
                warn!(source = source_id, region = region_index, error = %e, "recognition failed");
                record.failure = Some(e.to_string());
            }
        }
        record.conditioned = Some(conditioned);
        info!(source = source_id, region = region_index, text = %record.canonical_text, "plate");
        record
    }

    fn read(&self, conditioned: &ConditionedImage) -> Result<Vec<RawFragment>, LprError> {
        let region = conditioned.to_dynamic();
        let limit = match self.timeout {
            Some(limit) => limit,
            None => return self.recognizer.read(&region),
        };

        // a call that misses the deadline keeps its thread until it returns
        let recognizer = Arc::clone(&self.recognizer);
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(recognizer.read(&region));
        });
        match receiver.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(LprErrorKind::RecognitionTimeout(limit).into()),
            Err(RecvTimeoutError::Disconnected) => Err(LprError::recognition_failure("recognizer thread panicked")),
        }
    }
}
