//! Directory runs: every image under the input folder goes through
//! detection and the recognition pipeline, with artifacts and one CSV row
//! per plate.

use image::DynamicImage;
use tracing::{ info, warn };

use std::fs;
use std::io::Write;
use std::path::{ Path, PathBuf };

use crate::capability::Detector;
use crate::config::Config;
use crate::error::{ LprError, LprErrorKind };
use crate::geometry::DetectionBox;
use crate::output::{ crop_file_name, ArtifactWriter, OutputLayout, ResultLog };
use crate::utils;
use crate::{ RecognitionPipeline, ResultRecord };

/// Image files directly inside `dir`, sorted by path.
pub fn discover_images(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, LprError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(LprErrorKind::NoInputFound(dir.to_path_buf()).into());
    }
    let mut images: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && utils::is_image_file(path))
        .collect();
    if images.is_empty() {
        return Err(LprErrorKind::NoInputFound(dir.to_path_buf()).into());
    }
    images.sort();
    Ok(images)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub images: usize,
    /// Images that could not be loaded or run through the detector.
    pub skipped_images: usize,
    pub regions: usize,
    pub recognized: usize,
}

pub struct BatchRunner<'a> {
    detector: &'a dyn Detector,
    pipeline: &'a RecognitionPipeline,
    artifacts: Option<ArtifactWriter>,
}

impl<'a> BatchRunner<'a> {

    pub fn new(detector: &'a dyn Detector, pipeline: &'a RecognitionPipeline, config: &Config) -> Result<Self, LprError> {
        let artifacts = if config.save_artifacts {
            let layout = OutputLayout::new(&config.output_dir);
            layout.prepare(config.clear_outputs)?;
            Some(ArtifactWriter::new(layout, config.font_path.as_deref())?)
        } else {
            None
        };
        Ok(Self { detector, pipeline, artifacts })
    }

    pub fn run<W: Write>(&self, images: &[PathBuf], log: &mut ResultLog<W>) -> Result<BatchSummary, LprError> {
        let mut summary = BatchSummary::default();
        for path in images {
            summary.images += 1;
            let (img, detections) = match self.detect(path) {
                Ok(found) => found,
                Err(e) => {
                    warn!(image = %path.display(), error = %e, "image skipped");
                    summary.skipped_images += 1;
                    continue;
                }
            };
            let records = self.record(path, &img, &detections, log)?;
            summary.regions += records.len();
            summary.recognized += records.iter().filter(|r| r.is_recognized()).count();
        }
        info!(
            images = summary.images,
            skipped = summary.skipped_images,
            regions = summary.regions,
            recognized = summary.recognized,
            "batch finished"
        );
        Ok(summary)
    }

    /// Detect, read, save artifacts and log rows for a single image.
    pub fn run_image<W: Write>(&self, path: &Path, log: &mut ResultLog<W>) -> Result<Vec<ResultRecord>, LprError> {
        let (img, detections) = self.detect(path)?;
        self.record(path, &img, &detections, log)
    }

    fn detect(&self, path: &Path) -> Result<(DynamicImage, Vec<DetectionBox>), LprError> {
        let img = image::open(path)?;
        let detections = self.detector.detect(&img)?;
        Ok((img, detections))
    }

    fn record<W: Write>(&self, path: &Path, img: &DynamicImage, detections: &[DetectionBox], log: &mut ResultLog<W>) -> Result<Vec<ResultRecord>, LprError> {
        let source_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let stem = utils::file_stem(path);

        let records = self.pipeline.process(&source_id, img, detections);
        info!(image = %source_id, detected = detections.len(), plates = records.len(), "image done");

        // artifacts are best effort, the table row is written regardless
        if let Some(artifacts) = &self.artifacts {
            if let Err(e) = artifacts.save_annotated(&stem, img, &records) {
                warn!(image = %source_id, error = %e, "annotated image not saved");
            }
        }
        for record in &records {
            let crop_name = crop_file_name(&stem, record.region_index);
            if let Some(artifacts) = &self.artifacts {
                if let Err(e) = artifacts.save_region(&stem, img, record) {
                    warn!(image = %source_id, region = record.region_index, error = %e, "plate artifacts not saved");
                }
            }
            log.append(&source_id, &crop_name, &record.canonical_text)?;
        }
        Ok(records)
    }
}
