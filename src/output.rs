//! Optional run artifacts: annotated source images, raw plate crops,
//! conditioned plates and the CSV result table.

use ab_glyph::{ FontVec, PxScale };
use image::{ DynamicImage, Rgb, RgbImage };
use imageproc::drawing;
use tracing::debug;

use std::fs::{ self, File };
use std::io::Write;
use std::path::{ Path, PathBuf };

use crate::error::LprError;
use crate::ResultRecord;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_SCALE: f32 = 24.0;

pub const CSV_HEADER: [&str; 3] = ["Input Image", "Cropped Plate", "Recognized Plate Number"];

/// `{stem}_plate_{n}.png`, `n` counting from 1.
pub fn crop_file_name(stem: &str, region_index: usize) -> String {
    format!("{}_plate_{}.png", stem, region_index + 1)
}

#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub detected: PathBuf,
    pub extracted: PathBuf,
    pub processed: PathBuf,
}

impl OutputLayout {

    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            detected: root.join("detected"),
            extracted: root.join("extracted"),
            processed: root.join("processed"),
        }
    }

    /// Create the folders, emptying them first when `clear` is set.
    pub fn prepare(&self, clear: bool) -> Result<(), LprError> {
        for dir in [&self.detected, &self.extracted, &self.processed] {
            if clear && dir.is_dir() {
                for entry in fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.is_dir() {
                        fs::remove_dir_all(&path)?;
                    } else {
                        fs::remove_file(&path)?;
                    }
                }
            }
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

pub struct ArtifactWriter {
    layout: OutputLayout,
    font: Option<FontVec>,
}

impl ArtifactWriter {

    pub fn new(layout: OutputLayout, font_path: Option<&Path>) -> Result<Self, LprError> {
        let font = match font_path {
            Some(path) => Some(FontVec::try_from_vec(fs::read(path)?)?),
            None => None,
        };
        Ok(Self { layout, font })
    }

    /// Save the raw crop and the conditioned plate of `record` under the same
    /// file name. Regions that could not be cropped write nothing.
    pub fn save_region(&self, stem: &str, img: &DynamicImage, record: &ResultRecord) -> Result<String, LprError> {
        let name = crop_file_name(stem, record.region_index);
        if let Ok(region) = record.bounding_box.crop(img) {
            region.to_rgb8().save(self.layout.extracted.join(&name))?;
        }
        if let Some(conditioned) = &record.conditioned {
            conditioned.image().save(self.layout.processed.join(&name))?;
        }
        debug!(file = %name, "saved plate artifacts");
        Ok(name)
    }

    pub fn save_annotated(&self, stem: &str, img: &DynamicImage, records: &[ResultRecord]) -> Result<PathBuf, LprError> {
        let path = self.layout.detected.join(format!("{}_detected.png", stem));
        annotate(img, records, self.font.as_ref()).save(&path)?;
        Ok(path)
    }
}

/// Red box around every record, with its plate text above the box when a
/// font is available.
pub fn annotate(img: &DynamicImage, records: &[ResultRecord], font: Option<&FontVec>) -> RgbImage {
    let mut canvas = img.to_rgb8();
    for record in records {
        let rect = match record.bounding_box.to_rect() {
            Some(rect) => rect,
            None => continue,
        };
        drawing::draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
        if let Some(font) = font {
            if record.is_recognized() {
                let y = (rect.top() - LABEL_SCALE as i32).max(0);
                drawing::draw_text_mut(&mut canvas, BOX_COLOR, rect.left(), y, PxScale::from(LABEL_SCALE), font, &record.canonical_text);
            }
        }
    }
    canvas
}

/// Result table, one row per record in pipeline order.
pub struct ResultLog<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl ResultLog<File> {

    pub fn create(path: impl AsRef<Path>) -> Result<Self, LprError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::from_writer(File::create(path)?)
    }
}

impl<W: Write> ResultLog<W> {

    pub fn from_writer(inner: W) -> Result<Self, LprError> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(CSV_HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn append(&mut self, source_image: &str, crop_name: &str, text: &str) -> Result<(), LprError> {
        self.writer.write_record([source_image, crop_name, text])?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(self) -> Result<W, LprError> {
        Ok(self.writer.into_inner().map_err(|e| e.into_error())?)
    }
}
