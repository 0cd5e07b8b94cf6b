//! Detector and recognizer backed by frozen TensorFlow graphs.

use image::{ DynamicImage, GenericImageView, imageops::FilterType };
use tensorflow::{ Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor };
use tracing::info;

use std::fs;
use std::path::Path;

use crate::capability::{ Detector, RawFragment, Recognizer };
use crate::config::Config;
use crate::error::{ LprError, LprErrorKind };
use crate::geometry::{ self, DetectionBox };
use crate::utils;

// ConfigProto { device_count { key: "GPU" value: 0 } }
const CPU_ONLY_CONFIG: [u8; 9] = [0x0a, 0x07, 0x0a, 0x03, b'G', b'P', b'U', 0x10, 0x00];

struct FrozenGraph {
    graph: Graph,
    session: Session,
}

impl FrozenGraph {

    fn load(pb_file: &Path, gpu_enabled: bool) -> Result<Self, LprError> {
        let pb = fs::read(pb_file)?;
        // import graph def
        let mut graph = Graph::new();
        let graph_def_options = ImportGraphDefOptions::new();
        graph.import_graph_def(&pb, &graph_def_options)?;
        // new session
        let mut session_option = SessionOptions::new();
        if !gpu_enabled {
            session_option.set_config(&CPU_ONLY_CONFIG)?;
        }
        let session = Session::new(&session_option, &graph)?;
        Ok(Self { graph, session })
    }
}

/// SSD style plate detector: `image_tensor` in, normalized
/// `detection_boxes` and `detection_scores` out.
pub struct TfDetector {
    model: FrozenGraph,
    input_name: &'static str,
    box_name: &'static str,
    scores_name: &'static str,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TfDetector {

    pub fn new(pb_file: impl AsRef<Path>, config: &Config) -> Result<Self, LprError> {
        let pb_file = pb_file.as_ref();
        let model = FrozenGraph::load(pb_file, config.gpu_enabled).map_err(|e| LprErrorKind::DetectorUnavailable {
            path: pb_file.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!(model = %pb_file.display(), "detector loaded");
        Ok(Self {
            model,
            input_name: "image_tensor",
            box_name: "detection_boxes",
            scores_name: "detection_scores",
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }
}

impl Detector for TfDetector {

    fn detect(&self, img: &DynamicImage) -> Result<Vec<DetectionBox>, LprError> {
        let graph = &self.model.graph;
        let (width, height) = img.dimensions();
        let img_data = img.to_rgb8().into_raw();
        let img_tensor = Tensor::new(&[1, height as u64, width as u64, 3]).with_values(&img_data)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&graph.operation_by_name_required(self.input_name)?, 0, &img_tensor);
        let box_token = args.request_fetch(&graph.operation_by_name_required(self.box_name)?, 0);
        let scores_token = args.request_fetch(&graph.operation_by_name_required(self.scores_name)?, 0);
        self.model.session.run(&mut args)?;
        let boxes: Tensor<f32> = args.fetch(box_token)?;
        let scores: Tensor<f32> = args.fetch(scores_token)?;

        // box ymin xmin ymax xmax normalize 1
        let detections: Vec<DetectionBox> = boxes.chunks(4).zip(scores.iter()).map(|(v, score)| {
            DetectionBox::from_normalized([v[0], v[1], v[2], v[3]], width, height, *score)
        }).filter(|a_box| a_box.passes_confidence(self.confidence_threshold)).collect();
        Ok(geometry::suppress_overlaps(&detections, self.iou_threshold))
    }
}

/// CTC line recognizer over the Latin plate alphabet. The whole plate is read
/// as one fragment.
pub struct TfRecognizer {
    model: FrozenGraph,
    input_name: &'static str,
    output_name: &'static str,
    input_width: u32,
    input_height: u32,
}

impl TfRecognizer {

    pub fn new(pb_file: impl AsRef<Path>, config: &Config) -> Result<Self, LprError> {
        let pb_file = pb_file.as_ref();
        let model = FrozenGraph::load(pb_file, config.gpu_enabled).map_err(|e| LprErrorKind::RecognizerUnavailable {
            path: pb_file.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!(model = %pb_file.display(), "recognizer loaded");
        Ok(Self {
            model,
            input_name: "input_1",
            output_name: "dense_2/truediv",
            input_width: 160,
            input_height: 40,
        })
    }
}

impl Recognizer for TfRecognizer {

    fn read(&self, region: &DynamicImage) -> Result<Vec<RawFragment>, LprError> {
        let graph = &self.model.graph;
        let resized = region.resize_exact(self.input_width, self.input_height, FilterType::Triangle).to_luma8();
        let data: Vec<f32> = resized.into_raw().into_iter().map(|v| v as f32 / 255.0).collect();
        let tensor: Tensor<f32> = Tensor::new(&[1, self.input_height as u64, self.input_width as u64, 1]).with_values(&data)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&graph.operation_by_name_required(self.input_name)?, 0, &tensor);
        let token = args.request_fetch(&graph.operation_by_name_required(self.output_name)?, 0);
        self.model.session.run(&mut args)?;
        let probs: Tensor<f32> = args.fetch(token)?;

        let classes = probs.dims().last().copied().unwrap_or(0) as usize;
        let (text, confidence) = utils::ctc_greedy_decode(&probs, classes, &utils::LATIN_CHARS);
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![RawFragment::new(text, confidence)])
    }
}
