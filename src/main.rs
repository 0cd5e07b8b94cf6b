use anyhow::Context;
use clap::{ App, Arg };
use tracing::{ info, warn };
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

use std::path::PathBuf;
use std::sync::Arc;

use lpr_plates::batch::{ self, BatchRunner };
use lpr_plates::capability::{ Detector, Recognizer };
use lpr_plates::config::Config;
use lpr_plates::error::{ LprError, LprErrorKind };
use lpr_plates::output::ResultLog;
use lpr_plates::RecognitionPipeline;


fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let matches = App::new("lpr-plates")
                    .version(env!("CARGO_PKG_VERSION"))
                    .about("Find license plates in images and read their text")
                    .arg(Arg::with_name("INPUT")
                        .help("directory with source images")
                        .index(1))
                    .arg(Arg::with_name("config")
                        .short("c")
                        .long("config")
                        .takes_value(true)
                        .help("JSON configuration file"))
                    .arg(Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .takes_value(true)
                        .help("directory for artifacts and the result table"))
                    .arg(Arg::with_name("detector")
                        .long("detector")
                        .takes_value(true)
                        .help("frozen detector graph"))
                    .arg(Arg::with_name("recognizer")
                        .long("recognizer")
                        .takes_value(true)
                        .help("frozen recognizer graph"))
                    .arg(Arg::with_name("min-area")
                        .long("min-area")
                        .takes_value(true)
                        .help("ignore detections with at most this many pixels"))
                    .arg(Arg::with_name("workers")
                        .long("workers")
                        .takes_value(true)
                        .help("plate regions processed in parallel"))
                    .arg(Arg::with_name("no-artifacts")
                        .long("no-artifacts")
                        .help("only write the result table"))
                    .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };
    if let Some(input) = matches.value_of("INPUT") {
        config.input_dir = PathBuf::from(input);
    }
    if let Some(output) = matches.value_of("output") {
        config.output_dir = PathBuf::from(output);
    }
    if let Some(detector) = matches.value_of("detector") {
        config.detector_model = PathBuf::from(detector);
    }
    if let Some(recognizer) = matches.value_of("recognizer") {
        config.recognizer_model = PathBuf::from(recognizer);
    }
    if let Some(min_area) = matches.value_of("min-area") {
        config.min_area = min_area.parse().context("--min-area must be a whole number")?;
    }
    if let Some(workers) = matches.value_of("workers") {
        config.workers = workers.parse().context("--workers must be a whole number")?;
    }
    if matches.is_present("no-artifacts") {
        config.save_artifacts = false;
    }
    config.validate()?;

    let images = match batch::discover_images(&config.input_dir) {
        Ok(images) => images,
        Err(e) if matches!(e.kind(), LprErrorKind::NoInputFound(_)) => {
            warn!("{}", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    info!(images = images.len(), input = %config.input_dir.display(), "starting");

    let (detector, recognizer) = load_capabilities(&config)?;
    let pipeline = RecognitionPipeline::new(recognizer, &config)?;
    let runner = BatchRunner::new(detector.as_ref(), &pipeline, &config)?;

    let csv_path = config.results_csv_path();
    let mut log = ResultLog::create(&csv_path)?;
    let summary = runner.run(&images, &mut log)?;
    log.finish()?;

    println!("images: {}, skipped: {}, plates: {}, read: {}, results: {}",
        summary.images, summary.skipped_images, summary.regions, summary.recognized, csv_path.display());
    Ok(())
}

#[cfg(feature = "tensorflow")]
fn load_capabilities(config: &Config) -> Result<(Box<dyn Detector>, Arc<dyn Recognizer>), LprError> {
    use lpr_plates::tf::{ TfDetector, TfRecognizer };

    let detector = TfDetector::new(&config.detector_model, config)?;
    let recognizer = TfRecognizer::new(&config.recognizer_model, config)?;
    Ok((Box::new(detector), Arc::new(recognizer)))
}

#[cfg(not(feature = "tensorflow"))]
fn load_capabilities(config: &Config) -> Result<(Box<dyn Detector>, Arc<dyn Recognizer>), LprError> {
    Err(LprErrorKind::DetectorUnavailable {
        path: config.detector_model.clone(),
        reason: "no model backend compiled in, rebuild with `--features tensorflow`".to_string(),
    }.into())
}
