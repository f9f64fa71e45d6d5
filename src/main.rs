use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use indicatif::ProgressStyle;
use tracing::{info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::filter::LevelFilter;

use dsst_rust::config::*;
use dsst_rust::dataset::*;
use dsst_rust::geometry::BoundingBox;
use dsst_rust::tracker::Tracker;

#[derive(Parser)]
pub struct Args {
    #[clap(short, default_value = "./data/sequence")]
    pub input_folder: String,
    #[clap(flatten)]
    pub run: RunConfig,
}

#[derive(Serialize)]
struct FrameOutput {
    time: f64,
    #[serde(rename = "box")]
    bounding_box: Option<BoundingBox>,
    success: bool,
    psr: Option<f64>,
}

fn load_config(run: &RunConfig) -> Result<TrackerConfig> {
    let mut config = match &run.config {
        Some(path) => {
            let file = File::open(path).context(format!("Cannot open config {}", path))?;
            serde_json::from_reader(BufReader::new(file))
                .context(format!("Invalid tracker config {}", path))?
        }
        None => TrackerConfig::default(),
    };
    run.apply(&mut config);
    Ok(config)
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    let config = load_config(&args.run)?;

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .with(LevelFilter::INFO)
        .init();

    // load sequence
    let sequence_folder_path = Path::new(&args.input_folder);
    let mut sequence = Sequence::new(sequence_folder_path)?;

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(sequence.length);
    let header_span_enter = header_span.enter();

    let mut tracker = Tracker::new(config).context("Invalid tracker config")?;
    let mut ground_truth_seen = false;
    let mut pending_init: Option<BoundingBox> = None;
    let mut hint: Option<BoundingBox> = None;

    while let Some(data) = sequence.next()? {
        let frame = match data.event {
            SequenceEvent::GroundTruth(bb) => {
                if !ground_truth_seen {
                    ground_truth_seen = true;
                    pending_init = Some(bb);
                }
                continue;
            }
            SequenceEvent::Detection(bb) => {
                hint = Some(bb);
                continue;
            }
            SequenceEvent::Frame(frame) => frame,
        };
        header_span.pb_inc(1);

        let output = if let Some(bb) = pending_init.take() {
            let success = match tracker.reinit(&frame, &bb) {
                Ok(()) => true,
                Err(err) => {
                    warn!(%err, "initialization failed");
                    false
                }
            };
            FrameOutput {
                time: data.time,
                bounding_box: tracker.bounding_box(),
                success,
                psr: None,
            }
        } else if tracker.is_initialized() {
            let result = match hint.take() {
                Some(hint) => tracker.update_at(&frame, &hint),
                None => tracker.update(&frame),
            };
            FrameOutput {
                time: data.time,
                bounding_box: Some(result.bounding_box),
                success: result.success,
                psr: tracker.last_psr(),
            }
        } else {
            FrameOutput {
                time: data.time,
                bounding_box: None,
                success: false,
                psr: None,
            }
        };
        println!("{}", serde_json::to_string(&output)?);
    }
    info!("sequence finished");

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    Ok(())
}
