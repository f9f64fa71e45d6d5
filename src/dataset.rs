use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use log::{debug, warn};

use crate::geometry::BoundingBox;
use crate::image::Image;

/// Image sequence described by a `data.jsonl` manifest, one event per line.
pub struct Sequence {
    folder: PathBuf,
    reader: BufReader<File>,
    line: String,
    /// Number of frame lines in the manifest.
    pub length: u64,
}

pub enum SequenceEvent {
    Frame(Image),
    /// Reference box, the first one initializes the tracker.
    GroundTruth(BoundingBox),
    /// External detection used to re-anchor the search on the next frame.
    Detection(BoundingBox),
}

pub struct SequenceData {
    pub time: f64,
    pub event: SequenceEvent,
}

fn parse_box(value: &serde_json::Value) -> Result<BoundingBox> {
    let v = value.as_array().ok_or(anyhow!("Bounding box is not an array"))?;
    if v.len() != 4 {
        bail!("Bounding box must have 4 elements, got {}", v.len());
    }
    let v = v
        .iter()
        .map(|x| x.as_f64().ok_or(anyhow!("Bounding box element is not a number")))
        .collect::<Result<Vec<f64>>>()?;
    Ok(BoundingBox::new(v[0], v[1], v[2], v[3]))
}

/// Decode a frame, keeping color when the file has it.
pub fn load_frame(path: &Path) -> Result<Image> {
    let decoded = ::image::open(path).context(format!("Failed to decode {}", path.display()))?;
    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    if decoded.color().has_color() {
        Ok(Image::new(width, height, 3, decoded.to_rgb8().into_raw()))
    } else {
        Ok(Image::gray(width, height, decoded.to_luma8().into_raw()))
    }
}

impl Sequence {
    pub fn new(folder: &Path) -> Result<Sequence> {
        let manifest = folder.join("data.jsonl");
        let file = File::open(&manifest).context(format!("Cannot open {}", manifest.display()))?;
        let mut length = 0;
        for line in BufReader::new(File::open(&manifest)?).lines() {
            if line?.contains("\"frame\"") {
                length += 1;
            }
        }
        debug!("{} frames in {}", length, manifest.display());
        Ok(Sequence {
            folder: folder.to_path_buf(),
            reader: BufReader::new(file),
            line: String::new(),
            length,
        })
    }

    pub fn next(&mut self) -> Result<Option<SequenceData>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return Ok(None),
                Err(err) => bail!("Failed to read line {}", err),
                _ => {}
            }
            if self.line.trim().is_empty() {
                continue;
            }

            let value: serde_json::Value = serde_json::from_str(&self.line)
                .context(format!("JSON deserialization failed for line: {}", self.line))?;
            let value = value.as_object().ok_or(anyhow!("JSON line is not a map"))?;

            let time = value
                .get("time")
                .and_then(|t| t.as_f64())
                .ok_or(anyhow!("Time is not a number"))?;

            let event = if let Some(frame) = value.get("frame") {
                let path = frame.as_str().ok_or(anyhow!("Frame path is not a string"))?;
                SequenceEvent::Frame(load_frame(&self.folder.join(path))?)
            } else if let Some(bb) = value.get("groundTruth") {
                SequenceEvent::GroundTruth(parse_box(bb)?)
            } else if let Some(bb) = value.get("detection") {
                SequenceEvent::Detection(parse_box(bb)?)
            } else {
                warn!("Unrecognised data format {}", self.line.trim());
                continue;
            };
            return Ok(Some(SequenceData { time, event }));
        }
    }
}
