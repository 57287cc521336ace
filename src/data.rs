use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nalgebra::DVector;
use tracing::debug;

use crate::{
    config::TrainingConfig,
    example::{Example, ImageRecord},
    nn::Sample,
    tfrecord::{RecordReader, RecordWriter},
};

/// Suffixes of the train, valid and test record files of a data mode.
pub const RECORD_SUFFIXES: [&str; 3] = ["_train.tfrecords", "_valid.tfrecords", "_test.tfrecords"];

/// `{mode}_train.tfrecords`, `{mode}_valid.tfrecords`, `{mode}_test.tfrecords`.
pub fn record_names(mode: &str) -> [String; 3] {
    RECORD_SUFFIXES.map(|suffix| format!("{mode}{suffix}"))
}

pub fn record_paths(dir: impl AsRef<Path>, mode: &str) -> [PathBuf; 3] {
    record_names(mode).map(|name| dir.as_ref().join(name))
}

#[derive(Debug, Clone, Default)]
pub struct Split {
    pub images: Vec<DVector<f32>>,
    pub labels: Vec<usize>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.images
            .iter()
            .cloned()
            .zip(self.labels.iter().copied())
            .collect()
    }
}

/// The train, valid and test splits of one data mode.
#[derive(Debug, Clone)]
pub struct DataHolder {
    shape: (usize, usize, usize),
    pub train: Split,
    pub valid: Split,
    pub test: Split,
    records: [PathBuf; 3],
}

impl DataHolder {
    pub fn load(config: &TrainingConfig, records: &[PathBuf; 3]) -> Result<Self> {
        let mut shape = None;
        let [train, valid, test] = records;

        let train = read_split(train, config.num_labels, &mut shape)?;
        let valid = read_split(valid, config.num_labels, &mut shape)?;
        let test = read_split(test, config.num_labels, &mut shape)?;

        if train.is_empty() {
            bail!("training records '{}' are empty", records[0].display());
        }

        Ok(Self {
            shape: shape.unwrap_or_default(),
            train,
            valid,
            test,
            records: records.clone(),
        })
    }

    /// `(height, width, depth)` shared by every loaded record.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    /// Number of network inputs, `height * width * depth`. Taken from the
    /// loaded pixels, whose count was checked against the shape per record.
    pub fn input_size(&self) -> usize {
        self.train.images.first().map_or(0, |image| image.len())
    }

    pub fn valid_record(&self) -> &Path {
        &self.records[1]
    }
}

fn read_split(
    path: &Path,
    num_labels: usize,
    shape: &mut Option<(usize, usize, usize)>,
) -> Result<Split> {
    let mut split = Split::default();

    for (i, payload) in RecordReader::open(path)?.enumerate() {
        let context = || format!("record {i} of '{}'", path.display());
        let payload = payload.with_context(context)?;
        let record = Example::decode(&payload)
            .and_then(|example| ImageRecord::from_example(&example))
            .with_context(context)?;

        match *shape {
            Some(expected) if expected != record.shape() => bail!(
                "{}: shape {:?} differs from {:?}",
                context(),
                record.shape(),
                expected
            ),
            Some(_) => {}
            None => *shape = Some(record.shape()),
        }
        if record.label >= num_labels {
            bail!(
                "{}: label {} outside 0..{}",
                context(),
                record.label,
                num_labels
            );
        }

        let pixels = record.pixels.iter().map(|p| *p as f32 / 255.);
        split
            .images
            .push(DVector::from_iterator(record.pixels.len(), pixels));
        split.labels.push(record.label);
    }

    debug!(path = %path.display(), examples = split.len(), "loaded records");
    Ok(split)
}

/// Writes `images` to a record file, one example each.
pub fn write_records(path: impl AsRef<Path>, images: &[ImageRecord]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = RecordWriter::create(path)?;
    for image in images {
        writer.write_record(&image.to_example().encode())?;
    }
    writer
        .into_inner()
        .with_context(|| format!("cannot flush '{}'", path.display()))?;
    Ok(())
}
