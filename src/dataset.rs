//! Dataset generation and (de)serialization for capacitated PDP instances.
//!
//! A dataset is either sampled synthetically or read from a JSON file holding
//! an array of `[depot, locations, demand, ...]` records. Fields after the
//! demand are reserved for per-node typing and are skipped when loading.

use crate::error::FormatError;
use crate::instance::{Coord, PdpInstance};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::Index;
use std::path::{Path, PathBuf};

/// Extension a dataset file must carry
pub const DATASET_EXTENSION: &str = "json";

/// Pickup demand range for `num_pairs` pairs under unit capacity.
///
/// With demands in `[1/(1.2k), 1/(0.25k)]` the vehicle holds on average
/// between 1.25 and 6 open pickups at a time.
pub fn demand_bounds(num_pairs: usize) -> (f64, f64) {
    let k = num_pairs as f64;
    (1.0 / (1.2 * k), 1.0 / (0.25 * k))
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Load instances from this file instead of sampling them
    pub filename: Option<PathBuf>,
    /// Number of locations per instance (pickups + deliveries, even)
    pub size: usize,
    /// Number of instances to sample, or the window length when loading
    pub num_samples: usize,
    /// First record of the window when loading
    pub offset: usize,
    /// Random seed for sampling
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            filename: None,
            size: 20,
            num_samples: 1000,
            offset: 0,
            seed: 1234,
        }
    }
}

/// Indexed collection of PDP instances
#[derive(Debug, Clone, Default)]
pub struct PdpDataset {
    data: Vec<PdpInstance>,
}

impl PdpDataset {
    /// Build the dataset described by `config`: loaded when a filename is set,
    /// sampled otherwise.
    pub fn new(config: &DatasetConfig) -> Result<Self, FormatError> {
        match &config.filename {
            Some(path) => Self::from_file(path, config.offset, config.num_samples),
            None => Self::generate(config),
        }
    }

    /// Wrap already built instances
    pub fn from_instances(data: Vec<PdpInstance>) -> Self {
        PdpDataset { data }
    }

    /// Sample `num_samples` instances with `size` locations each.
    pub fn generate(config: &DatasetConfig) -> Result<Self, FormatError> {
        let size = config.size;
        if size == 0 || size % 2 != 0 {
            return Err(FormatError::InvalidSize(size));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let k = size / 2;
        let (min_weight, max_weight) = demand_bounds(k);

        let mut data = Vec::with_capacity(config.num_samples);
        for _ in 0..config.num_samples {
            let locations: Vec<Coord> = (0..size).map(|_| [rng.gen::<f64>(), rng.gen::<f64>()]).collect();
            let depot = [rng.gen::<f64>(), rng.gen::<f64>()];

            let pickup: Vec<f64> = (0..k).map(|_| rng.gen_range(min_weight..=max_weight)).collect();
            let mut demand = Vec::with_capacity(size);
            demand.extend_from_slice(&pickup);
            demand.extend(pickup.iter().map(|d| -d));

            data.push(PdpInstance { depot, locations, demand });
        }

        log::info!(
            "Generated {} instances with {} pairs (demand range [{:.4}, {:.4}], seed {})",
            data.len(),
            k,
            min_weight,
            max_weight,
            config.seed
        );

        Ok(PdpDataset { data })
    }

    /// Load records `[offset, offset + num_samples)` from a dataset file.
    ///
    /// The window is clamped to the file: an offset past the end gives an
    /// empty dataset.
    pub fn from_file<P: AsRef<Path>>(path: P, offset: usize, num_samples: usize) -> Result<Self, FormatError> {
        let path = path.as_ref();
        check_extension(path)?;

        let file = File::open(path)?;
        let records: Vec<Record> = serde_json::from_reader(BufReader::new(file))?;
        let total = records.len();

        let start = offset.min(total);
        let end = offset.saturating_add(num_samples).min(total);

        let mut data = Vec::with_capacity(end - start);
        for (i, record) in records.into_iter().enumerate().skip(start).take(end - start) {
            let instance = PdpInstance {
                depot: record.depot,
                locations: record.locations,
                demand: record.demand,
            };
            instance
                .validate()
                .map_err(|reason| FormatError::Malformed { record: i, reason })?;
            data.push(instance);
        }

        log::info!("Loaded {} of {} instances from {:?} (offset {})", data.len(), total, path, offset);

        Ok(PdpDataset { data })
    }

    /// Write all instances as `[depot, locations, demand]` records.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FormatError> {
        let path = path.as_ref();
        check_extension(path)?;

        let records: Vec<(&Coord, &Vec<Coord>, &Vec<f64>)> = self
            .data
            .iter()
            .map(|inst| (&inst.depot, &inst.locations, &inst.demand))
            .collect();

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &records)?;
        log::info!("Saved {} instances to {:?}", self.data.len(), path);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&PdpInstance> {
        self.data.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PdpInstance> {
        self.data.iter()
    }

    pub fn instances(&self) -> &[PdpInstance] {
        &self.data
    }
}

impl Index<usize> for PdpDataset {
    type Output = PdpInstance;

    fn index(&self, idx: usize) -> &PdpInstance {
        &self.data[idx]
    }
}

impl<'a> IntoIterator for &'a PdpDataset {
    type Item = &'a PdpInstance;
    type IntoIter = std::slice::Iter<'a, PdpInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

fn check_extension(path: &Path) -> Result<(), FormatError> {
    match path.extension() {
        Some(ext) if ext == DATASET_EXTENSION => Ok(()),
        _ => Err(FormatError::Extension {
            path: path.to_path_buf(),
            expected: DATASET_EXTENSION,
        }),
    }
}

/// One serialized instance; trailing fields are ignored.
struct Record {
    depot: Coord,
    locations: Vec<Coord>,
    demand: Vec<f64>,
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [depot, locations, demand, ...] record")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Record, A::Error> {
                let depot = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let locations = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let demand = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(2, &self))?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(Record { depot, locations, demand })
            }
        }

        deserializer.deserialize_seq(RecordVisitor)
    }
}
