use crate::config::MemoryConfig;
use crate::error::{shape_error, Error, Result};
use log::*;
use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use rand::seq::index;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Frames drawn from memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledFrames {
    /// Identifier of every sampled frame, unique within its environment
    pub ids: Vec<u64>,
    /// `(S, n, D)` local descriptors
    pub descriptors: Array3<f32>,
    /// `(S, n, 3)` world points
    pub points: Array3<f32>,
}

impl SampledFrames {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A store of past frames partitioned by environment.
///
/// Only one environment is active at a time; every other operation applies to it.
pub trait FrameMemory {
    /// Makes `env` the active environment.
    fn swap(&mut self, env: &str) -> Result<()>;

    /// Appends one frame per row of `(B, Dg)` global descriptors with their
    /// `(B, n, D)` local descriptors and `(B, n, 3)` world points.
    fn store(
        &mut self,
        global: ArrayView2<f32>,
        descriptors: ArrayView3<f32>,
        points: ArrayView3<f32>,
    ) -> Result<()>;

    /// Draws up to `k` distinct frames of the active environment.
    fn sample_frames(&mut self, k: usize) -> Result<SampledFrames>;

    /// Number of frames in the active environment.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FrameRecord {
    id: u64,
    global: Vec<f32>,
    descriptors: Vec<f32>,
    points: Vec<f32>,
    n: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Environment {
    records: VecDeque<FrameRecord>,
    next_id: u64,
}

/// Bounded in-process [`FrameMemory`] that evicts the oldest frame first.
///
/// Inactive environments stay in RAM unless a swap directory is configured,
/// in which case they are written to `<swap_dir>/<env>.mem`.
#[derive(Debug)]
pub struct Memory {
    config: MemoryConfig,
    active: String,
    environment: Environment,
    parked: HashMap<String, Environment>,
    rng: Pcg64,
}

impl Memory {
    pub const DEFAULT_ENV: &'static str = "default";

    pub fn new(config: MemoryConfig) -> Self {
        let rng = Pcg64::seed_from_u64(config.seed);
        Self {
            config,
            active: Self::DEFAULT_ENV.to_owned(),
            environment: Environment::default(),
            parked: HashMap::new(),
            rng,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Name of the active environment.
    pub fn active(&self) -> &str {
        &self.active
    }

    fn swap_path(&self, env: &str) -> Option<PathBuf> {
        self.config
            .swap_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.mem", env)))
    }

    /// Writes an environment to its swap file, reporting any failed write.
    fn write_out(&self, path: &Path, env: &str, environment: &Environment) -> Result<()> {
        let io_error = |source| Error::SwapIo {
            path: path.to_owned(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| Error::SwapIo {
                path: dir.to_owned(),
                source,
            })?;
        }
        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        bincode::serialize_into(&mut writer, environment)?;
        let file = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
        file.sync_all().map_err(io_error)?;
        debug!(
            "Swapped out environment {} ({} frames) to {}",
            env,
            environment.records.len(),
            path.display()
        );
        Ok(())
    }

    fn read_in(&mut self, env: &str) -> Result<Environment> {
        if let Some(environment) = self.parked.remove(env) {
            return Ok(environment);
        }
        match self.swap_path(env) {
            Some(path) if path.exists() => {
                let file = File::open(&path).map_err(|source| Error::SwapIo {
                    path: path.clone(),
                    source,
                })?;
                let environment: Environment = bincode::deserialize_from(BufReader::new(file))?;
                debug!(
                    "Swapped in environment {} ({} frames) from {}",
                    env,
                    environment.records.len(),
                    path.display()
                );
                Ok(environment)
            }
            _ => Ok(Environment::default()),
        }
    }
}

impl FrameMemory for Memory {
    fn swap(&mut self, env: &str) -> Result<()> {
        if env == self.active {
            return Ok(());
        }
        // The active environment stays untouched until the outgoing one is
        // safely written and the incoming one is read.
        if let Some(path) = self.swap_path(&self.active) {
            self.write_out(&path, &self.active, &self.environment)?;
        }
        let incoming = self.read_in(env)?;
        let outgoing = std::mem::replace(&mut self.environment, incoming);
        let previous = std::mem::replace(&mut self.active, env.to_owned());
        if self.config.swap_dir.is_none() {
            self.parked.insert(previous, outgoing);
        }
        Ok(())
    }

    fn store(
        &mut self,
        global: ArrayView2<f32>,
        descriptors: ArrayView3<f32>,
        points: ArrayView3<f32>,
    ) -> Result<()> {
        self.config.validate()?;
        let (batch, global_dim) = global.dim();
        let (_, n, point_dim) = descriptors.dim();
        if global_dim != self.config.global_dim {
            return Err(shape_error(
                "global descriptors",
                format!("(B, {})", self.config.global_dim),
                global.shape(),
            ));
        }
        if descriptors.dim().0 != batch || point_dim != self.config.point_dim || n > self.config.n_feature {
            return Err(shape_error(
                "local descriptors",
                format!("({}, n <= {}, {})", batch, self.config.n_feature, self.config.point_dim),
                descriptors.shape(),
            ));
        }
        if points.dim() != (batch, n, 3) {
            return Err(shape_error("world points", format!("({}, {}, 3)", batch, n), points.shape()));
        }
        if let Some(front) = self.environment.records.front() {
            if front.n != n {
                return Err(shape_error(
                    "local descriptors",
                    format!("(B, {}, {}) like the stored frames", front.n, point_dim),
                    descriptors.shape(),
                ));
            }
        }
        for b in 0..batch {
            let record = FrameRecord {
                id: self.environment.next_id,
                global: global.row(b).to_vec(),
                descriptors: descriptors.index_axis(Axis(0), b).iter().copied().collect(),
                points: points.index_axis(Axis(0), b).iter().copied().collect(),
                n,
            };
            self.environment.next_id += 1;
            self.environment.records.push_back(record);
            if self.environment.records.len() > self.config.capacity {
                self.environment.records.pop_front();
            }
        }
        trace!("memory {} holds {} frames", self.active, self.len());
        Ok(())
    }

    fn sample_frames(&mut self, k: usize) -> Result<SampledFrames> {
        let records = &self.environment.records;
        let count = k.min(records.len());
        let n = records.front().map_or(0, |r| r.n);
        let dim = self.config.point_dim;
        let chosen = index::sample(&mut self.rng, records.len(), count);
        let mut ids = Vec::with_capacity(count);
        let mut descriptors = Array3::zeros((count, n, dim));
        let mut points = Array3::zeros((count, n, 3));
        for (s, i) in chosen.into_iter().enumerate() {
            let record = &records[i];
            ids.push(record.id);
            for (dst, &src) in descriptors.index_axis_mut(Axis(0), s).iter_mut().zip(&record.descriptors) {
                *dst = src;
            }
            for (dst, &src) in points.index_axis_mut(Axis(0), s).iter_mut().zip(&record.points) {
                *dst = src;
            }
        }
        Ok(SampledFrames {
            ids,
            descriptors,
            points,
        })
    }

    fn len(&self) -> usize {
        self.environment.records.len()
    }
}
