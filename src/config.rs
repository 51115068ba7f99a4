//! Reproducibility, model and training configuration.
//!
//! Seeds and determinism are carried by an explicit [`ReproConfig`] that is
//! handed to model constructors, instead of being set once as process-wide
//! state. Every struct deserializes with `#[serde(default)]`, so a partial
//! document only overrides what it names.

use candle_core::{Device, DeviceLocation};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Seed and determinism settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReproConfig {
    /// Seed for parameter initialization.
    pub seed: u64,
    /// Restrict computation to kernels with a deterministic reduction order (CPU).
    pub deterministic: bool,
}

impl Default for ReproConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            deterministic: true,
        }
    }
}

impl ReproConfig {
    /// Config with the given seed and deterministic mode on.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Fresh RNG stream for this seed.
    ///
    /// ChaCha8 is used because its output is stable across platforms and
    /// `rand` releases, unlike `StdRng`.
    #[must_use]
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }

    /// Reject devices whose kernels may reorder floating point reductions.
    pub fn check_device(&self, device: &Device) -> Result<()> {
        check_deterministic_location(self.deterministic, device.location())
    }
}

fn check_deterministic_location(deterministic: bool, location: DeviceLocation) -> Result<()> {
    if deterministic && location != DeviceLocation::Cpu {
        return Err(Error::InvalidConfig(format!(
            "deterministic mode requires the CPU device, got {location:?}"
        )));
    }
    Ok(())
}

/// Model width settings. Input and class widths come from the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { hidden_dim: 16 }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 {
            return Err(Error::InvalidConfig("hidden_dim must be positive".into()));
        }
        Ok(())
    }
}

/// Optimizer used by [`crate::train::train`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Adam with decoupled weight decay.
    #[default]
    AdamW,
    /// Plain stochastic gradient descent (weight decay ignored).
    Sgd,
}

/// Full-batch training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Fixed epoch budget; there is no convergence-based stopping.
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub optimizer: OptimizerKind,
    /// Emit an `info` line every `log_every` epochs (0 disables).
    pub log_every: usize,
    /// Refuse to train on non-CPU data or parameters.
    pub deterministic: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.01,
            weight_decay: 5e-4,
            optimizer: OptimizerKind::AdamW,
            log_every: 10,
            deterministic: true,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be a positive finite number, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }

    /// Same rule as [`ReproConfig::check_device`], for the training loop.
    pub fn check_device(&self, device: &Device) -> Result<()> {
        check_deterministic_location(self.deterministic, device.location())
    }
}
