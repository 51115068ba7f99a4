//! gcnet: semi-supervised node classification with graph convolutions.
//!
//! Provides a sparse normalized adjacency, the graph convolution layer, a
//! two-layer GCN (plus a graph-blind MLP baseline), and a full-batch training
//! loop built on `candle` tensors and `candle_nn` optimizers.
//!
//! ```rust,ignore
//! use candle_core::Device;
//! use gcnet::{dataset, train, Gcn, NodeClassifier, ReproConfig, TrainConfig};
//!
//! let data = dataset::load_cora("data/cora", &Device::Cpu)?;
//! let model = Gcn::new(data.num_features(), 16, data.num_classes(), &ReproConfig::default(), &Device::Cpu)?;
//! let report = train::train(&model, &data, &TrainConfig::default())?;
//! let test_acc = train::accuracy(&model, &data, &data.splits.test)?;
//! ```

pub mod config;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod nn;
pub mod train;

#[cfg(feature = "backend-burn")]
pub mod burn_gcn;

pub use config::{ModelConfig, OptimizerKind, ReproConfig, TrainConfig};
pub use dataset::{GraphDataset, Splits};
pub use error::{Error, Result};
pub use graph::{IndexSet, SparseAdjacency};
pub use nn::{Dense, Gcn, GraphConvolution, Mlp, NodeClassifier};
pub use train::TrainReport;
