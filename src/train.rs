//! Full-batch training and evaluation.
//!
//! Every step runs the model over the whole graph; the loss only reads the
//! rows in the train partition. Evaluation works the same way with another
//! partition.

use candle_core::{DType, Tensor, D};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW, SGD};

use crate::config::{OptimizerKind, TrainConfig};
use crate::dataset::GraphDataset;
use crate::error::{Error, Result};
use crate::graph::IndexSet;
use crate::nn::NodeClassifier;

/// Outcome of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Train-partition loss at each epoch, before that epoch's update.
    pub losses: Vec<f32>,
    /// Accuracy on the train partition after the last update.
    pub train_accuracy: f32,
    /// Accuracy on the validation partition, if it is non-empty.
    pub val_accuracy: Option<f32>,
}

impl TrainReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

/// Train `model` on `data.splits.train` with the optimizer named in `cfg`.
pub fn train<M: NodeClassifier>(
    model: &M,
    data: &GraphDataset,
    cfg: &TrainConfig,
) -> Result<TrainReport> {
    cfg.validate()?;
    match cfg.optimizer {
        OptimizerKind::AdamW => {
            let params = ParamsAdamW {
                lr: cfg.learning_rate,
                weight_decay: cfg.weight_decay,
                ..ParamsAdamW::default()
            };
            let opt = AdamW::new(model.vars(), params)?;
            train_with(model, data, opt, cfg)
        }
        OptimizerKind::Sgd => {
            let opt = SGD::new(model.vars(), cfg.learning_rate)?;
            train_with(model, data, opt, cfg)
        }
    }
}

/// Training loop over any candle optimizer. Runs exactly `cfg.epochs` steps.
pub fn train_with<M, O>(
    model: &M,
    data: &GraphDataset,
    mut optimizer: O,
    cfg: &TrainConfig,
) -> Result<TrainReport>
where
    M: NodeClassifier,
    O: Optimizer,
{
    cfg.validate()?;
    cfg.check_device(data.features.device())?;
    for var in model.vars() {
        cfg.check_device(var.device())?;
    }
    let train_idx = &data.splits.train;
    train_idx.require_non_empty()?;
    train_idx.check_bounds(data.num_nodes())?;

    tracing::info!(
        epochs = cfg.epochs,
        lr = optimizer.learning_rate(),
        train_nodes = train_idx.len(),
        "training started"
    );

    let mut losses = Vec::with_capacity(cfg.epochs);
    for epoch in 0..cfg.epochs {
        let logits = model.forward(&data.features, &data.adjacency)?;
        let loss = masked_loss(&logits, &data.labels, train_idx)?;
        optimizer.backward_step(&loss)?;

        let loss = loss.to_scalar::<f32>()?;
        losses.push(loss);
        tracing::debug!(epoch, loss, "step");

        if cfg.log_every > 0 && (epoch + 1) % cfg.log_every == 0 {
            let acc = accuracy_from_logits(&logits.detach(), &data.labels, train_idx)?;
            tracing::info!(epoch = epoch + 1, loss, train_acc = acc, "progress");
        }
    }

    let train_accuracy = accuracy(model, data, train_idx)?;
    let val_accuracy = if data.splits.val.is_empty() {
        None
    } else {
        Some(accuracy(model, data, &data.splits.val)?)
    };
    tracing::info!(train_accuracy, ?val_accuracy, "training finished");

    Ok(TrainReport {
        losses,
        train_accuracy,
        val_accuracy,
    })
}

/// Mean cross entropy over the rows in `idx`.
pub fn masked_loss(logits: &Tensor, labels: &Tensor, idx: &IndexSet) -> Result<Tensor> {
    check_rows(logits, labels, idx)?;
    let ids = idx.to_tensor(logits.device())?;
    let logits = logits.index_select(&ids, 0)?;
    let targets = labels.index_select(&ids, 0)?;
    Ok(loss::cross_entropy(&logits, &targets)?)
}

/// Fraction of rows in `idx` whose argmax matches the label.
pub fn accuracy_from_logits(logits: &Tensor, labels: &Tensor, idx: &IndexSet) -> Result<f32> {
    check_rows(logits, labels, idx)?;
    let ids = idx.to_tensor(logits.device())?;
    let predicted = logits.index_select(&ids, 0)?.argmax(D::Minus1)?;
    let truth = labels.index_select(&ids, 0)?;
    let correct = predicted
        .eq(&truth)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(correct / idx.len() as f32)
}

/// Detached forward pass, then [`accuracy_from_logits`].
pub fn accuracy<M: NodeClassifier>(model: &M, data: &GraphDataset, idx: &IndexSet) -> Result<f32> {
    idx.require_non_empty()?;
    let logits = model.forward(&data.features, &data.adjacency)?.detach();
    accuracy_from_logits(&logits, &data.labels, idx)
}

/// Predicted class for every node.
pub fn predictions<M: NodeClassifier>(model: &M, data: &GraphDataset) -> Result<Vec<u32>> {
    let logits = model.forward(&data.features, &data.adjacency)?.detach();
    Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
}

/// Per-node correctness over `idx`, in `idx` order. This is the color vector
/// handed to graph renderers.
pub fn prediction_correctness<M: NodeClassifier>(
    model: &M,
    data: &GraphDataset,
    idx: &IndexSet,
) -> Result<Vec<bool>> {
    idx.check_bounds(data.num_nodes())?;
    let predicted = predictions(model, data)?;
    let labels = data.labels.to_vec1::<u32>()?;
    Ok(idx.iter().map(|i| predicted[i] == labels[i]).collect())
}

fn check_rows(logits: &Tensor, labels: &Tensor, idx: &IndexSet) -> Result<()> {
    idx.require_non_empty()?;
    let (n, _) = logits.dims2()?;
    let label_len = labels.dims1()?;
    if label_len != n {
        return Err(Error::DimensionMismatch {
            context: "label count vs logit rows",
            expected: n,
            got: label_len,
        });
    }
    idx.check_bounds(n)
}
