//! GCN vs. MLP on the CORA citation graph.
//!
//! Expects `cora.content` and `cora.cites` in the given directory.
//!
//! Run:
//!   cargo run --release --example cora_gcn -- data/cora [config.json]
//!
//! The optional JSON document may set `repro`, `model` and `train` sections;
//! anything omitted keeps its default.

use std::path::PathBuf;

use candle_core::Device;
use gcnet::{
    dataset, train, Gcn, GraphDataset, Mlp, ModelConfig, NodeClassifier, ReproConfig, TrainConfig,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunConfig {
    repro: ReproConfig,
    model: ModelConfig,
    train: TrainConfig,
}

fn evaluate<M: NodeClassifier>(
    name: &str,
    model: &M,
    data: &GraphDataset,
    cfg: &RunConfig,
) -> anyhow::Result<()> {
    let report = train::train(model, data, &cfg.train)?;
    let test = train::accuracy(model, data, &data.splits.test)?;
    println!(
        "{name}: final loss {:.4}, train acc {:.3}, val acc {}, test acc {:.3}",
        report.final_loss().unwrap_or(f32::NAN),
        report.train_accuracy,
        report
            .val_accuracy
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}")),
        test
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let dir = PathBuf::from(args.next().unwrap_or_else(|| "data/cora".into()));
    let cfg: RunConfig = match args.next() {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => RunConfig::default(),
    };
    cfg.model.validate()?;
    cfg.train.validate()?;

    let dev = &Device::Cpu;
    let data = dataset::load_cora(&dir, dev)?;

    let (fin, hidden, classes) = (data.num_features(), cfg.model.hidden_dim, data.num_classes());
    let mlp = Mlp::new(fin, hidden, classes, &cfg.repro, dev)?;
    evaluate("mlp", &mlp, &data, &cfg)?;

    let gcn = Gcn::new(fin, hidden, classes, &cfg.repro, dev)?;
    evaluate("gcn", &gcn, &data, &cfg)?;

    let correct = train::prediction_correctness(&gcn, &data, &data.splits.test)?;
    let hits = correct.iter().filter(|&&c| c).count();
    println!("gcn test nodes correct: {hits}/{}", correct.len());
    Ok(())
}
