//! Minimal GCN smoke example on a synthetic two-class graph.
//!
//! Run:
//!   cargo run --example gcn_smoke

use candle_core::Device;
use gcnet::{dataset, train, Gcn, Mlp, ReproConfig, TrainConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let dev = &Device::Cpu;
    let data = dataset::separable(10, dev)?;
    let repro = ReproConfig::with_seed(0);
    let cfg = TrainConfig {
        epochs: 100,
        log_every: 25,
        ..TrainConfig::default()
    };

    let gcn = Gcn::new(data.num_features(), 8, data.num_classes(), &repro, dev)?;
    let report = train::train(&gcn, &data, &cfg)?;
    println!(
        "gcn: loss {:.4} -> {:.4}, train acc {:.2}",
        report.losses[0],
        report.final_loss().unwrap_or(f32::NAN),
        report.train_accuracy
    );

    let mlp = Mlp::new(data.num_features(), 8, data.num_classes(), &repro, dev)?;
    let report = train::train(&mlp, &data, &cfg)?;
    println!("mlp: train acc {:.2}", report.train_accuracy);

    let colors = train::prediction_correctness(&gcn, &data, &data.splits.train)?;
    println!("gcn correct per node: {colors:?}");
    Ok(())
}
