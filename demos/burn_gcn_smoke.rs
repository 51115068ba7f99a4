//! Run a candle-initialized graph convolution on the Burn ndarray backend.
//!
//! Run:
//!   cargo run --example burn_gcn_smoke --features backend-burn

use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use candle_core::Device;
use gcnet::burn_gcn::{dense_adjacency, from_candle_2d, BurnGraphConvolution};
use gcnet::{dataset, GraphConvolution, ReproConfig};

type B = NdArray<f32>;

fn main() -> anyhow::Result<()> {
    let device = <B as Backend>::Device::default();
    let data = dataset::two_pairs(&Device::Cpu)?;

    let mut rng = ReproConfig::default().rng();
    let layer = GraphConvolution::new(data.num_features(), 3, &mut rng, &Device::Cpu)?;
    let burn_layer = BurnGraphConvolution::<B>::from_candle(&layer, &device)?;

    let y = burn_layer.forward(
        from_candle_2d::<B>(&data.features, &device)?,
        dense_adjacency::<B>(&data.adjacency, &device),
    )?;
    let y = y
        .to_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    println!("y (first row): {:?}", &y[0..3]);
    Ok(())
}
