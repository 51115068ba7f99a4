//! Burn-backed graph convolution forward pass (opt-in).
//!
//! Inference-only mirror of [`crate::nn::GraphConvolution`] on Burn tensors,
//! so trained parameters can run on Burn backends (ndarray / wgpu / tch).
//!
//! Ownership: the candle layer remains the single source of truth for the
//! math. This module must be parity-tested against it (see tests below).

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::error::{Error, Result};
use crate::graph::SparseAdjacency;
use crate::nn::GraphConvolution;

/// Graph convolution with parameters copied out of a candle layer.
#[derive(Clone)]
pub struct BurnGraphConvolution<B: Backend> {
    weight: Tensor<B, 2>,
    bias: Tensor<B, 1>,
}

impl<B: Backend> BurnGraphConvolution<B> {
    /// Copy weight and bias from `layer` onto `device`.
    pub fn from_candle(layer: &GraphConvolution, device: &B::Device) -> Result<Self> {
        let (fin, fout) = (layer.in_features(), layer.out_features());
        let w = layer.weight().flatten_all()?.to_vec1::<f32>()?;
        let b = layer.bias().to_vec1::<f32>()?;
        Ok(Self {
            weight: Tensor::from_data(TensorData::new(w, [fin, fout]), device),
            bias: Tensor::from_data(TensorData::new(b, [fout]), device),
        })
    }

    pub fn in_features(&self) -> usize {
        self.weight.dims()[0]
    }

    /// `Â (X W) + b` with a dense `(N, N)` adjacency.
    pub fn forward(&self, x: Tensor<B, 2>, adj: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        let [n, f] = x.dims();
        if f != self.in_features() {
            return Err(Error::DimensionMismatch {
                context: "burn graph convolution input features",
                expected: self.in_features(),
                got: f,
            });
        }
        let [rows, cols] = adj.dims();
        if rows != n || cols != n {
            return Err(Error::DimensionMismatch {
                context: "burn adjacency size vs feature rows",
                expected: n,
                got: if rows != n { rows } else { cols },
            });
        }
        let support = x.matmul(self.weight.clone());
        Ok(adj.matmul(support) + self.bias.clone().unsqueeze::<2>())
    }
}

/// Densify a [`SparseAdjacency`] onto a Burn device.
pub fn dense_adjacency<B: Backend>(adj: &SparseAdjacency, device: &B::Device) -> Tensor<B, 2> {
    let n = adj.num_nodes();
    let mut data = vec![0.0f32; n * n];
    for (r, c, v) in adj.triplets() {
        data[r * n + c] = v;
    }
    Tensor::from_data(TensorData::new(data, [n, n]), device)
}

/// Copy a `(rows, cols)` f32 candle tensor onto a Burn device.
pub fn from_candle_2d<B: Backend>(
    t: &candle_core::Tensor,
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    let (rows, cols) = t.dims2()?;
    let data = t.flatten_all()?.to_vec1::<f32>()?;
    Ok(Tensor::from_data(TensorData::new(data, [rows, cols]), device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReproConfig;
    use burn_ndarray::NdArray;
    use candle_core::Device;
    use proptest::prelude::*;

    type B = NdArray<f32>;

    fn burn_matches_candle(n: usize, fin: usize, fout: usize, seed: u64) -> f32 {
        let device = <B as Backend>::Device::default();
        let mut rng = ReproConfig::with_seed(seed).rng();
        let layer = GraphConvolution::new(fin, fout, &mut rng, &Device::Cpu).unwrap();
        let edges: Vec<(usize, usize)> = (1..n).map(|i| (i - 1, i)).collect();
        let adj = SparseAdjacency::from_edges(n, &edges, &Device::Cpu)
            .unwrap()
            .with_self_loops()
            .unwrap()
            .symmetric_normalized()
            .unwrap();
        let x = candle_core::Tensor::randn(0f32, 1f32, (n, fin), &Device::Cpu).unwrap();

        let expected = layer.forward(&x, &adj).unwrap();
        let expected = expected.flatten_all().unwrap().to_vec1::<f32>().unwrap();

        let burn_layer = BurnGraphConvolution::<B>::from_candle(&layer, &device).unwrap();
        let got = burn_layer
            .forward(
                from_candle_2d::<B>(&x, &device).unwrap(),
                dense_adjacency::<B>(&adj, &device),
            )
            .unwrap();
        let got = got.to_data().to_vec::<f32>().unwrap();

        expected
            .iter()
            .zip(got.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn burn_forward_matches_candle_smoke() {
        let err = burn_matches_candle(5, 3, 2, 42);
        assert!(err < 1e-4, "max abs err={err}");
    }

    #[test]
    fn burn_rejects_wrong_width() {
        let device = <B as Backend>::Device::default();
        let mut rng = ReproConfig::default().rng();
        let layer = GraphConvolution::new(3, 2, &mut rng, &Device::Cpu).unwrap();
        let burn_layer = BurnGraphConvolution::<B>::from_candle(&layer, &device).unwrap();
        let x = Tensor::<B, 2>::zeros([4, 5], &device);
        let adj = Tensor::<B, 2>::zeros([4, 4], &device);
        assert!(burn_layer.forward(x, adj).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 16,
            max_shrink_iters: 0,
            .. ProptestConfig::default()
        })]

        #[test]
        fn prop_burn_forward_matches_candle(n in 1usize..10, fin in 1usize..6, fout in 1usize..6, seed in any::<u64>()) {
            let err = burn_matches_candle(n, fin, fout, seed);
            prop_assert!(err < 1e-4, "max abs err={err}");
        }
    }
}
