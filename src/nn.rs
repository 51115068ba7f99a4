//! Graph convolution layer, two-layer GCN, and the dense MLP baseline.
//!
//! Kipf & Welling, "Semi-Supervised Classification with Graph Convolutional
//! Networks", ICLR 2017:
//!
//! ```text
//! GraphConvolution:  H' = Â (H W) + b
//! Gcn:               logits = Â (relu(Â X W₁ + b₁) W₂) + b₂
//! Mlp:               logits = relu(X W₁ + b₁) W₂ + b₂
//! ```
//!
//! Weights and biases are drawn from `U[-1/√out, 1/√out]`. The bias bound
//! also uses the output width of the weight, not its own length.

use candle_core::{Device, Tensor, Var};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::config::ReproConfig;
use crate::error::{Error, Result};
use crate::graph::SparseAdjacency;

/// A model that maps node features (and the graph) to per-node class logits.
pub trait NodeClassifier {
    /// Full-graph forward pass: `(N, in)` features to `(N, classes)` logits.
    fn forward(&self, x: &Tensor, adj: &SparseAdjacency) -> Result<Tensor>;

    /// Trainable parameters, flat, in a stable order.
    fn vars(&self) -> Vec<Var>;
}

fn uniform_var<R: Rng + ?Sized>(
    shape: &[usize],
    bound: f32,
    rng: &mut R,
    device: &Device,
) -> Result<Var> {
    let dist = Uniform::new_inclusive(-bound, bound);
    let len: usize = shape.iter().product();
    let data: Vec<f32> = (0..len).map(|_| dist.sample(rng)).collect();
    Ok(Var::from_tensor(&Tensor::from_vec(data, shape.to_vec(), device)?)?)
}

fn init_params<R: Rng + ?Sized>(
    in_features: usize,
    out_features: usize,
    rng: &mut R,
    device: &Device,
) -> Result<(Var, Var)> {
    if in_features == 0 || out_features == 0 {
        return Err(Error::InvalidConfig(format!(
            "layer dimensions must be positive, got {in_features} -> {out_features}"
        )));
    }
    let bound = 1.0 / (out_features as f32).sqrt();
    let weight = uniform_var(&[in_features, out_features], bound, rng, device)?;
    let bias = uniform_var(&[out_features], bound, rng, device)?;
    Ok((weight, bias))
}

fn check_parts(weight: &Tensor, bias: &Tensor) -> Result<(usize, usize)> {
    let (in_features, out_features) = weight.dims2()?;
    let bias_len = bias.dims1()?;
    if bias_len != out_features {
        return Err(Error::DimensionMismatch {
            context: "bias length",
            expected: out_features,
            got: bias_len,
        });
    }
    Ok((in_features, out_features))
}

fn check_input(x: &Tensor, in_features: usize, context: &'static str) -> Result<usize> {
    let (n, f) = x.dims2()?;
    if f != in_features {
        return Err(Error::DimensionMismatch {
            context,
            expected: in_features,
            got: f,
        });
    }
    Ok(n)
}

/// Graph convolution: dense transform, then one sparse propagation, then bias.
#[derive(Debug, Clone)]
pub struct GraphConvolution {
    weight: Var,
    bias: Var,
    in_features: usize,
    out_features: usize,
}

impl GraphConvolution {
    /// Fresh layer. Draws the weight first, then the bias, from `rng`.
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self> {
        let (weight, bias) = init_params(in_features, out_features, rng, device)?;
        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Layer with explicit parameters: weight `(in, out)`, bias `(out,)`.
    pub fn from_parts(weight: &Tensor, bias: &Tensor) -> Result<Self> {
        let (in_features, out_features) = check_parts(weight, bias)?;
        Ok(Self {
            weight: Var::from_tensor(weight)?,
            bias: Var::from_tensor(bias)?,
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    pub fn bias(&self) -> &Tensor {
        self.bias.as_tensor()
    }

    pub fn vars(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    /// `Â (X W) + b` over the whole graph.
    pub fn forward(&self, x: &Tensor, adj: &SparseAdjacency) -> Result<Tensor> {
        let n = check_input(x, self.in_features, "graph convolution input features")?;
        if adj.num_nodes() != n {
            return Err(Error::DimensionMismatch {
                context: "adjacency size vs feature rows",
                expected: n,
                got: adj.num_nodes(),
            });
        }

        let support = x.matmul(self.weight.as_tensor())?;
        let output = adj.matmul(&support)?;
        tracing::trace!(nodes = n, out = self.out_features, "graph convolution");
        Ok(output.broadcast_add(self.bias.as_tensor())?)
    }
}

/// Two stacked graph convolutions with ReLU in between.
#[derive(Debug, Clone)]
pub struct Gcn {
    layer1: GraphConvolution,
    layer2: GraphConvolution,
}

impl Gcn {
    /// `input_features -> hidden_dim -> num_classes`, seeded from `repro`.
    pub fn new(
        input_features: usize,
        hidden_dim: usize,
        num_classes: usize,
        repro: &ReproConfig,
        device: &Device,
    ) -> Result<Self> {
        repro.check_device(device)?;
        let mut rng = repro.rng();
        let layer1 = GraphConvolution::new(input_features, hidden_dim, &mut rng, device)?;
        let layer2 = GraphConvolution::new(hidden_dim, num_classes, &mut rng, device)?;
        Ok(Self { layer1, layer2 })
    }

    pub fn from_layers(layer1: GraphConvolution, layer2: GraphConvolution) -> Result<Self> {
        if layer1.out_features() != layer2.in_features() {
            return Err(Error::DimensionMismatch {
                context: "gcn hidden width",
                expected: layer1.out_features(),
                got: layer2.in_features(),
            });
        }
        Ok(Self { layer1, layer2 })
    }

    pub fn layer1(&self) -> &GraphConvolution {
        &self.layer1
    }

    pub fn layer2(&self) -> &GraphConvolution {
        &self.layer2
    }
}

impl NodeClassifier for Gcn {
    fn forward(&self, x: &Tensor, adj: &SparseAdjacency) -> Result<Tensor> {
        let h = self.layer1.forward(x, adj)?.relu()?;
        self.layer2.forward(&h, adj)
    }

    fn vars(&self) -> Vec<Var> {
        let mut vars = self.layer1.vars();
        vars.extend(self.layer2.vars());
        vars
    }
}

/// Affine layer `X W + b`, initialized like [`GraphConvolution`].
#[derive(Debug, Clone)]
pub struct Dense {
    weight: Var,
    bias: Var,
    in_features: usize,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self> {
        let (weight, bias) = init_params(in_features, out_features, rng, device)?;
        Ok(Self {
            weight,
            bias,
            in_features,
        })
    }

    pub fn from_parts(weight: &Tensor, bias: &Tensor) -> Result<Self> {
        let (in_features, _) = check_parts(weight, bias)?;
        Ok(Self {
            weight: Var::from_tensor(weight)?,
            bias: Var::from_tensor(bias)?,
            in_features,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        check_input(x, self.in_features, "dense input features")?;
        Ok(x
            .matmul(self.weight.as_tensor())?
            .broadcast_add(self.bias.as_tensor())?)
    }

    pub fn vars(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

/// Graph-blind baseline: two dense layers with ReLU. The adjacency is ignored.
#[derive(Debug, Clone)]
pub struct Mlp {
    lin1: Dense,
    lin2: Dense,
}

impl Mlp {
    pub fn new(
        input_features: usize,
        hidden_dim: usize,
        num_classes: usize,
        repro: &ReproConfig,
        device: &Device,
    ) -> Result<Self> {
        repro.check_device(device)?;
        let mut rng = repro.rng();
        let lin1 = Dense::new(input_features, hidden_dim, &mut rng, device)?;
        let lin2 = Dense::new(hidden_dim, num_classes, &mut rng, device)?;
        Ok(Self { lin1, lin2 })
    }

    pub fn from_layers(lin1: Dense, lin2: Dense) -> Self {
        Self { lin1, lin2 }
    }
}

impl NodeClassifier for Mlp {
    fn forward(&self, x: &Tensor, _adj: &SparseAdjacency) -> Result<Tensor> {
        let h = self.lin1.forward(x)?.relu()?;
        self.lin2.forward(&h)
    }

    fn vars(&self) -> Vec<Var> {
        let mut vars = self.lin1.vars();
        vars.extend(self.lin2.vars());
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use proptest::prelude::*;

    #[test]
    fn test_gcn_layer_forward_shape() {
        let dev = Device::Cpu;
        let mut rng = ReproConfig::default().rng();
        let layer = GraphConvolution::new(64, 32, &mut rng, &dev).unwrap();

        let x = Tensor::randn(0f32, 1f32, (10, 64), &dev).unwrap();
        let adj = SparseAdjacency::identity(10, &dev).unwrap();

        let out = layer.forward(&x, &adj).unwrap();
        assert_eq!(out.dims(), &[10, 32]);
    }

    #[test]
    fn init_respects_output_width_bound() {
        let dev = Device::Cpu;
        let mut rng = ReproConfig::with_seed(1).rng();
        let layer = GraphConvolution::new(50, 4, &mut rng, &dev).unwrap();
        let bound = 0.5f32;

        let w = layer.weight().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = layer.bias().to_vec1::<f32>().unwrap();
        assert!(w.iter().chain(&b).all(|v| v.abs() <= bound));
        // 200 draws from U[-0.5, 0.5] should use most of the interval.
        let max = w.iter().fold(0f32, |m, v| m.max(v.abs()));
        assert!(max > 0.4, "max |w| = {max}");
    }

    #[test]
    fn same_seed_same_parameters() {
        let dev = Device::Cpu;
        let repro = ReproConfig::with_seed(11);
        let a = Gcn::new(5, 4, 3, &repro, &dev).unwrap();
        let b = Gcn::new(5, 4, 3, &repro, &dev).unwrap();
        for (va, vb) in a.vars().iter().zip(b.vars().iter()) {
            let da = va.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            let db = vb.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert_eq!(da, db);
        }
        let c = Gcn::new(5, 4, 3, &ReproConfig::with_seed(12), &dev).unwrap();
        let da = a.layer1().weight().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let dc = c.layer1().weight().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_ne!(da, dc);
    }

    #[test]
    fn feature_width_mismatch_fails_fast() {
        let dev = Device::Cpu;
        let mut rng = ReproConfig::default().rng();
        let layer = GraphConvolution::new(3, 2, &mut rng, &dev).unwrap();
        let adj = SparseAdjacency::identity(4, &dev).unwrap();

        let x = Tensor::zeros((4, 5), DType::F32, &dev).unwrap();
        let err = layer.forward(&x, &adj).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, got: 5, .. }));

        let x = Tensor::zeros((6, 3), DType::F32, &dev).unwrap();
        let err = layer.forward(&x, &adj).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 6, got: 4, .. }));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let dev = Device::Cpu;
        let mut rng = ReproConfig::default().rng();
        assert!(GraphConvolution::new(0, 2, &mut rng, &dev).is_err());
        assert!(Gcn::new(3, 0, 2, &ReproConfig::default(), &dev).is_err());
    }

    #[test]
    fn from_parts_checks_bias_length() {
        let dev = Device::Cpu;
        let w = Tensor::zeros((3, 2), DType::F32, &dev).unwrap();
        let b = Tensor::zeros(3, DType::F32, &dev).unwrap();
        assert!(GraphConvolution::from_parts(&w, &b).is_err());
        let b = Tensor::zeros(2, DType::F32, &dev).unwrap();
        let layer = GraphConvolution::from_parts(&w, &b).unwrap();
        assert_eq!((layer.in_features(), layer.out_features()), (3, 2));
    }

    #[test]
    fn layer_propagates_through_neighbors() {
        let dev = Device::Cpu;
        // Identity weight, zero bias: output = Â X.
        let w = Tensor::eye(2, DType::F32, &dev).unwrap();
        let b = Tensor::zeros(2, DType::F32, &dev).unwrap();
        let layer = GraphConvolution::from_parts(&w, &b).unwrap();
        let adj = SparseAdjacency::from_edges(2, &[(0, 1)], &dev)
            .unwrap()
            .with_self_loops()
            .unwrap()
            .row_normalized()
            .unwrap();
        let x = Tensor::new(&[[2f32, 0.0], [0.0, 4.0]], &dev).unwrap();
        let out = layer.forward(&x, &adj).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![1.0, 2.0], vec![1.0, 2.0]]);
    }

    #[test]
    fn gcn_exposes_four_parameters() {
        let dev = Device::Cpu;
        let gcn = Gcn::new(6, 4, 2, &ReproConfig::default(), &dev).unwrap();
        let shapes: Vec<Vec<usize>> = gcn.vars().iter().map(|v| v.dims().to_vec()).collect();
        assert_eq!(shapes, vec![vec![6, 4], vec![4], vec![4, 2], vec![2]]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 16,
            max_shrink_iters: 0,
            .. ProptestConfig::default()
        })]

        #[test]
        fn prop_forward_shape(n in 1usize..12, fin in 1usize..8, fout in 1usize..8, seed in any::<u64>()) {
            let dev = Device::Cpu;
            let mut rng = ReproConfig::with_seed(seed).rng();
            let layer = GraphConvolution::new(fin, fout, &mut rng, &dev).unwrap();
            let edges: Vec<(usize, usize)> = (1..n).map(|i| (i - 1, i)).collect();
            let adj = SparseAdjacency::from_edges(n, &edges, &dev)
                .unwrap()
                .with_self_loops()
                .unwrap()
                .row_normalized()
                .unwrap();
            let x = Tensor::randn(0f32, 1f32, (n, fin), &dev).unwrap();
            let out = layer.forward(&x, &adj).unwrap();
            prop_assert_eq!(out.dims(), &[n, fout]);
        }
    }
}
