//! Graph structure: sparse adjacency and node index partitions.
//!
//! The adjacency matrix is stored in coordinate (COO) form, coalesced and
//! sorted by `(row, col)`. A host-side copy of the triplets backs the
//! normalization routines; device tensors back the forward pass.
//!
//! ```text
//! (A · S)[r] = Σ_{(r, c, v) ∈ A} v · S[c]
//! ```
//!
//! The product is computed as a gather (`index_select` over `c`), a row-wise
//! scale by `v`, and a scatter-add (`index_add` over `r`). Both ops are
//! differentiable in candle, so gradients flow back into `S`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// Immutable sparse N×N adjacency matrix.
#[derive(Debug, Clone)]
pub struct SparseAdjacency {
    num_nodes: usize,
    rows: Vec<u32>,
    cols: Vec<u32>,
    values: Vec<f32>,
    row_ids: Tensor,
    col_ids: Tensor,
    /// Shape `(nnz, 1)` so it broadcasts across feature columns.
    weights: Tensor,
}

impl SparseAdjacency {
    /// Build from parallel `(row, col, value)` arrays.
    ///
    /// Duplicate `(row, col)` pairs are summed into a single entry.
    pub fn from_triplets(
        num_nodes: usize,
        rows: &[usize],
        cols: &[usize],
        values: &[f32],
        device: &Device,
    ) -> Result<Self> {
        if cols.len() != rows.len() {
            return Err(Error::DimensionMismatch {
                context: "adjacency column indices",
                expected: rows.len(),
                got: cols.len(),
            });
        }
        if values.len() != rows.len() {
            return Err(Error::DimensionMismatch {
                context: "adjacency values",
                expected: rows.len(),
                got: values.len(),
            });
        }

        let mut entries = BTreeMap::new();
        for ((&r, &c), &v) in rows.iter().zip(cols).zip(values) {
            let key = (check_node(r, num_nodes)?, check_node(c, num_nodes)?);
            *entries.entry(key).or_insert(0.0) += v;
        }
        Self::from_map(num_nodes, entries, device)
    }

    /// Undirected, unit-weight adjacency from an edge list.
    ///
    /// Each edge is inserted in both directions; repeated edges collapse.
    pub fn from_edges(
        num_nodes: usize,
        edges: &[(usize, usize)],
        device: &Device,
    ) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for &(a, b) in edges {
            let (a, b) = (check_node(a, num_nodes)?, check_node(b, num_nodes)?);
            entries.insert((a, b), 1.0);
            entries.insert((b, a), 1.0);
        }
        Self::from_map(num_nodes, entries, device)
    }

    /// Self-loops only: the N×N identity.
    pub fn identity(num_nodes: usize, device: &Device) -> Result<Self> {
        let entries = (0..num_nodes as u32).map(|i| ((i, i), 1.0)).collect();
        Self::from_map(num_nodes, entries, device)
    }

    fn from_map(
        num_nodes: usize,
        entries: BTreeMap<(u32, u32), f32>,
        device: &Device,
    ) -> Result<Self> {
        let nnz = entries.len();
        let mut rows = Vec::with_capacity(nnz);
        let mut cols = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        for ((r, c), v) in entries {
            rows.push(r);
            cols.push(c);
            values.push(v);
        }

        let row_ids = Tensor::from_vec(rows.clone(), nnz, device)?;
        let col_ids = Tensor::from_vec(cols.clone(), nnz, device)?;
        let weights = Tensor::from_vec(values.clone(), (nnz, 1), device)?;
        Ok(Self {
            num_nodes,
            rows,
            cols,
            values,
            row_ids,
            col_ids,
            weights,
        })
    }

    fn entries(&self) -> BTreeMap<(u32, u32), f32> {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.values)
            .map(|((&r, &c), &v)| ((r, c), v))
            .collect()
    }

    fn rebuild<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(u32, u32, f32) -> f32,
    {
        let entries = self
            .entries()
            .into_iter()
            .map(|((r, c), v)| ((r, c), f(r, c, v)))
            .collect();
        Self::from_map(self.num_nodes, entries, self.row_ids.device())
    }

    /// Copy with every diagonal entry set to 1. Idempotent.
    pub fn with_self_loops(&self) -> Result<Self> {
        let mut entries = self.entries();
        for i in 0..self.num_nodes as u32 {
            entries.insert((i, i), 1.0);
        }
        Self::from_map(self.num_nodes, entries, self.row_ids.device())
    }

    fn row_sums(&self) -> Vec<f32> {
        let mut sums = vec![0.0f32; self.num_nodes];
        for (&r, &v) in self.rows.iter().zip(&self.values) {
            sums[r as usize] += v;
        }
        sums
    }

    /// `D⁻¹ A`. Rows with zero degree stay zero.
    pub fn row_normalized(&self) -> Result<Self> {
        let inv: Vec<f32> = self.row_sums().into_iter().map(safe_recip).collect();
        self.rebuild(|r, _, v| v * inv[r as usize])
    }

    /// `D⁻¹ᐟ² A D⁻¹ᐟ²`, with degrees taken from row sums.
    pub fn symmetric_normalized(&self) -> Result<Self> {
        let inv_sqrt: Vec<f32> = self
            .row_sums()
            .into_iter()
            .map(|d| safe_recip(d.sqrt()))
            .collect();
        self.rebuild(|r, c, v| v * inv_sqrt[r as usize] * inv_sqrt[c as usize])
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn device(&self) -> &Device {
        self.row_ids.device()
    }

    /// Stored entries as `(row, col, value)`, sorted by `(row, col)`.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.values)
            .map(|((&r, &c), &v)| (r as usize, c as usize, v))
    }

    /// First stored `(row, col)` whose mirror `(col, row)` is absent.
    ///
    /// Only the sparsity pattern is compared: `D⁻¹ A` of a symmetric `A` has
    /// asymmetric values but a symmetric pattern.
    pub fn asymmetric_entry(&self) -> Option<(usize, usize)> {
        let pattern: BTreeSet<(u32, u32)> =
            self.rows.iter().copied().zip(self.cols.iter().copied()).collect();
        pattern
            .iter()
            .find(|&&(r, c)| !pattern.contains(&(c, r)))
            .map(|&(r, c)| (r as usize, c as usize))
    }

    /// First node with no stored diagonal entry.
    pub fn missing_self_loop(&self) -> Option<usize> {
        let mut looped = vec![false; self.num_nodes];
        for (&r, &c) in self.rows.iter().zip(&self.cols) {
            if r == c {
                looped[r as usize] = true;
            }
        }
        looped.iter().position(|&l| !l)
    }

    /// Sparse-dense product `A · dense`.
    ///
    /// `dense` must have `num_nodes` rows; the result has the same shape.
    pub fn matmul(&self, dense: &Tensor) -> Result<Tensor> {
        let (n, f) = dense.dims2()?;
        if n != self.num_nodes {
            return Err(Error::DimensionMismatch {
                context: "sparse matmul rows",
                expected: self.num_nodes,
                got: n,
            });
        }

        let out = Tensor::zeros((n, f), dense.dtype(), dense.device())?;
        if self.nnz() == 0 {
            return Ok(out);
        }

        let weights = self.weights.to_dtype(dense.dtype())?;
        let messages = dense.index_select(&self.col_ids, 0)?.broadcast_mul(&weights)?;
        Ok(out.index_add(&self.row_ids, &messages, 0)?)
    }

    /// Dense N×N copy, row-major.
    pub fn to_dense(&self) -> Result<Tensor> {
        let n = self.num_nodes;
        let mut data = vec![0.0f32; n * n];
        for (r, c, v) in self.triplets() {
            data[r * n + c] = v;
        }
        Ok(Tensor::from_vec(data, (n, n), self.device())?)
    }

    /// Relabel nodes: node `i` becomes node `perm[i]`.
    pub fn permuted(&self, perm: &[usize]) -> Result<Self> {
        check_permutation(perm, self.num_nodes)?;
        let entries = self
            .triplets()
            .map(|(r, c, v)| ((perm[r] as u32, perm[c] as u32), v))
            .collect();
        Self::from_map(self.num_nodes, entries, self.device())
    }
}

fn safe_recip(x: f32) -> f32 {
    if x == 0.0 {
        0.0
    } else {
        x.recip()
    }
}

fn check_node(index: usize, num_nodes: usize) -> Result<u32> {
    if index >= num_nodes {
        return Err(Error::IndexOutOfRange { index, num_nodes });
    }
    Ok(index as u32)
}

/// Ensure `perm` is a bijection on `[0, num_nodes)`.
pub(crate) fn check_permutation(perm: &[usize], num_nodes: usize) -> Result<()> {
    if perm.len() != num_nodes {
        return Err(Error::DimensionMismatch {
            context: "node permutation",
            expected: num_nodes,
            got: perm.len(),
        });
    }
    let mut seen = vec![false; num_nodes];
    for &p in perm {
        check_node(p, num_nodes)?;
        if std::mem::replace(&mut seen[p], true) {
            return Err(Error::InvalidConfig(format!(
                "node {p} appears twice in permutation"
            )));
        }
    }
    Ok(())
}

/// Named, ordered subset of node indices (train / validation / test).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSet {
    name: String,
    indices: Vec<u32>,
}

impl IndexSet {
    /// Validate every index against `num_nodes`. Order is preserved.
    pub fn new(name: impl Into<String>, indices: &[usize], num_nodes: usize) -> Result<Self> {
        let indices = indices
            .iter()
            .map(|&i| check_node(i, num_nodes))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.into(),
            indices,
        })
    }

    /// Contiguous range, clamped to `num_nodes`.
    pub fn range(name: impl Into<String>, range: Range<usize>, num_nodes: usize) -> Self {
        let end = range.end.min(num_nodes);
        let start = range.start.min(end);
        Self {
            name: name.into(),
            indices: (start as u32..end as u32).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().map(|&i| i as usize)
    }

    /// Fail with [`Error::EmptyIndexSet`] if there is nothing to evaluate.
    pub fn require_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::EmptyIndexSet {
                partition: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Re-check bounds against a (possibly different) node count.
    pub fn check_bounds(&self, num_nodes: usize) -> Result<()> {
        for i in self.iter() {
            check_node(i, num_nodes)?;
        }
        Ok(())
    }

    /// Indices as a `u32` tensor, suitable for `index_select`.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.indices, self.indices.len(), device)?)
    }

    /// Same partition after relabeling node `i` to `perm[i]`.
    pub fn permuted(&self, perm: &[usize]) -> Result<Self> {
        check_permutation(perm, perm.len())?;
        let indices = self
            .iter()
            .map(|i| {
                perm.get(i).map(|&p| p as u32).ok_or(Error::IndexOutOfRange {
                    index: i,
                    num_nodes: perm.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: self.name.clone(),
            indices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_rows(t: &Tensor) -> Vec<Vec<f32>> {
        t.to_vec2::<f32>().unwrap()
    }

    #[test]
    fn from_edges_is_symmetric_and_deduplicated() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_edges(3, &[(0, 1), (1, 0), (1, 2)], &dev).unwrap();
        assert_eq!(adj.nnz(), 4);
        let d = dense_rows(&adj.to_dense().unwrap());
        for (r, row) in d.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                assert_eq!(*v, d[c][r]);
            }
        }
    }

    #[test]
    fn triplets_coalesce_duplicates() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_triplets(2, &[0, 0, 1], &[1, 1, 0], &[0.5, 0.25, 1.0], &dev)
            .unwrap();
        assert_eq!(adj.nnz(), 2);
        let entries: Vec<_> = adj.triplets().collect();
        assert_eq!(entries, vec![(0, 1, 0.75), (1, 0, 1.0)]);
    }

    #[test]
    fn out_of_range_edge_is_rejected() {
        let dev = Device::Cpu;
        let err = SparseAdjacency::from_edges(2, &[(0, 2)], &dev).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 2, num_nodes: 2 }));
    }

    #[test]
    fn pattern_symmetry_ignores_normalized_values() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_edges(3, &[(0, 1), (0, 2)], &dev)
            .unwrap()
            .with_self_loops()
            .unwrap()
            .row_normalized()
            .unwrap();
        assert_eq!(adj.asymmetric_entry(), None);
        assert_eq!(adj.missing_self_loop(), None);

        let directed = SparseAdjacency::from_triplets(4, &[0], &[1], &[1.0], &dev).unwrap();
        assert_eq!(directed.asymmetric_entry(), Some((0, 1)));
        assert_eq!(directed.missing_self_loop(), Some(0));
    }

    #[test]
    fn self_loops_are_idempotent() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_edges(3, &[(0, 1)], &dev).unwrap();
        let once = adj.with_self_loops().unwrap();
        let twice = once.with_self_loops().unwrap();
        assert_eq!(once.nnz(), 5);
        assert_eq!(dense_rows(&once.to_dense().unwrap()), dense_rows(&twice.to_dense().unwrap()));
    }

    #[test]
    fn row_normalized_rows_sum_to_one() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_edges(4, &[(0, 1), (0, 2), (2, 3)], &dev)
            .unwrap()
            .with_self_loops()
            .unwrap()
            .row_normalized()
            .unwrap();
        for row in dense_rows(&adj.to_dense().unwrap()) {
            let s: f32 = row.iter().sum();
            assert!((s - 1.0).abs() < 1e-6, "row sum {s}");
        }
    }

    #[test]
    fn symmetric_normalized_stays_symmetric() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_edges(4, &[(0, 1), (0, 2), (2, 3)], &dev)
            .unwrap()
            .with_self_loops()
            .unwrap()
            .symmetric_normalized()
            .unwrap();
        let d = dense_rows(&adj.to_dense().unwrap());
        for r in 0..4 {
            for c in 0..4 {
                assert!((d[r][c] - d[c][r]).abs() < 1e-6);
            }
        }
        // deg(0) = 3, deg(1) = 2
        assert!((d[0][1] - 1.0 / (6.0f32).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn isolated_node_row_stays_zero() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_edges(3, &[(0, 1)], &dev)
            .unwrap()
            .row_normalized()
            .unwrap();
        let d = dense_rows(&adj.to_dense().unwrap());
        assert_eq!(d[2], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn sparse_matmul_matches_dense() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_triplets(
            3,
            &[0, 0, 1, 2, 2],
            &[0, 2, 1, 0, 1],
            &[0.5, 0.5, 1.0, 0.25, 0.75],
            &dev,
        )
        .unwrap();
        let x = Tensor::new(&[[1f32, 2.0], [3.0, 4.0], [5.0, 6.0]], &dev).unwrap();
        let sparse = dense_rows(&adj.matmul(&x).unwrap());
        let dense = dense_rows(&adj.to_dense().unwrap().matmul(&x).unwrap());
        for (a, b) in sparse.iter().flatten().zip(dense.iter().flatten()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn sparse_matmul_backprops_transpose() {
        use candle_core::Var;

        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_triplets(2, &[0, 1, 1], &[1, 0, 1], &[2.0, 3.0, 4.0], &dev)
            .unwrap();
        let x = Var::from_tensor(&Tensor::ones((2, 1), candle_core::DType::F32, &dev).unwrap())
            .unwrap();
        let y = adj.matmul(x.as_tensor()).unwrap().sum_all().unwrap();
        let grads = y.backward().unwrap();
        let g = grads.get(x.as_tensor()).unwrap().to_vec2::<f32>().unwrap();
        // column sums of A
        assert_eq!(g, vec![vec![3.0], vec![6.0]]);
    }

    #[test]
    fn matmul_rejects_wrong_row_count() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::identity(3, &dev).unwrap();
        let x = Tensor::zeros((4, 2), candle_core::DType::F32, &dev).unwrap();
        let err = adj.matmul(&x).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, got: 4, .. }));
    }

    #[test]
    fn empty_adjacency_yields_zeros() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::from_edges(2, &[], &dev).unwrap();
        let x = Tensor::ones((2, 3), candle_core::DType::F32, &dev).unwrap();
        let y = adj.matmul(&x).unwrap();
        assert_eq!(y.sum_all().unwrap().to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn index_set_validation() {
        assert!(IndexSet::new("train", &[0, 1, 2], 3).is_ok());
        let err = IndexSet::new("test", &[0, 3], 3).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 3, .. }));

        let r = IndexSet::range("val", 2..10, 5);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(IndexSet::range("test", 7..9, 5).is_empty());

        let empty = IndexSet::new("val", &[], 3).unwrap();
        assert!(matches!(empty.require_non_empty(), Err(Error::EmptyIndexSet { .. })));
    }

    #[test]
    fn permutation_must_be_bijective() {
        let dev = Device::Cpu;
        let adj = SparseAdjacency::identity(3, &dev).unwrap();
        assert!(adj.permuted(&[0, 0, 1]).is_err());
        assert!(adj.permuted(&[0, 1]).is_err());
        let p = SparseAdjacency::from_edges(3, &[(0, 1)], &dev)
            .unwrap()
            .permuted(&[2, 0, 1])
            .unwrap();
        let entries: Vec<_> = p.triplets().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(entries, vec![(0, 2), (2, 0)]);
    }
}
