//! Node-classification datasets: the CORA citation format and toy graphs.
//!
//! CORA ships as two tab-separated files without headers:
//!
//! ```text
//! cora.content   <paper_id> <w_0> ... <w_{F-1}> <class_label>
//! cora.cites     <cited_paper_id> <citing_paper_id>
//! ```
//!
//! Loading follows the usual GCN preprocessing: features are row-normalized,
//! citations become an undirected graph with self-loops, and the adjacency is
//! row-normalized. Node order is file order; class ids follow sorted label
//! names so they do not depend on hash ordering.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use csv::StringRecord;

use crate::error::{Error, Result};
use crate::graph::{check_permutation, IndexSet, SparseAdjacency};

/// Train / validation / test partitions.
#[derive(Debug, Clone)]
pub struct Splits {
    pub train: IndexSet,
    pub val: IndexSet,
    pub test: IndexSet,
}

impl Splits {
    /// The reference CORA split: 140 train, 300 validation, 1000 test nodes.
    #[must_use]
    pub fn planetoid(num_nodes: usize) -> Self {
        Self {
            train: IndexSet::range("train", 0..140, num_nodes),
            val: IndexSet::range("val", 200..500, num_nodes),
            test: IndexSet::range("test", 500..1500, num_nodes),
        }
    }

    /// Every node in train; validation and test empty. For toy graphs.
    #[must_use]
    pub fn all(num_nodes: usize) -> Self {
        Self {
            train: IndexSet::range("train", 0..num_nodes, num_nodes),
            val: IndexSet::range("val", 0..0, num_nodes),
            test: IndexSet::range("test", 0..0, num_nodes),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &IndexSet> {
        [&self.train, &self.val, &self.test].into_iter()
    }

    /// Bounds-check every partition and reject a node placed in two.
    pub fn validate(&self, num_nodes: usize) -> Result<()> {
        let mut owner: Vec<Option<&str>> = vec![None; num_nodes];
        for split in self.iter() {
            split.check_bounds(num_nodes)?;
            for i in split.iter() {
                if let Some(first) = owner[i].replace(split.name()) {
                    return Err(Error::OverlappingSplits {
                        index: i,
                        first: first.to_owned(),
                        second: split.name().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Everything a full-batch node classifier consumes.
#[derive(Debug, Clone)]
pub struct GraphDataset {
    /// `(N, F)` f32 features.
    pub features: Tensor,
    pub adjacency: SparseAdjacency,
    /// `(N,)` u32 class ids.
    pub labels: Tensor,
    pub class_names: Vec<String>,
    pub splits: Splits,
}

impl GraphDataset {
    /// Assemble and validate.
    pub fn new(
        features: Tensor,
        adjacency: SparseAdjacency,
        labels: Tensor,
        class_names: Vec<String>,
        splits: Splits,
    ) -> Result<Self> {
        let ds = Self {
            features,
            adjacency,
            labels,
            class_names,
            splits,
        };
        ds.validate()?;
        Ok(ds)
    }

    /// Cross-check shapes, label range, adjacency structure and splits.
    ///
    /// The adjacency must have a symmetric sparsity pattern and a stored
    /// self-loop on every node; splits must be in bounds and disjoint.
    pub fn validate(&self) -> Result<()> {
        let (n, _) = self.features.dims2()?;
        if self.adjacency.num_nodes() != n {
            return Err(Error::DimensionMismatch {
                context: "adjacency size vs feature rows",
                expected: n,
                got: self.adjacency.num_nodes(),
            });
        }
        let label_len = self.labels.dims1()?;
        if label_len != n {
            return Err(Error::DimensionMismatch {
                context: "label count vs feature rows",
                expected: n,
                got: label_len,
            });
        }
        let classes = self.num_classes();
        if let Some(&bad) = self
            .labels
            .to_vec1::<u32>()?
            .iter()
            .find(|&&l| l as usize >= classes)
        {
            return Err(Error::IndexOutOfRange {
                index: bad as usize,
                num_nodes: classes,
            });
        }
        if let Some((row, col)) = self.adjacency.asymmetric_entry() {
            return Err(Error::AsymmetricAdjacency { row, col });
        }
        if let Some(node) = self.adjacency.missing_self_loop() {
            return Err(Error::MissingSelfLoop(node));
        }
        self.splits.validate(n)
    }

    pub fn num_nodes(&self) -> usize {
        self.adjacency.num_nodes()
    }

    pub fn num_features(&self) -> usize {
        self.features.dims().last().copied().unwrap_or(0)
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Consistently relabel nodes: node `i` becomes node `perm[i]` in the
    /// features, adjacency, labels and every split.
    pub fn permuted(&self, perm: &[usize]) -> Result<Self> {
        let n = self.num_nodes();
        check_permutation(perm, n)?;
        let mut inverse = vec![0u32; n];
        for (i, &p) in perm.iter().enumerate() {
            inverse[p] = i as u32;
        }
        let inverse = Tensor::from_vec(inverse, n, self.features.device())?;

        Self::new(
            self.features.index_select(&inverse, 0)?,
            self.adjacency.permuted(perm)?,
            self.labels.index_select(&inverse, 0)?,
            self.class_names.clone(),
            Splits {
                train: self.splits.train.permuted(perm)?,
                val: self.splits.val.permuted(perm)?,
                test: self.splits.test.permuted(perm)?,
            },
        )
    }
}

/// Load `cora.content` and `cora.cites` from `dir`.
pub fn load_cora(dir: impl AsRef<Path>, device: &Device) -> Result<GraphDataset> {
    let dir = dir.as_ref();
    let content_path = dir.join("cora.content");
    let cites_path = dir.join("cora.cites");
    let content = fs::read_to_string(&content_path)?;
    let cites = fs::read_to_string(&cites_path)?;
    let ds = parse_cora_files(&content, &content_path, &cites, &cites_path, device)?;
    tracing::info!(
        nodes = ds.num_nodes(),
        features = ds.num_features(),
        classes = ds.num_classes(),
        edges = ds.adjacency.nnz(),
        dir = %dir.display(),
        "loaded cora dataset"
    );
    Ok(ds)
}

/// Parse CORA-format text already in memory.
pub fn parse_cora(content: &str, cites: &str, device: &Device) -> Result<GraphDataset> {
    parse_cora_files(
        content,
        Path::new("cora.content"),
        cites,
        Path::new("cora.cites"),
        device,
    )
}

struct ContentRow {
    line: usize,
    id: String,
    features: Vec<f32>,
    label: String,
}

fn parse_error(path: &Path, line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        path: PathBuf::from(path),
        line,
        message: message.into(),
    }
}

/// Headerless TSV reader. Every record must have the same field count.
fn tsv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(false)
        .quoting(false)
        .from_reader(text.as_bytes())
}

fn record_line(record: &StringRecord) -> usize {
    record.position().map_or(0, |p| p.line() as usize)
}

fn csv_error(path: &Path, err: csv::Error) -> Error {
    let line = err.position().map_or(0, |p| p.line() as usize);
    parse_error(path, line, err.to_string())
}

fn parse_content_row(path: &Path, record: &StringRecord) -> Result<ContentRow> {
    let line = record_line(record);
    if record.len() < 3 {
        return Err(parse_error(path, line, "expected `<id> <features..> <label>`"));
    }
    let last = record.len() - 1;
    let features = (1..last)
        .map(|i| {
            let t = &record[i];
            t.trim()
                .parse::<f32>()
                .map_err(|e| parse_error(path, line, format!("bad feature `{t}`: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ContentRow {
        line,
        id: record[0].trim().to_owned(),
        features,
        label: record[last].trim().to_owned(),
    })
}

fn parse_cora_files(
    content: &str,
    content_path: &Path,
    cites: &str,
    cites_path: &Path,
    device: &Device,
) -> Result<GraphDataset> {
    let rows = tsv_reader(content)
        .records()
        .map(|r| {
            let record = r.map_err(|e| csv_error(content_path, e))?;
            parse_content_row(content_path, &record)
        })
        .collect::<Result<Vec<_>>>()?;
    let width = rows
        .first()
        .map(|r| r.features.len())
        .ok_or_else(|| parse_error(content_path, 0, "no nodes"))?;
    let n = rows.len();

    let mut ids: HashMap<&str, usize> = HashMap::with_capacity(n);
    for (i, row) in rows.iter().enumerate() {
        if ids.insert(row.id.as_str(), i).is_some() {
            return Err(parse_error(
                content_path,
                row.line,
                format!("duplicate node id `{}`", row.id),
            ));
        }
    }

    let class_names: Vec<String> = rows
        .iter()
        .map(|r| r.label.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let class_of: HashMap<&str, u32> = class_names
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i as u32))
        .collect();
    let labels: Vec<u32> = rows.iter().map(|r| class_of[r.label.as_str()]).collect();

    let mut features = Vec::with_capacity(n * width);
    for row in &rows {
        let sum: f32 = row.features.iter().sum();
        let inv = if sum == 0.0 { 0.0 } else { sum.recip() };
        features.extend(row.features.iter().map(|v| v * inv));
    }

    let mut edges = Vec::new();
    for record in tsv_reader(cites).records() {
        let record = record.map_err(|e| csv_error(cites_path, e))?;
        if record.len() != 2 {
            return Err(parse_error(
                cites_path,
                record_line(&record),
                "expected `<cited> <citing>`",
            ));
        }
        let node = |field: &str| {
            let field = field.trim();
            ids.get(field)
                .copied()
                .ok_or_else(|| Error::UnknownNode(field.to_owned()))
        };
        edges.push((node(&record[0])?, node(&record[1])?));
    }

    let adjacency = SparseAdjacency::from_edges(n, &edges, device)?
        .with_self_loops()?
        .row_normalized()?;

    GraphDataset::new(
        Tensor::from_vec(features, (n, width), device)?,
        adjacency,
        Tensor::from_vec(labels, n, device)?,
        class_names,
        Splits::planetoid(n),
    )
}

/// Four nodes in two disconnected, fully connected pairs. Features are
/// one-hot in the class, so a GCN can reach 100% accuracy.
pub fn two_pairs(device: &Device) -> Result<GraphDataset> {
    let features = Tensor::new(&[[1f32, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]], device)?;
    let adjacency = SparseAdjacency::from_edges(4, &[(0, 1), (2, 3)], device)?
        .with_self_loops()?
        .row_normalized()?;
    let labels = Tensor::new(&[0u32, 0, 1, 1], device)?;
    GraphDataset::new(
        features,
        adjacency,
        labels,
        vec!["a".into(), "b".into()],
        Splits::all(4),
    )
}

/// `num_nodes` nodes split into two classes (first half / second half), each
/// class a path graph, with separable two-dimensional features.
pub fn separable(num_nodes: usize, device: &Device) -> Result<GraphDataset> {
    if num_nodes < 2 {
        return Err(Error::InvalidConfig(format!(
            "separable graph needs at least 2 nodes, got {num_nodes}"
        )));
    }
    let half = num_nodes / 2;
    let class = |i: usize| u32::from(i >= half);

    let mut features = Vec::with_capacity(num_nodes * 2);
    for i in 0..num_nodes {
        // Varying magnitude keeps rows distinct while staying separable.
        let scale = 1.0 + (i % 3) as f32 * 0.25;
        if class(i) == 0 {
            features.extend([scale, 0.1]);
        } else {
            features.extend([0.1, scale]);
        }
    }
    let edges: Vec<(usize, usize)> = (1..num_nodes)
        .filter(|&i| class(i) == class(i - 1))
        .map(|i| (i - 1, i))
        .collect();
    let adjacency = SparseAdjacency::from_edges(num_nodes, &edges, device)?
        .with_self_loops()?
        .row_normalized()?;
    let labels: Vec<u32> = (0..num_nodes).map(class).collect();

    GraphDataset::new(
        Tensor::from_vec(features, (num_nodes, 2), device)?,
        adjacency,
        Tensor::from_vec(labels, num_nodes, device)?,
        vec!["left".into(), "right".into()],
        Splits::all(num_nodes),
    )
}
