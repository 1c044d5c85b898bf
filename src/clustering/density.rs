//! HDBSCAN clustering over L2-normalized embeddings.
//!
//! The hierarchy is built from mutual reachability distances: a minimum
//! spanning tree (Prim), a single-linkage tree (union-find), then a condensed
//! tree in which splits smaller than `min_cluster_size` are points falling out
//! of their parent. Clusters are selected from the condensed tree by leaf or
//! by excess of mass. Articles in no selected cluster are noise.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::{ClusterSelection, ClusteringConfig, ClusteringStrategy};
use crate::error::{ClusterError, Result};
use crate::model::Article;

use super::{into_clusters, normalized_matrix, partition_valid, ArticleClusterer, ClusteringOutcome};

/// Distances below this are treated as this when converting to lambda.
const MIN_DISTANCE: f64 = 1e-12;

/// Parameters for HDBSCAN clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdbscanParams {
    /// Minimum number of points to form a cluster.
    pub min_cluster_size: usize,
    /// Neighbours (self included) defining a point's core distance.
    pub min_samples: usize,
    /// Method for selecting clusters from the condensed tree.
    pub selection: ClusterSelection,
    /// Allow the root of the condensed tree to be selected.
    pub allow_single_cluster: bool,
}

impl Default for HdbscanParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            min_samples: 1,
            selection: ClusterSelection::Leaf,
            allow_single_cluster: false,
        }
    }
}

impl HdbscanParams {
    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self {
            min_cluster_size: config.min_cluster_size,
            min_samples: config.min_samples,
            selection: config.selection,
            allow_single_cluster: config.allow_single_cluster,
        }
    }

    /// Set cluster selection method.
    #[must_use]
    pub fn with_selection(mut self, selection: ClusterSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Allow or forbid a single all-encompassing cluster.
    #[must_use]
    pub fn with_allow_single_cluster(mut self, allow: bool) -> Self {
        self.allow_single_cluster = allow;
        self
    }

    /// Set minimum cluster size.
    #[must_use]
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    /// Validate parameters.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidParameter` if:
    /// - min_cluster_size < 2
    /// - min_samples < 1
    pub fn validate(&self) -> std::result::Result<(), ClusterError> {
        if self.min_cluster_size < 2 {
            return Err(ClusterError::InvalidParameter(format!(
                "min_cluster_size must be >= 2, got {}",
                self.min_cluster_size
            )));
        }
        if self.min_samples < 1 {
            return Err(ClusterError::InvalidParameter(
                "min_samples must be >= 1, got 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Density-based clusterer. Noise articles are reported, never turned into
/// singleton clusters.
#[derive(Debug, Clone)]
pub struct DensityClusterer {
    params: HdbscanParams,
}

impl DensityClusterer {
    pub fn new(params: HdbscanParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &HdbscanParams {
        &self.params
    }
}

impl ArticleClusterer for DensityClusterer {
    fn cluster(&self, articles: &[Article]) -> Result<ClusteringOutcome> {
        let valid = partition_valid(articles)?;
        let n = valid.ids.len();

        let labels = if n < self.params.min_cluster_size {
            vec![None; n]
        } else {
            let distances = pairwise_distances(&normalized_matrix(&valid.vectors));
            hdbscan_labels(&distances, &self.params)
        };

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut noise = Vec::new();
        let mut slot_of_label = std::collections::HashMap::new();
        for (point, label) in labels.iter().enumerate() {
            match label {
                Some(label) => {
                    let slot = *slot_of_label.entry(*label).or_insert_with(|| {
                        groups.push(Vec::new());
                        groups.len() - 1
                    });
                    groups[slot].push(point);
                }
                None => noise.push(valid.ids[point]),
            }
        }

        let clusters = into_clusters(groups, &valid.ids);
        tracing::debug!(
            items = n,
            clusters = clusters.len(),
            noise = noise.len(),
            "HDBSCAN clustering finished"
        );

        Ok(ClusteringOutcome {
            strategy: ClusteringStrategy::Density,
            clusters,
            noise,
            filtered: valid.filtered,
        })
    }

    fn strategy(&self) -> ClusteringStrategy {
        ClusteringStrategy::Density
    }

    fn name(&self) -> &str {
        "hdbscan"
    }
}

/// Euclidean distances between the rows of `x`.
fn pairwise_distances(x: &Array2<f64>) -> Array2<f64> {
    let gram = x.dot(&x.t());
    let n = gram.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            0.0
        } else {
            (gram[[i, i]] + gram[[j, j]] - 2.0 * gram[[i, j]]).max(0.0).sqrt()
        }
    })
}

/// Distance to the `min_samples`-th nearest point, the point itself included.
fn core_distances(distances: &Array2<f64>, min_samples: usize) -> Vec<f64> {
    let n = distances.nrows();
    let k = min_samples.clamp(1, n.max(1)) - 1;
    distances
        .rows()
        .into_iter()
        .map(|row| {
            let mut sorted: Vec<f64> = row.to_vec();
            sorted.sort_by(f64::total_cmp);
            sorted.get(k).copied().unwrap_or(0.0)
        })
        .collect()
}

/// Minimum spanning tree of the mutual reachability graph, edges sorted by weight.
fn mutual_reachability_mst(distances: &Array2<f64>, core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = distances.nrows();
    let reach = |i: usize, j: usize| distances[[i, j]].max(core[i]).max(core[j]);

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut best_from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        let mut next = None;
        let mut next_weight = f64::INFINITY;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let w = reach(current, j);
            if w < best[j] {
                best[j] = w;
                best_from[j] = current;
            }
            if best[j] < next_weight || next.is_none() {
                next_weight = best[j];
                next = Some(j);
            }
        }
        let Some(next) = next else { break };
        in_tree[next] = true;
        edges.push((best_from[next], next, next_weight));
        current = next;
    }

    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }
}

/// Internal node `n + k` of the single-linkage tree.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Single-linkage tree over `n` points from sorted MST edges. Node `i < n`
/// is a point; node `n + k` is `merges[k]`.
fn single_linkage(n: usize, edges: &[(usize, usize, f64)]) -> Vec<Merge> {
    let mut uf = UnionFind::new(2 * n);
    let mut merges: Vec<Merge> = Vec::with_capacity(edges.len());
    let size_of = |merges: &[Merge], node: usize| {
        if node < n {
            1
        } else {
            merges[node - n].size
        }
    };

    for &(a, b, distance) in edges {
        let left = uf.find(a);
        let right = uf.find(b);
        let node = n + merges.len();
        let size = size_of(&merges, left) + size_of(&merges, right);
        merges.push(Merge {
            left,
            right,
            distance,
            size,
        });
        uf.parent[left] = node;
        uf.parent[right] = node;
    }
    merges
}

#[derive(Debug, Clone)]
struct CondensedCluster {
    parent: Option<usize>,
    birth: f64,
    children: Vec<usize>,
    stability: f64,
}

/// Condensed tree: clusters indexed by label (root is 0, children always
/// carry larger labels than their parent) and the cluster each point fell
/// out of.
struct CondensedTree {
    clusters: Vec<CondensedCluster>,
    point_cluster: Vec<usize>,
}

fn lambda(distance: f64) -> f64 {
    1.0 / distance.max(MIN_DISTANCE)
}

fn condense(n: usize, merges: &[Merge], min_cluster_size: usize) -> CondensedTree {
    let size_of = |node: usize| if node < n { 1 } else { merges[node - n].size };

    let mut tree = CondensedTree {
        clusters: vec![CondensedCluster {
            parent: None,
            birth: 0.0,
            children: Vec::new(),
            stability: 0.0,
        }],
        point_cluster: vec![0; n],
    };

    let Some(root) = (n + merges.len()).checked_sub(1).filter(|&r| r >= n) else {
        return tree;
    };

    let mut stack = vec![(root, 0usize)];
    while let Some((node, label)) = stack.pop() {
        let merge = merges[node - n];
        let split_lambda = lambda(merge.distance);
        let birth = tree.clusters[label].birth;

        let left_big = size_of(merge.left) >= min_cluster_size;
        let right_big = size_of(merge.right) >= min_cluster_size;

        if left_big && right_big {
            for child in [merge.left, merge.right] {
                let child_label = tree.clusters.len();
                tree.clusters.push(CondensedCluster {
                    parent: Some(label),
                    birth: split_lambda,
                    children: Vec::new(),
                    stability: 0.0,
                });
                tree.clusters[label].children.push(child_label);
                tree.clusters[label].stability += (split_lambda - birth) * size_of(child) as f64;
                stack.push((child, child_label));
            }
            continue;
        }

        for (child, big) in [(merge.left, left_big), (merge.right, right_big)] {
            if big {
                stack.push((child, label));
            } else {
                for point in subtree_points(n, merges, child) {
                    tree.point_cluster[point] = label;
                    tree.clusters[label].stability += split_lambda - birth;
                }
            }
        }
    }
    tree
}

fn subtree_points(n: usize, merges: &[Merge], node: usize) -> Vec<usize> {
    let mut points = Vec::new();
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if node < n {
            points.push(node);
        } else {
            let merge = merges[node - n];
            stack.push(merge.left);
            stack.push(merge.right);
        }
    }
    points
}

/// Selected flag per condensed cluster label.
fn select_clusters(tree: &CondensedTree, params: &HdbscanParams) -> Vec<bool> {
    let count = tree.clusters.len();
    let mut selected = vec![false; count];
    let first = if params.allow_single_cluster { 0 } else { 1 };

    match params.selection {
        ClusterSelection::Leaf => {
            for label in first..count {
                selected[label] = tree.clusters[label].children.is_empty();
            }
        }
        ClusterSelection::Eom => {
            let mut subtree_stability = vec![0.0; count];
            for label in (first..count).rev() {
                let cluster = &tree.clusters[label];
                let children_stability: f64 =
                    cluster.children.iter().map(|&c| subtree_stability[c]).sum();

                if cluster.children.is_empty() || cluster.stability >= children_stability {
                    selected[label] = true;
                    subtree_stability[label] = cluster.stability;
                    deselect_descendants(tree, label, &mut selected);
                } else {
                    subtree_stability[label] = children_stability;
                }
            }
        }
    }
    selected
}

fn deselect_descendants(tree: &CondensedTree, label: usize, selected: &mut [bool]) {
    let mut stack = tree.clusters[label].children.clone();
    while let Some(child) = stack.pop() {
        selected[child] = false;
        stack.extend_from_slice(&tree.clusters[child].children);
    }
}

/// Cluster label per point, `None` for noise.
fn hdbscan_labels(distances: &Array2<f64>, params: &HdbscanParams) -> Vec<Option<usize>> {
    let n = distances.nrows();
    let core = core_distances(distances, params.min_samples);
    let edges = mutual_reachability_mst(distances, &core);
    let merges = single_linkage(n, &edges);
    let tree = condense(n, &merges, params.min_cluster_size);
    let selected = select_clusters(&tree, params);

    tree.point_cluster
        .iter()
        .map(|&start| {
            let mut label = Some(start);
            while let Some(current) = label {
                if selected[current] {
                    return Some(current);
                }
                label = tree.clusters[current].parent;
            }
            None
        })
        .collect()
}
