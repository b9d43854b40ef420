// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hierarchical clustering of attack payloads by local-alignment score.
//!
//! Payloads are interned under a content-addressed key, a symmetric
//! pairwise alignment matrix is computed, and clusters are merged
//! greedily by highest inter-member score. A relative score jump
//! between a node and its parent then cuts the tree into the final
//! disjoint clusters.

use crate::extract::align::{local_alignment, Alignment, ScoringTable};
use crate::hash::payload_key;
use std::collections::{BTreeMap, BTreeSet};

/// Content-addressed payload identifier (hex of a 128-bit digest)
pub type PayloadKey = String;

fn key_of(payload: &[u8]) -> PayloadKey {
    format!("{:032x}", payload_key(payload))
}

/// Symmetric pairwise alignment matrix, keyed `lesser -> greater`
pub struct DistanceMatrix {
    payloads: BTreeMap<PayloadKey, Vec<u8>>,
    matrix: BTreeMap<PayloadKey, BTreeMap<PayloadKey, Alignment>>,
}

impl DistanceMatrix {
    /// Interns the payloads and aligns every distinct pair.
    #[must_use]
    pub fn build(payloads: &[Vec<u8>], scoring: &ScoringTable) -> Self {
        let mut interned: BTreeMap<PayloadKey, Vec<u8>> = BTreeMap::new();
        for payload in payloads {
            let key = key_of(payload);

            if let Some(existing) = interned.get(&key) {
                // Duplicate payloads intern to one leaf
                debug_assert_eq!(existing, payload, "payload key collision");
                continue;
            }
            interned.insert(key, payload.clone());
        }

        let mut matrix: BTreeMap<PayloadKey, BTreeMap<PayloadKey, Alignment>> = BTreeMap::new();

        let keys: Vec<&PayloadKey> = interned.keys().collect();
        for (i, key_a) in keys.iter().enumerate() {
            for key_b in keys.iter().skip(i + 1) {
                log::trace!("aligning {key_a} x {key_b}");

                let result = local_alignment(&interned[*key_a], &interned[*key_b], scoring);
                matrix
                    .entry((*key_a).clone())
                    .or_default()
                    .insert((*key_b).clone(), result);
            }
        }

        Self {
            payloads: interned,
            matrix,
        }
    }

    /// Distinct payload keys, in key order.
    #[must_use]
    pub fn keys(&self) -> Vec<PayloadKey> {
        self.payloads.keys().cloned().collect()
    }

    /// Alignment of a pair, independent of argument order.
    #[must_use]
    pub fn alignment(&self, a: &str, b: &str) -> Option<&Alignment> {
        let (lesser, greater) = if a < b { (a, b) } else { (b, a) };
        self.matrix.get(lesser)?.get(greater)
    }

    /// Maximum alignment score between any member of `left` and any
    /// member of `right`.
    #[must_use]
    pub fn max_inter_score(&self, left: &BTreeSet<PayloadKey>, right: &BTreeSet<PayloadKey>) -> i64 {
        let mut max_score = i64::MIN;

        for a in left {
            for b in right {
                if a == b {
                    continue;
                }
                if let Some(alignment) = self.alignment(a, b) {
                    max_score = max_score.max(alignment.score);
                }
            }
        }

        max_score
    }

    /// Both aligned substrings of every pair within `members`.
    #[must_use]
    pub fn gather_subsequences(&self, members: &BTreeSet<PayloadKey>) -> Vec<Vec<u8>> {
        let keys: Vec<&PayloadKey> = members.iter().collect();
        let mut subsequences = Vec::new();

        for (i, key_a) in keys.iter().enumerate() {
            for key_b in keys.iter().skip(i + 1) {
                if let Some(alignment) = self.alignment(key_a, key_b) {
                    subsequences.push(alignment.substring_x.clone());
                    subsequences.push(alignment.substring_y.clone());
                }
            }
        }

        subsequences
    }
}

/// One node of the merge tree
#[derive(Debug)]
struct TreeNode {
    /// Inter-cluster score recorded when this node was merged; -1 at
    /// the leaves
    max_score: i64,

    members: BTreeSet<PayloadKey>,

    children: Vec<usize>,

    parent: Option<usize>,
}

/// Agglomerative merge tree over the interned payloads
pub struct Dendrogram {
    nodes: Vec<TreeNode>,
    root: usize,
}

impl Dendrogram {
    /// Builds the tree by greedy highest-score merging.
    ///
    /// Starts from singleton clusters; each step merges the two
    /// clusters whose best inter-member alignment is maximal, recording
    /// that score at the new node, until a single root remains.
    #[must_use]
    pub fn build(matrix: &DistanceMatrix) -> Self {
        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut roots: Vec<usize> = Vec::new();

        for key in matrix.keys() {
            let mut members = BTreeSet::new();
            members.insert(key);
            nodes.push(TreeNode {
                max_score: -1,
                members,
                children: Vec::new(),
                parent: None,
            });
            roots.push(nodes.len() - 1);
        }

        while roots.len() > 1 {
            let mut best_score = i64::MIN;
            let mut merge_pair = (0usize, 1usize);

            for i in 0..roots.len() {
                for j in 0..i {
                    let score =
                        matrix.max_inter_score(&nodes[roots[i]].members, &nodes[roots[j]].members);
                    if score > best_score {
                        best_score = score;
                        merge_pair = (i, j);
                    }
                }
            }

            let (i, j) = merge_pair;
            let (left, right) = (roots[i], roots[j]);

            let mut members = nodes[left].members.clone();
            members.extend(nodes[right].members.iter().cloned());

            nodes.push(TreeNode {
                max_score: best_score,
                members,
                children: vec![left, right],
                parent: None,
            });
            let merged = nodes.len() - 1;
            nodes[left].parent = Some(merged);
            nodes[right].parent = Some(merged);

            // Replace the earlier root in place, drop the later one
            let (keep, drop) = if i < j { (i, j) } else { (j, i) };
            roots[keep] = merged;
            roots.remove(drop);
        }

        let root = roots.first().copied().unwrap_or_default();

        Self { nodes, root }
    }

    fn depth(&self, mut node: usize) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.nodes[node].parent {
            node = parent;
            depth += 1;
        }
        depth
    }

    /// Walks up from a leaf's parent until the relative score jump to
    /// the next parent reaches `percent_thresh`.
    ///
    /// Returns the node above the jump, plus whether the walk unified
    /// all the way into the root without finding one.
    fn backup_to_threshold(&self, leaf: usize, percent_thresh: f64) -> (usize, bool) {
        if leaf == self.root {
            return (leaf, false);
        }

        #[allow(clippy::expect_used)]
        let parent = self.nodes[leaf].parent.expect("non-root node has a parent");
        if parent == self.root {
            return (parent, false);
        }

        let mut current = parent;

        while let Some(parent) = self.nodes[current].parent {
            let current_score = self.nodes[current].max_score;
            let parent_score = self.nodes[parent].max_score;

            #[allow(clippy::cast_precision_loss)]
            let percent_diff =
                (current_score - parent_score).abs() as f64 / current_score as f64;

            if percent_diff >= percent_thresh {
                return (parent, false);
            }

            current = parent;
        }

        (self.root, true)
    }

    /// Cuts the tree into disjoint payload-key clusters.
    #[must_use]
    pub fn find_disjoint_sets(&self, percent_thresh: f64) -> Vec<BTreeSet<PayloadKey>> {
        // Leaves, deepest first
        let mut leaves: Vec<usize> = (0..self.nodes.len())
            .filter(|&n| self.nodes[n].children.is_empty())
            .collect();
        leaves.sort_by_key(|&n| std::cmp::Reverse(self.depth(n)));

        log::debug!("cutting dendrogram with {} leaves", leaves.len());

        let mut visited: BTreeSet<BTreeSet<PayloadKey>> = BTreeSet::new();
        let mut clusters: Vec<BTreeSet<PayloadKey>> = Vec::new();

        for leaf in leaves {
            let (boundary, unified) = self.backup_to_threshold(leaf, percent_thresh);

            if !visited.insert(self.nodes[boundary].members.clone()) {
                continue;
            }

            if boundary == self.root {
                if unified && !clusters.is_empty() {
                    // Everything merges smoothly; the whole report is
                    // one cluster
                    clusters.push(self.nodes[boundary].members.clone());
                    return clusters;
                }

                if self.nodes[boundary].children.is_empty() {
                    // Single-leaf tree
                    clusters.push(self.nodes[boundary].members.clone());
                    return clusters;
                }

                for &child in &self.nodes[boundary].children {
                    clusters.push(self.nodes[child].members.clone());
                }
                return clusters;
            }

            for &child in &self.nodes[boundary].children {
                clusters.push(self.nodes[child].members.clone());
            }
        }

        clusters
    }
}
