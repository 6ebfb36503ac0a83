//! Output layers for prediction and training.

use std::collections::BinaryHeap;

use ndarray::ArrayView1;
use ordered_float::NotNan;

use crate::matrix::Matrix;

/// Size of the negative sampling table.
const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

/// Sentinel frequency for Huffman tree nodes that have not been built
/// yet.
const UNBUILT_COUNT: u64 = 1 << 60;

/// Huffman coding of the output units.
///
/// Every output unit is a leaf; its path lists the internal nodes from
/// the root down, its code the branch taken at each of them.
#[derive(Clone, Debug)]
pub(crate) struct HuffmanTree {
    paths: Vec<Vec<usize>>,
    codes: Vec<Vec<bool>>,
}

struct TreeNode {
    parent: Option<usize>,
    right_child: bool,
    count: u64,
}

impl HuffmanTree {
    /// Build a Huffman tree over output frequencies.
    ///
    /// The frequencies must be in decreasing order.
    pub fn new(counts: &[u64]) -> Self {
        debug_assert!(
            counts.windows(2).all(|w| w[0] >= w[1]),
            "Output frequencies must be in decreasing order"
        );

        if counts.is_empty() {
            return HuffmanTree {
                paths: Vec::new(),
                codes: Vec::new(),
            };
        }

        let n = counts.len();
        let mut tree = Vec::with_capacity(2 * n - 1);
        for &count in counts {
            tree.push(TreeNode {
                parent: None,
                right_child: false,
                count,
            });
        }
        for _ in n..2 * n - 1 {
            tree.push(TreeNode {
                parent: None,
                right_child: false,
                count: UNBUILT_COUNT,
            });
        }

        // The two smallest unattached nodes are always the next leaf
        // (walking the frequencies backwards) or the next built
        // internal node.
        let mut leaf = n as i64 - 1;
        let mut node = n;
        for parent in n..2 * n - 1 {
            let mut children = [0; 2];
            for child in &mut children {
                if leaf >= 0 && tree[leaf as usize].count < tree[node].count {
                    *child = leaf as usize;
                    leaf -= 1;
                } else {
                    *child = node;
                    node += 1;
                }
            }

            tree[parent].count = tree[children[0]].count + tree[children[1]].count;
            tree[children[0]].parent = Some(parent);
            tree[children[1]].parent = Some(parent);
            tree[children[1]].right_child = true;
        }

        let mut paths = Vec::with_capacity(n);
        let mut codes = Vec::with_capacity(n);
        for output in 0..n {
            let mut path = Vec::new();
            let mut code = Vec::new();

            let mut current = output;
            while let Some(parent) = tree[current].parent {
                // Internal nodes index the output matrix from zero.
                path.push(parent - n);
                code.push(tree[current].right_child);
                current = parent;
            }

            path.reverse();
            code.reverse();
            paths.push(path);
            codes.push(code);
        }

        HuffmanTree { paths, codes }
    }

    pub fn path(&self, output: usize) -> &[usize] {
        &self.paths[output]
    }

    pub fn code(&self, output: usize) -> &[bool] {
        &self.codes[output]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Output layer of a model.
///
/// During training, the variants carry the state their loss needs: the
/// sampling table for negative sampling, the Huffman coding for
/// hierarchical softmax. For prediction, negative sampling falls back
/// to a full softmax over the output units.
pub(crate) enum OutputLayer {
    Softmax,
    NegativeSampling { negatives: Vec<u32> },
    HierarchicalSoftmax { tree: HuffmanTree },
}

impl OutputLayer {
    /// Build the sampling table for negative sampling.
    ///
    /// Outputs are sampled proportionally to the square root of their
    /// frequency.
    pub fn negative_sampling(counts: &[u64]) -> Self {
        let z: f64 = counts.iter().map(|&count| (count as f64).sqrt()).sum();

        let mut negatives = Vec::with_capacity(NEGATIVE_TABLE_SIZE);
        for (output, &count) in counts.iter().enumerate() {
            let slots = ((count as f64).sqrt() / z * NEGATIVE_TABLE_SIZE as f64) as usize;
            negatives.extend(std::iter::repeat(output as u32).take(slots));
        }

        OutputLayer::NegativeSampling { negatives }
    }

    pub fn hierarchical_softmax(counts: &[u64]) -> Self {
        OutputLayer::HierarchicalSoftmax {
            tree: HuffmanTree::new(counts),
        }
    }

    /// Predict the `k` most probable output units for a hidden state.
    ///
    /// Returns pairs of probability and output index in decreasing
    /// order of probability.
    pub fn predict(
        &self,
        output: &Matrix,
        hidden: ArrayView1<f32>,
        k: usize,
    ) -> Vec<(f32, usize)> {
        if k == 0 {
            return Vec::new();
        }

        match self {
            OutputLayer::HierarchicalSoftmax { tree } => {
                predict_hierarchical(tree, output, hidden, k)
            }
            _ => predict_softmax(output, hidden, k),
        }
    }
}

/// An output unit ranked by (log-)probability.
#[derive(Debug, PartialEq)]
struct Ranked {
    score: NotNan<f32>,
    output: usize,
}

impl Eq for Ranked {}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match other.score.cmp(&self.score) {
            std::cmp::Ordering::Equal => self.output.cmp(&other.output),
            ordering => ordering,
        }
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn predict_softmax(output: &Matrix, hidden: ArrayView1<f32>, k: usize) -> Vec<(f32, usize)> {
    let probabilities = softmax(output, hidden);

    // A min-heap of the best k outputs; the heap's maximum is the
    // worst retained prediction.
    let mut results = BinaryHeap::with_capacity(k);
    for (output, probability) in probabilities.into_iter().enumerate() {
        let ranked = Ranked {
            score: NotNan::new(probability).expect("Encountered NaN"),
            output,
        };

        if results.len() < k {
            results.push(ranked);
        } else {
            let mut peek = results.peek_mut().expect("Cannot peek non-empty heap");
            if ranked < *peek {
                *peek = ranked;
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|ranked| (ranked.score.into_inner(), ranked.output))
        .collect()
}

/// Rank leaves of the Huffman tree by their path log-probability.
///
/// Every internal node's score is shared by all leaves below it, so
/// each node is scored at most once.
fn predict_hierarchical(
    tree: &HuffmanTree,
    output: &Matrix,
    hidden: ArrayView1<f32>,
    k: usize,
) -> Vec<(f32, usize)> {
    let mut node_scores: Vec<Option<f32>> = vec![None; tree.len().saturating_sub(1)];

    let mut results = BinaryHeap::with_capacity(k);
    for leaf in 0..tree.len() {
        let mut log_prob = 0f32;
        for (&node, &right) in tree.path(leaf).iter().zip(tree.code(leaf).iter()) {
            let score =
                *node_scores[node].get_or_insert_with(|| output.dot_row(hidden, node));

            log_prob += log_sigmoid(if right { score } else { -score });
        }

        let ranked = Ranked {
            score: NotNan::new(log_prob).expect("Encountered NaN"),
            output: leaf,
        };

        if results.len() < k {
            results.push(ranked);
        } else {
            let mut peek = results.peek_mut().expect("Cannot peek non-empty heap");
            if ranked < *peek {
                *peek = ranked;
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|ranked| (ranked.score.into_inner().exp(), ranked.output))
        .collect()
}

/// Softmax probabilities of all output units.
pub(crate) fn softmax(output: &Matrix, hidden: ArrayView1<f32>) -> Vec<f32> {
    let mut scores: Vec<f32> = (0..output.rows())
        .map(|idx| output.dot_row(hidden, idx))
        .collect();

    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut z = 0f32;
    for score in scores.iter_mut() {
        *score = (*score - max).exp();
        z += *score;
    }
    for score in scores.iter_mut() {
        *score /= z;
    }

    scores
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn log_sigmoid(x: f32) -> f32 {
    -(1.0 + (-x).exp()).ln()
}
