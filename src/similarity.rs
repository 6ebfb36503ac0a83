//! Types for nearest-neighbor queries.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use ndarray::{Array2, ArrayView1};
use ordered_float::NotNan;

use crate::dictionary::Dictionary;
use crate::model::TextModel;
use crate::util::l2_normalize;

/// A word with its similarity.
///
/// This data structure is used to store a pair consisting of a word and
/// its similarity to a query.
#[derive(Debug, Eq, PartialEq)]
pub struct WordSimilarityResult<'a> {
    similarity: NotNan<f32>,
    word: &'a str,
}

impl<'a> WordSimilarityResult<'a> {
    /// Get the word's cosine similarity to the query.
    pub fn cosine_similarity(&self) -> f32 {
        self.similarity.into_inner()
    }

    pub fn word(&self) -> &str {
        self.word
    }
}

impl<'a> Ord for WordSimilarityResult<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.similarity.cmp(&self.similarity) {
            Ordering::Equal => self.word.cmp(other.word),
            ordering => ordering,
        }
    }
}

impl<'a> PartialOrd for WordSimilarityResult<'a> {
    fn partial_cmp(&self, other: &WordSimilarityResult) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Precomputed l2-normalized word embeddings.
///
/// Nearest-neighbor queries score every word; precomputing the
/// normalized embedding matrix makes a query a single matrix-vector
/// product.
pub(crate) struct WordVectors {
    vectors: Array2<f32>,
}

impl WordVectors {
    /// Precompute the normalized embedding of every word of a model.
    pub fn new(model: &TextModel) -> Self {
        let dict = model.dictionary();
        let mut vectors = Array2::zeros((dict.nwords(), model.dim()));

        for (id, word) in dict.words().enumerate() {
            let vector = model.word_vector(word);
            let mut row = vectors.row_mut(id);
            row.assign(&vector);
            l2_normalize(row);
        }

        WordVectors { vectors }
    }

    /// Find the `limit` words most similar to the query embedding.
    ///
    /// Words in `skip` are excluded from the results.
    pub fn nearest<'a>(
        &self,
        dict: &'a Dictionary,
        query: ArrayView1<f32>,
        limit: usize,
        skip: &HashSet<&str>,
    ) -> Vec<WordSimilarityResult<'a>> {
        let query_norm = {
            let norm = query.dot(&query).sqrt();
            if norm.abs() < 1e-8 {
                1.0
            } else {
                norm
            }
        };

        let similarities = self.vectors.dot(&query) / query_norm;

        let mut results = BinaryHeap::with_capacity(limit);
        for (id, &similarity) in similarities.iter().enumerate() {
            let word = dict.word(id);

            // Don't add words that we are explicitly asked to skip.
            if skip.contains(word) {
                continue;
            }

            let word_similarity = WordSimilarityResult {
                word,
                similarity: NotNan::new(similarity).expect("Encountered NaN"),
            };

            if results.len() < limit {
                results.push(word_similarity);
            } else {
                let mut peek = results.peek_mut().expect("Cannot peek non-empty heap");
                if word_similarity < *peek {
                    *peek = word_similarity
                }
            }
        }

        results.into_sorted_vec()
    }
}
