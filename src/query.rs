//! Embedding queries.

use std::collections::HashSet;
use std::path::Path;

use ndarray::Array1;

use crate::error::Result;
use crate::model::TextModel;
use crate::similarity::{WordSimilarityResult, WordVectors};

/// Embedding queries over a model.
///
/// A `Query` precomputes the l2-normalized embedding of every word in
/// the model when it is constructed, so that nearest-neighbor queries
/// are a single pass over the embedding matrix.
///
/// ```no_run
/// use quicktext::query::Query;
///
/// let query = Query::open("query.bin").unwrap();
/// for neighbor in query.nn("wozniak", 2) {
///     println!("{}\t{}", neighbor.word(), neighbor.cosine_similarity());
/// }
/// ```
pub struct Query {
    model: TextModel,
    word_vectors: WordVectors,
}

impl Query {
    /// Load a model file for querying.
    pub fn open(path: impl AsRef<Path>) -> Result<Query> {
        Ok(Self::from_model(TextModel::open(path)?))
    }

    /// Construct a query facility from a trained model.
    pub fn from_model(model: TextModel) -> Query {
        let word_vectors = WordVectors::new(&model);
        Query {
            model,
            word_vectors,
        }
    }

    /// Find the `k` words nearest to the query word.
    ///
    /// The neighbors are ordered by decreasing cosine similarity; the
    /// query word itself is excluded. The query word does not have to
    /// be in the vocabulary, its embedding is backed off to character
    /// n-grams.
    pub fn nn(&self, word: &str, k: usize) -> Vec<WordSimilarityResult> {
        let query = self.model.word_vector(word);

        let mut skip = HashSet::new();
        skip.insert(word);

        self.word_vectors
            .nearest(self.model.dictionary(), query.view(), k, &skip)
    }

    /// Get the embedding of a line of text.
    pub fn sentence_vector(&self, text: &str) -> Array1<f32> {
        self.model.sentence_vector(text)
    }

    /// Get the embedding of a word.
    pub fn word_vector(&self, word: &str) -> Array1<f32> {
        self.model.word_vector(word)
    }

    /// Get the underlying model.
    pub fn model(&self) -> &TextModel {
        &self.model
    }
}
