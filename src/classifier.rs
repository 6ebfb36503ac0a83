//! Text classification.

use std::path::Path;

use crate::config::ModelType;
use crate::error::{Error, Result};
use crate::model::{Prediction, TextModel};

/// A text classifier backed by a supervised model.
///
/// ```no_run
/// use quicktext::classifier::Classifier;
///
/// let classifier = Classifier::open("classification.bin").unwrap();
/// for prediction in classifier.predict("how it works", 1).unwrap() {
///     println!("{}\t{}", prediction.label, prediction.value);
/// }
/// ```
pub struct Classifier {
    model: TextModel,
}

impl Classifier {
    /// Load a classifier from a model file.
    ///
    /// Fails when the file cannot be read or when the model was not
    /// trained for classification.
    pub fn open(path: impl AsRef<Path>) -> Result<Classifier> {
        Self::from_model(TextModel::open(path)?)
    }

    /// Construct a classifier from a trained model.
    pub fn from_model(model: TextModel) -> Result<Classifier> {
        if model.config().model != ModelType::Supervised {
            return Err(Error::Format(
                "Model is not a classification model".into(),
            ));
        }

        Ok(Classifier { model })
    }

    /// Predict up to `k` labels for a line of text.
    ///
    /// Returns the most probable labels in decreasing order of
    /// probability. Lines without any known features yield an empty
    /// result; unknown words never cause an error.
    pub fn predict(&self, text: &str, k: usize) -> Result<Vec<Prediction>> {
        self.model.predict(text, k)
    }

    /// Iterate over the labels the classifier can assign.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.model.dictionary().labels()
    }

    /// Get the underlying model.
    pub fn model(&self) -> &TextModel {
        &self.model
    }
}
