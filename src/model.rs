//! Text models: loading, saving, and querying.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use byteorder::{ReadBytesExt, WriteBytesExt};
use itertools::Itertools;
use log::debug;
use ndarray::{Array1, ErrorKind as ShapeErrorKind, ShapeError};

use crate::config::{Config, LossType, ModelType};
use crate::dictionary::{Dictionary, EntryType};
use crate::error::{Error, Result};
use crate::io::{check_signature, write_signature, ReadModel, WriteModel};
use crate::matrix::Matrix;
use crate::output::OutputLayer;
use crate::util::l2_normalize;

/// A predicted label with its probability.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub value: f32,
}

/// A trained model.
///
/// A model bundles the hyperparameters, the dictionary, and the input
/// and output embedding matrices. Rows *[0, nwords)* of the input
/// matrix hold word embeddings, the remaining rows subword and token
/// n-gram features.
pub struct TextModel {
    config: Config,
    dict: Dictionary,
    input: Matrix,
    output: Matrix,
    layer: OutputLayer,
}

impl TextModel {
    pub(crate) fn from_parts(
        config: Config,
        dict: Dictionary,
        input: Matrix,
        output: Matrix,
    ) -> Result<TextModel> {
        let supervised = config.model == ModelType::Supervised;

        // Verify that the dictionary and matrix shapes match.
        let expected_output_rows = if supervised {
            dict.nlabels()
        } else {
            dict.nwords()
        };
        if input.rows() != dict.nwords() + config.bucket as usize
            || output.rows() != expected_output_rows
            || input.cols() != config.dim as usize
            || output.cols() != config.dim as usize
        {
            return Err(Error::Shape(ShapeError::from_kind(
                ShapeErrorKind::IncompatibleShape,
            )));
        }

        // Negative sampling has no prediction-time machinery of its
        // own; prediction falls back to a full softmax.
        let layer = match config.loss {
            LossType::HierarchicalSoftmax => {
                let counts = dict.counts(if supervised {
                    EntryType::Label
                } else {
                    EntryType::Word
                });
                OutputLayer::hierarchical_softmax(&counts)
            }
            _ => OutputLayer::Softmax,
        };

        Ok(TextModel {
            config,
            dict,
            input,
            output,
            layer,
        })
    }

    /// Load a model from a file.
    pub fn open(path: impl AsRef<Path>) -> Result<TextModel> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::read_error(format!("{} cannot be opened for loading", path.display()), e)
        })?;
        let mut reader = BufReader::new(file);

        Self::read_model(&mut reader)
    }

    /// Write the model to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            Error::write_error(format!("{} cannot be opened for saving", path.display()), e)
        })?;
        let mut writer = BufWriter::new(file);

        self.write_model(&mut writer)
    }

    /// Get the model hyperparameters.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the model dictionary.
    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    /// Return the length (in vector components) of the embeddings.
    pub fn dim(&self) -> usize {
        self.config.dim as usize
    }

    pub(crate) fn input(&self) -> &Matrix {
        &self.input
    }

    /// Predict up to `k` labels for a line of text.
    ///
    /// Returns the most probable labels in decreasing order of
    /// probability. Lines without any known features yield an empty
    /// result; unknown words never cause an error.
    pub fn predict(&self, text: &str, k: usize) -> Result<Vec<Prediction>> {
        if self.config.model != ModelType::Supervised {
            return Err(Error::Format(
                "Model is not a classification model".into(),
            ));
        }

        let (features, _) = self.dict.supervised_line(text);
        if features.is_empty() {
            return Ok(Vec::new());
        }

        let hidden = self.mean_of_rows(&features);

        Ok(self
            .layer
            .predict(&self.output, hidden.view(), k)
            .into_iter()
            .map(|(value, label_id)| Prediction {
                label: self.dict.label(label_id).to_owned(),
                value,
            })
            .collect())
    }

    /// Get the embedding of a word.
    ///
    /// The embedding is the mean of the word's subword embeddings.
    /// Unknown words are backed off to their character n-grams; the
    /// embedding is zero when there are none.
    pub fn word_vector(&self, word: &str) -> Array1<f32> {
        self.mean_of_rows(&self.dict.word_indices(word))
    }

    /// Get the embedding of a line of text.
    ///
    /// For classification models, this is the mean of the line's
    /// feature embeddings. For embedding models, it is the mean of the
    /// l2-normalized embeddings of the line's words, skipping words
    /// with a zero embedding.
    pub fn sentence_vector(&self, text: &str) -> Array1<f32> {
        if self.config.model == ModelType::Supervised {
            let (features, _) = self.dict.supervised_line(text);
            return self.mean_of_rows(&features);
        }

        let mut sentence = Array1::zeros(self.dim());
        let mut count = 0;
        for token in text.split_whitespace() {
            let mut vector = self.word_vector(token);
            let norm = l2_normalize(vector.view_mut());

            if norm > 0.0 {
                sentence += &vector;
                count += 1;
            }
        }

        if count > 0 {
            sentence /= count as f32;
        }

        sentence
    }

    /// Render the model hyperparameters as TOML metadata.
    pub fn metadata(&self) -> Result<toml::Value> {
        toml::Value::try_from(&self.config)
            .map_err(|e| Error::Format(format!("Cannot serialize model metadata to TOML: {}", e)))
    }

    /// Write the word embeddings in word2vec text format.
    pub fn write_vectors<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        writeln!(writer, "{} {}", self.dict.nwords(), self.dim())
            .map_err(|e| Error::write_error("Cannot write embedding shape", e))?;

        for word in self.dict.words() {
            let vector = self.word_vector(word);
            writeln!(writer, "{} {}", word, vector.iter().join(" "))
                .map_err(|e| Error::write_error("Cannot write embedding", e))?;
        }

        Ok(())
    }

    fn mean_of_rows(&self, ids: &[usize]) -> Array1<f32> {
        let mut mean = Array1::zeros(self.dim());

        for &id in ids {
            mean += &self.input.row(id);
        }
        if !ids.is_empty() {
            mean /= ids.len() as f32;
        }

        mean
    }
}

impl ReadModel for TextModel {
    fn read_model<R>(reader: &mut R) -> Result<Self>
    where
        R: BufRead,
    {
        check_signature(reader)?;

        let config = Config::read(reader)?;
        let dict = Dictionary::read(reader, &config)?;

        let quant_input = reader
            .read_u8()
            .map_err(|e| Error::read_error("Cannot read quantization information", e))?;
        if quant_input == 1 {
            return Err(Error::Format("Quantized models are not supported".into()));
        }
        let input = Matrix::read(reader)?;

        let quant_output = reader
            .read_u8()
            .map_err(|e| Error::read_error("Cannot read quantization information", e))?;
        if quant_output == 1 {
            return Err(Error::Format("Quantized models are not supported".into()));
        }
        let output = Matrix::read(reader)?;

        debug!(
            "Loaded model: {} words, {} labels, {} dimensions",
            dict.nwords(),
            dict.nlabels(),
            config.dim
        );

        TextModel::from_parts(config, dict, input, output)
    }
}

impl WriteModel for TextModel {
    fn write_model<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        write_signature(writer)?;

        self.config.write(writer)?;
        self.dict.write(writer)?;

        writer
            .write_u8(0)
            .map_err(|e| Error::write_error("Cannot write quantization information", e))?;
        self.input.write(writer)?;

        writer
            .write_u8(0)
            .map_err(|e| Error::write_error("Cannot write quantization information", e))?;
        self.output.write(writer)?;

        Ok(())
    }
}
