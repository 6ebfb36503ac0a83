//! Model and training configuration.

use std::io::{Read, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Model architecture.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Continuous bag of words.
    Cbow,
    /// Skip-gram with subword units.
    SkipGram,
    /// Supervised classification.
    Supervised,
}

impl ModelType {
    pub(crate) fn read<R>(reader: &mut R) -> Result<ModelType>
    where
        R: Read,
    {
        let model = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read model type", e))?;

        use self::ModelType::*;
        match model {
            1 => Ok(Cbow),
            2 => Ok(SkipGram),
            3 => Ok(Supervised),
            m => Err(Error::Format(format!("Unknown model: {}", m))),
        }
    }

    pub(crate) fn write<W>(self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        use self::ModelType::*;
        let code = match self {
            Cbow => 1,
            SkipGram => 2,
            Supervised => 3,
        };

        writer
            .write_u32::<LittleEndian>(code)
            .map_err(|e| Error::write_error("Cannot write model type", e))
    }
}

/// Loss function.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossType {
    /// Hierarchical softmax over a Huffman coding of the outputs.
    HierarchicalSoftmax,
    /// Negative sampling.
    NegativeSampling,
    /// Full softmax.
    Softmax,
}

impl LossType {
    pub(crate) fn read<R>(reader: &mut R) -> Result<LossType>
    where
        R: Read,
    {
        let loss = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read loss type", e))?;

        use self::LossType::*;
        match loss {
            1 => Ok(HierarchicalSoftmax),
            2 => Ok(NegativeSampling),
            3 => Ok(Softmax),
            l => Err(Error::Format(format!("Unknown loss: {}", l))),
        }
    }

    pub(crate) fn write<W>(self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        use self::LossType::*;
        let code = match self {
            HierarchicalSoftmax => 1,
            NegativeSampling => 2,
            Softmax => 3,
        };

        writer
            .write_u32::<LittleEndian>(code)
            .map_err(|e| Error::write_error("Cannot write loss type", e))
    }
}

/// Model hyperparameters.
///
/// The hyperparameter block of a model file stores `dim` through
/// `sampling_threshold`. The remaining fields only steer training and
/// are not persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Model architecture.
    pub model: ModelType,

    /// Loss function.
    pub loss: LossType,

    /// Dimensionality of the embeddings.
    pub dim: u32,

    /// Context window size.
    pub ws: u32,

    /// Number of training epochs.
    pub epoch: u32,

    /// Discard words with a frequency below this threshold.
    pub min_count: u32,

    /// Discard labels with a frequency below this threshold.
    #[serde(skip)]
    pub min_count_label: u32,

    /// Number of negative samples per positive example.
    pub neg: u32,

    /// Maximum length of token n-gram features.
    pub word_ngrams: u32,

    /// Number of buckets for subword and token n-gram features.
    pub bucket: u32,

    /// Minimum subword n-gram length.
    pub min_n: u32,

    /// Maximum subword n-gram length. Zero disables subword units.
    pub max_n: u32,

    /// Initial learning rate.
    #[serde(skip)]
    pub lr: f64,

    /// Number of tokens a worker processes between learning rate updates.
    pub lr_update_rate: u32,

    /// Subsampling threshold for frequent words.
    pub sampling_threshold: f64,

    /// Number of training threads.
    #[serde(skip)]
    pub threads: u32,

    /// Prefix that distinguishes labels from words.
    #[serde(skip)]
    pub label_prefix: String,

    /// Training corpus path.
    #[serde(skip)]
    pub input: Option<PathBuf>,

    /// Output path for the trained model, without the `.bin` suffix.
    #[serde(skip)]
    pub output: Option<PathBuf>,

    /// Word2vec-style text file with vectors to initialize the input
    /// matrix from.
    #[serde(skip)]
    pub pretrained_vectors: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model: ModelType::SkipGram,
            loss: LossType::NegativeSampling,
            dim: 100,
            ws: 5,
            epoch: 5,
            min_count: 5,
            min_count_label: 0,
            neg: 5,
            word_ngrams: 1,
            bucket: 2_000_000,
            min_n: 3,
            max_n: 6,
            lr: 0.05,
            lr_update_rate: 100,
            sampling_threshold: 1e-4,
            threads: 4,
            label_prefix: "__label__".to_owned(),
            input: None,
            output: None,
            pretrained_vectors: None,
        }
    }
}

impl Config {
    /// Default configuration for supervised classification models.
    pub fn supervised() -> Self {
        Config {
            model: ModelType::Supervised,
            loss: LossType::Softmax,
            lr: 0.1,
            min_count: 1,
            min_n: 0,
            max_n: 0,
            ..Default::default()
        }
    }

    /// Read the persisted hyperparameter block.
    ///
    /// Fields that are not persisted keep their default values.
    pub(crate) fn read<R>(reader: &mut R) -> Result<Config>
    where
        R: Read,
    {
        let dim = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read number of dimensions", e))?;
        let ws = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read window size", e))?;
        let epoch = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read number of epochs", e))?;
        let min_count = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read minimum count", e))?;
        let neg = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read negative samples", e))?;
        let word_ngrams = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read word n-gram length", e))?;
        let loss = LossType::read(reader)?;
        let model = ModelType::read(reader)?;
        let bucket = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read number of buckets", e))?;
        let min_n = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read minimum subword length", e))?;
        let max_n = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read maximum subword length", e))?;
        let lr_update_rate = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read LR update rate", e))?;
        let sampling_threshold = reader
            .read_f64::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read sampling threshold", e))?;

        Ok(Config {
            model,
            loss,
            dim,
            ws,
            epoch,
            min_count,
            neg,
            word_ngrams,
            bucket,
            min_n,
            max_n,
            lr_update_rate,
            sampling_threshold,
            ..Default::default()
        })
    }

    /// Write the persisted hyperparameter block.
    pub(crate) fn write<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        writer
            .write_u32::<LittleEndian>(self.dim)
            .map_err(|e| Error::write_error("Cannot write number of dimensions", e))?;
        writer
            .write_u32::<LittleEndian>(self.ws)
            .map_err(|e| Error::write_error("Cannot write window size", e))?;
        writer
            .write_u32::<LittleEndian>(self.epoch)
            .map_err(|e| Error::write_error("Cannot write number of epochs", e))?;
        writer
            .write_u32::<LittleEndian>(self.min_count)
            .map_err(|e| Error::write_error("Cannot write minimum count", e))?;
        writer
            .write_u32::<LittleEndian>(self.neg)
            .map_err(|e| Error::write_error("Cannot write negative samples", e))?;
        writer
            .write_u32::<LittleEndian>(self.word_ngrams)
            .map_err(|e| Error::write_error("Cannot write word n-gram length", e))?;
        self.loss.write(writer)?;
        self.model.write(writer)?;
        writer
            .write_u32::<LittleEndian>(self.bucket)
            .map_err(|e| Error::write_error("Cannot write number of buckets", e))?;
        writer
            .write_u32::<LittleEndian>(self.min_n)
            .map_err(|e| Error::write_error("Cannot write minimum subword length", e))?;
        writer
            .write_u32::<LittleEndian>(self.max_n)
            .map_err(|e| Error::write_error("Cannot write maximum subword length", e))?;
        writer
            .write_u32::<LittleEndian>(self.lr_update_rate)
            .map_err(|e| Error::write_error("Cannot write LR update rate", e))?;
        writer
            .write_f64::<LittleEndian>(self.sampling_threshold)
            .map_err(|e| Error::write_error("Cannot write sampling threshold", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{Config, LossType, ModelType};

    #[test]
    fn config_write_read_roundtrip() {
        let check_config = Config {
            model: ModelType::Supervised,
            loss: LossType::HierarchicalSoftmax,
            dim: 25,
            ws: 3,
            epoch: 10,
            min_count: 2,
            neg: 7,
            word_ngrams: 2,
            bucket: 10_000,
            min_n: 2,
            max_n: 5,
            lr_update_rate: 50,
            sampling_threshold: 1e-5,
            ..Default::default()
        };

        let mut cursor = Cursor::new(Vec::new());
        check_config.write(&mut cursor).unwrap();
        cursor.set_position(0);
        let config = Config::read(&mut cursor).unwrap();
        assert_eq!(config, check_config);
    }

    #[test]
    fn unknown_loss_is_rejected() {
        let mut cursor = Cursor::new(vec![42, 0, 0, 0]);
        assert!(LossType::read(&mut cursor).is_err());
    }

    #[test]
    fn unknown_model_is_rejected() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 0]);
        assert!(ModelType::read(&mut cursor).is_err());
    }

    #[test]
    fn supervised_defaults_disable_subwords() {
        let config = Config::supervised();
        assert_eq!(config.model, ModelType::Supervised);
        assert_eq!(config.loss, LossType::Softmax);
        assert_eq!(config.max_n, 0);
    }
}
