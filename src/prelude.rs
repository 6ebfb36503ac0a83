//! Prelude exports the most commonly-used types and functions.

pub use crate::classifier::Classifier;

pub use crate::config::{Config, LossType, ModelType};

pub use crate::error::{Error, Result};

pub use crate::io::{ReadModel, WriteModel};

pub use crate::model::{Prediction, TextModel};

pub use crate::query::Query;

pub use crate::similarity::WordSimilarityResult;

pub use crate::train::train;
