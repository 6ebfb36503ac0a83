use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use crate::classifier::Classifier;
use crate::config::{Config, LossType, ModelType};
use crate::io::ReadModel;
use crate::model::TextModel;
use crate::query::Query;
use crate::train::train;

fn write_corpus(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn classification_corpus() -> String {
    "__label__helloLabel how it works\n".repeat(40)
}

fn two_label_corpus() -> String {
    let mut corpus = String::new();
    for _ in 0..30 {
        corpus.push_str("__label__greeting hello there friend\n");
        corpus.push_str("__label__farewell bye now later\n");
    }
    corpus
}

fn embedding_corpus() -> String {
    let mut corpus = String::new();
    for _ in 0..40 {
        corpus.push_str("the quick brown fox jumps over the lazy dog\n");
        corpus.push_str("the lazy dog sleeps under the old tree\n");
        corpus.push_str("a quick fox runs past the old barn\n");
    }
    corpus
}

fn classification_config(input: PathBuf) -> Config {
    Config {
        dim: 10,
        epoch: 25,
        lr: 0.5,
        threads: 1,
        bucket: 2_000,
        input: Some(input),
        ..Config::supervised()
    }
}

fn embedding_config(input: PathBuf) -> Config {
    Config {
        dim: 10,
        epoch: 5,
        min_count: 1,
        threads: 1,
        bucket: 2_000,
        // Tiny corpora need subsampling disabled, every word is
        // frequent relative to the corpus size.
        sampling_threshold: 1.0,
        input: Some(input),
        ..Default::default()
    }
}

#[test]
fn classifier_predicts_the_trained_label() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "classification.txt", &classification_corpus());

    let model = train(&classification_config(corpus)).unwrap();
    let classifier = Classifier::from_model(model).unwrap();

    let predictions = classifier.predict("how it works", 1).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].label, "__label__helloLabel");
    assert!(predictions[0].value.is_finite());
    assert!(predictions[0].value > 0.0 && predictions[0].value <= 1.0);
}

#[test]
fn classifier_returns_no_predictions_for_unknown_words() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "classification.txt", &classification_corpus());

    let model = train(&classification_config(corpus)).unwrap();
    let classifier = Classifier::from_model(model).unwrap();

    let predictions = classifier.predict("wtf", 1).unwrap();
    assert_eq!(predictions.len(), 0);
}

#[test]
fn classifier_returns_at_most_k_predictions() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "classification.txt", &classification_corpus());

    let model = train(&classification_config(corpus)).unwrap();
    let classifier = Classifier::from_model(model).unwrap();

    // The model has a single label; asking for more yields fewer.
    let predictions = classifier.predict("how it works", 5).unwrap();
    assert_eq!(predictions.len(), 1);
}

#[test]
fn classifier_separates_two_labels() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "two_labels.txt", &two_label_corpus());

    let model = train(&classification_config(corpus)).unwrap();
    let classifier = Classifier::from_model(model).unwrap();
    assert_eq!(classifier.labels().count(), 2);

    let predictions = classifier.predict("hello there", 2).unwrap();
    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0].label, "__label__greeting");
    assert!(predictions[0].value >= predictions[1].value);

    let predictions = classifier.predict("bye now", 2).unwrap();
    assert_eq!(predictions[0].label, "__label__farewell");
}

#[test]
fn classifier_with_hierarchical_softmax() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "two_labels.txt", &two_label_corpus());

    let config = Config {
        loss: LossType::HierarchicalSoftmax,
        ..classification_config(corpus)
    };
    let model = train(&config).unwrap();
    let classifier = Classifier::from_model(model).unwrap();

    let predictions = classifier.predict("hello there", 2).unwrap();
    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0].label, "__label__greeting");
    for prediction in &predictions {
        assert!(prediction.value > 0.0 && prediction.value <= 1.0);
    }
}

#[test]
fn classifier_rejects_embedding_models() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let model = train(&embedding_config(corpus)).unwrap();
    assert!(Classifier::from_model(model).is_err());
}

#[test]
fn classifier_open_fails_on_missing_file() {
    assert!(Classifier::open("/nonexistent/classification.bin").is_err());
}

#[test]
fn nearest_neighbors_returns_k_results() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let model = train(&embedding_config(corpus)).unwrap();
    let query = Query::from_model(model);

    let neighbors = query.nn("fox", 2);
    assert_eq!(neighbors.len(), 2);
    assert!(neighbors.iter().all(|neighbor| neighbor.word() != "fox"));
    assert!(neighbors[0].cosine_similarity() >= neighbors[1].cosine_similarity());
}

#[test]
fn nearest_neighbors_of_unknown_words_back_off_to_subwords() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let model = train(&embedding_config(corpus)).unwrap();
    let query = Query::from_model(model);

    // "foxes" shares character n-grams with "fox".
    let neighbors = query.nn("foxes", 3);
    assert_eq!(neighbors.len(), 3);
}

#[test]
fn sentence_vector_has_the_configured_dimensionality() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let config = Config {
        dim: 24,
        ..embedding_config(corpus)
    };
    let model = train(&config).unwrap();
    let query = Query::from_model(model);

    assert_eq!(query.sentence_vector("the quick fox").len(), 24);
    assert_eq!(query.sentence_vector("").len(), 24);
    assert_eq!(query.word_vector("zzzz").len(), 24);
}

#[test]
fn trained_model_survives_a_save_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let config = Config {
        dim: 12,
        output: Some(dir.path().join("model")),
        ..embedding_config(corpus)
    };
    let model = train(&config).unwrap();

    let reloaded = TextModel::open(dir.path().join("model.bin")).unwrap();
    assert_eq!(reloaded.config().dim, 12);
    assert_eq!(reloaded.config().model, ModelType::SkipGram);
    assert_eq!(
        reloaded.dictionary().words().collect::<Vec<_>>(),
        model.dictionary().words().collect::<Vec<_>>()
    );
    assert_eq!(reloaded.input().view(), model.input().view());

    let query = Query::from_model(reloaded);
    assert_eq!(query.sentence_vector("the quick fox").len(), 12);
}

#[test]
fn classification_model_survives_a_save_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "classification.txt", &classification_corpus());

    let config = Config {
        output: Some(dir.path().join("classification")),
        ..classification_config(corpus)
    };
    train(&config).unwrap();

    let classifier = Classifier::open(dir.path().join("classification.bin")).unwrap();
    let predictions = classifier.predict("how it works", 1).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].label, "__label__helloLabel");
}

#[test]
fn corrupt_model_files_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corrupt.bin");
    fs::write(&path, b"not a model").unwrap();

    assert!(TextModel::open(&path).is_err());
}

#[test]
fn read_model_rejects_bad_magic() {
    let mut cursor = Cursor::new(vec![0u8; 64]);
    assert!(TextModel::read_model(&mut cursor).is_err());
}

#[test]
fn train_without_input_fails() {
    assert!(train(&Config::default()).is_err());
}

#[test]
fn train_with_missing_input_fails() {
    let config = Config {
        input: Some(PathBuf::from("/nonexistent/corpus.txt")),
        ..Config::default()
    };
    assert!(train(&config).is_err());
}

#[test]
fn pretrained_vectors_seed_the_input_matrix() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());
    // "zebra" does not occur in the corpus, so its row is never
    // touched by training.
    let vectors = write_corpus(
        &dir,
        "pretrained.vec",
        "2 4\nzebra 0.25 -0.5 0.75 -1.0\nfox 0.1 0.2 0.3 0.4\n",
    );

    let config = Config {
        dim: 4,
        // Word embeddings only, so that a word vector is exactly its
        // input row.
        min_n: 0,
        max_n: 0,
        pretrained_vectors: Some(vectors),
        ..embedding_config(corpus)
    };
    let model = train(&config).unwrap();

    let zebra = model.word_vector("zebra");
    assert_abs_diff_eq!(zebra[0], 0.25, epsilon = 1e-6);
    assert_abs_diff_eq!(zebra[1], -0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(zebra[2], 0.75, epsilon = 1e-6);
    assert_abs_diff_eq!(zebra[3], -1.0, epsilon = 1e-6);
}

#[test]
fn pretrained_vectors_with_wrong_dimensionality_fail() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());
    let vectors = write_corpus(&dir, "pretrained.vec", "1 2\nzebra 0.25 -0.5\n");

    let config = Config {
        dim: 4,
        pretrained_vectors: Some(vectors),
        ..embedding_config(corpus)
    };
    assert!(train(&config).is_err());
}

#[test]
fn written_vectors_carry_the_embedding_shape() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let model = train(&embedding_config(corpus)).unwrap();

    let mut buffer = Vec::new();
    model.write_vectors(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();

    let header = text.lines().next().unwrap();
    assert_eq!(
        header,
        format!("{} 10", model.dictionary().nwords())
    );
    assert_eq!(text.lines().count(), model.dictionary().nwords() + 1);
}

#[test]
fn metadata_renders_the_hyperparameters() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let model = train(&embedding_config(corpus)).unwrap();
    let metadata = model.metadata().unwrap();

    assert_eq!(metadata["dim"].as_integer(), Some(10));
    assert_eq!(metadata["model"].as_str(), Some("skipgram"));
}

#[test]
fn multi_threaded_training_completes() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let config = Config {
        threads: 3,
        ..embedding_config(corpus)
    };
    let model = train(&config).unwrap();
    let query = Query::from_model(model);

    assert_eq!(query.nn("fox", 2).len(), 2);
}

#[test]
fn cbow_training_completes() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(&dir, "embedding.txt", &embedding_corpus());

    let config = Config {
        model: ModelType::Cbow,
        ..embedding_config(corpus)
    };
    let model = train(&config).unwrap();

    assert_eq!(model.config().model, ModelType::Cbow);
    assert_eq!(model.sentence_vector("the quick fox").len(), 10);
}
