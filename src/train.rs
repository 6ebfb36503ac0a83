//! Multi-threaded asynchronous SGD training.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use log::{debug, info};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use crate::config::{Config, LossType, ModelType};
use crate::dictionary::{Dictionary, EntryType};
use crate::error::{Error, Result};
use crate::matrix::{HogwildMatrix, Matrix};
use crate::model::TextModel;
use crate::output::{sigmoid, OutputLayer};
use crate::util::read_number;

/// Train a model.
///
/// Reads the corpus at `config.input`, trains with `config.threads`
/// worker threads, and returns the trained model. When `config.output`
/// is set, the model is also written to that path with a `.bin`
/// suffix.
pub fn train(config: &Config) -> Result<TextModel> {
    if config.dim == 0 {
        return Err(Error::Format(
            "The embedding dimensionality cannot be zero".into(),
        ));
    }
    if config.model != ModelType::Supervised && config.ws == 0 {
        return Err(Error::Format("The context window cannot be empty".into()));
    }

    let input_path = config
        .input
        .as_ref()
        .ok_or_else(|| Error::Format("No training input file set".into()))?;

    let corpus = File::open(input_path).map_err(|e| {
        Error::read_error(
            format!("{} cannot be opened for training", input_path.display()),
            e,
        )
    })?;
    let corpus_size = corpus
        .metadata()
        .map_err(|e| Error::read_error("Cannot determine training data size", e))?
        .len();

    let mut reader = BufReader::new(corpus);
    let mut dict = Dictionary::new(config);
    dict.read_corpus(&mut reader)?;
    dict.threshold(
        u64::from(config.min_count),
        u64::from(config.min_count_label),
    );

    let pretrained = match &config.pretrained_vectors {
        Some(path) => {
            let pretrained = read_pretrained(path, config, &mut dict)?;
            dict.threshold(1, 0);
            Some(pretrained)
        }
        None => None,
    };
    dict.init_tables(config.sampling_threshold);

    info!(
        "Read {} tokens: {} words, {} labels",
        dict.ntokens(),
        dict.nwords(),
        dict.nlabels()
    );

    if dict.nwords() == 0 {
        return Err(Error::Format(
            "Training data contains no vocabulary; lower the minimum count".into(),
        ));
    }
    if config.model == ModelType::Supervised && dict.nlabels() == 0 {
        return Err(Error::Format("Training data contains no labels".into()));
    }

    let dim = config.dim as usize;
    let mut init_rng = XorShiftRng::seed_from_u64(1);
    let mut input_matrix = Matrix::uniform(
        dict.nwords() + config.bucket as usize,
        dim,
        1.0 / config.dim as f32,
        &mut init_rng,
    );

    if let Some((words, vectors)) = pretrained {
        for (word, vector) in words.iter().zip(vectors.outer_iter()) {
            if let Some(id) = dict.get_id(word) {
                if id < dict.nwords() {
                    input_matrix.row_mut(id).assign(&vector);
                }
            }
        }
    }

    let supervised = config.model == ModelType::Supervised;
    let output_rows = if supervised {
        dict.nlabels()
    } else {
        dict.nwords()
    };
    let output_matrix = Matrix::zeros(output_rows, dim);

    let counts = dict.counts(if supervised {
        EntryType::Label
    } else {
        EntryType::Word
    });
    let layer = match config.loss {
        LossType::NegativeSampling => OutputLayer::negative_sampling(&counts),
        LossType::HierarchicalSoftmax => OutputLayer::hierarchical_softmax(&counts),
        LossType::Softmax => OutputLayer::Softmax,
    };

    let nthreads = config.threads.max(1) as usize;
    let mut corpus_handles = Vec::with_capacity(nthreads);
    for _ in 0..nthreads {
        corpus_handles.push(File::open(input_path).map_err(|e| {
            Error::read_error(
                format!("{} cannot be opened for training", input_path.display()),
                e,
            )
        })?);
    }

    let input_shared = HogwildMatrix::new(input_matrix);
    let output_shared = HogwildMatrix::new(output_matrix);
    let token_count = AtomicU64::new(0);

    let ctx = TrainContext {
        config,
        dict: &dict,
        input: &input_shared,
        output: &output_shared,
        layer: &layer,
        token_count: &token_count,
        total_tokens: u64::from(config.epoch) * dict.ntokens(),
        corpus_size,
        nthreads,
    };

    let (loss, nexamples) = thread::scope(|scope| -> Result<(f64, u64)> {
        let mut handles = Vec::with_capacity(nthreads);
        for (tid, corpus) in corpus_handles.into_iter().enumerate() {
            handles.push(scope.spawn(move || -> Result<(f64, u64)> {
                let mut worker = Worker::new(ctx, tid);
                worker.run(corpus)?;
                Ok((worker.loss, worker.nexamples))
            }));
        }

        let mut loss = 0f64;
        let mut nexamples = 0u64;
        for handle in handles {
            let (worker_loss, worker_nexamples) = handle
                .join()
                .map_err(|_| Error::Format("A training thread panicked".into()))??;
            loss += worker_loss;
            nexamples += worker_nexamples;
        }

        Ok((loss, nexamples))
    })?;

    info!(
        "Trained on {} examples, avg. loss: {:.5}",
        nexamples,
        loss / nexamples.max(1) as f64
    );

    let model = TextModel::from_parts(
        config.clone(),
        dict,
        input_shared.into_inner(),
        output_shared.into_inner(),
    )?;

    if let Some(output) = &config.output {
        model.save(output.with_extension("bin"))?;
    }

    Ok(model)
}

#[derive(Clone, Copy)]
struct TrainContext<'a> {
    config: &'a Config,
    dict: &'a Dictionary,
    input: &'a HogwildMatrix,
    output: &'a HogwildMatrix,
    layer: &'a OutputLayer,
    token_count: &'a AtomicU64,
    total_tokens: u64,
    corpus_size: u64,
    nthreads: usize,
}

struct Worker<'a> {
    ctx: TrainContext<'a>,
    tid: usize,
    rng: XorShiftRng,
    hidden: Array1<f32>,
    grad: Array1<f32>,
    scores: Vec<f32>,
    loss: f64,
    nexamples: u64,
}

impl<'a> Worker<'a> {
    fn new(ctx: TrainContext<'a>, tid: usize) -> Self {
        let dim = ctx.config.dim as usize;

        Worker {
            ctx,
            tid,
            rng: XorShiftRng::seed_from_u64(tid as u64),
            hidden: Array1::zeros(dim),
            grad: Array1::zeros(dim),
            scores: Vec::new(),
            loss: 0.0,
            nexamples: 0,
        }
    }

    /// Process this worker's slice of the corpus until the global
    /// token budget is exhausted, wrapping around at the end of the
    /// file.
    fn run(&mut self, corpus: File) -> Result<()> {
        let ctx = self.ctx;
        let mut reader = BufReader::new(corpus);

        let start = self.tid as u64 * ctx.corpus_size / ctx.nthreads as u64;
        reader
            .seek(SeekFrom::Start(start))
            .map_err(|e| Error::read_error("Cannot seek to worker start position", e))?;
        if start > 0 {
            // Skip the partial line the seek landed in.
            let mut partial = String::new();
            reader
                .read_line(&mut partial)
                .map_err(|e| Error::read_error("Cannot read line from training data", e))?;
        }

        let mut line = String::new();
        let mut local_tokens = 0u64;
        while ctx.token_count.load(Ordering::Relaxed) < ctx.total_tokens {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| Error::read_error("Cannot read line from training data", e))?;
            if n == 0 {
                reader
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| Error::read_error("Cannot seek to training data start", e))?;
                continue;
            }

            let progress =
                ctx.token_count.load(Ordering::Relaxed) as f64 / ctx.total_tokens as f64;
            let lr = (ctx.config.lr * (1.0 - progress).max(0.0)) as f32;

            local_tokens += match ctx.config.model {
                ModelType::Supervised => self.supervised(&line, lr),
                ModelType::Cbow => self.cbow(&line, lr),
                ModelType::SkipGram => self.skipgram(&line, lr),
            } as u64;

            if local_tokens > u64::from(ctx.config.lr_update_rate) {
                ctx.token_count.fetch_add(local_tokens, Ordering::Relaxed);
                local_tokens = 0;

                if self.tid == 0 {
                    debug!(
                        "Progress: {:5.1}%, lr: {:.5}, loss: {:.5}",
                        100.0 * progress,
                        lr,
                        self.loss / self.nexamples.max(1) as f64
                    );
                }
            }
        }

        Ok(())
    }

    fn supervised(&mut self, line: &str, lr: f32) -> usize {
        let dict = self.ctx.dict;
        let (features, labels) = dict.supervised_line_with_eos(line);

        if !features.is_empty() && !labels.is_empty() {
            let target = labels[self.rng.gen_range(0..labels.len())];
            self.update(&features, target, lr);
        }

        line.split_whitespace().count() + 1
    }

    fn skipgram(&mut self, line: &str, lr: f32) -> usize {
        let dict = self.ctx.dict;
        let ws = self.ctx.config.ws as isize;
        let (words, ntokens) = dict.unsupervised_line(line, &mut self.rng);

        for (position, &word) in words.iter().enumerate() {
            let boundary = self.rng.gen_range(1..=ws);
            let subwords = dict.subwords(word);

            for offset in -boundary..=boundary {
                let context = position as isize + offset;
                if offset != 0 && context >= 0 && (context as usize) < words.len() {
                    self.update(subwords, words[context as usize], lr);
                }
            }
        }

        ntokens
    }

    fn cbow(&mut self, line: &str, lr: f32) -> usize {
        let dict = self.ctx.dict;
        let ws = self.ctx.config.ws as isize;
        let (words, ntokens) = dict.unsupervised_line(line, &mut self.rng);

        let mut bow = Vec::new();
        for (position, &word) in words.iter().enumerate() {
            let boundary = self.rng.gen_range(1..=ws);

            bow.clear();
            for offset in -boundary..=boundary {
                let context = position as isize + offset;
                if offset != 0 && context >= 0 && (context as usize) < words.len() {
                    bow.extend_from_slice(dict.subwords(words[context as usize]));
                }
            }

            self.update(&bow, word, lr);
        }

        ntokens
    }

    /// One SGD step: the hidden state is the mean of the input rows,
    /// the loss gradient with respect to the hidden state is added
    /// back to each input row.
    fn update(&mut self, features: &[usize], target: usize, lr: f32) {
        if features.is_empty() {
            return;
        }

        let ctx = self.ctx;

        self.hidden.fill(0.0);
        for &id in features {
            ctx.input.add_row_to(&mut self.hidden, id, 1.0);
        }
        self.hidden /= features.len() as f32;

        self.grad.fill(0.0);
        let loss = match ctx.layer {
            OutputLayer::NegativeSampling { negatives } => {
                self.negative_sampling(negatives, target, lr)
            }
            OutputLayer::HierarchicalSoftmax { tree } => {
                let mut loss = 0f32;
                for (&node, &right) in tree.path(target).iter().zip(tree.code(target).iter()) {
                    loss += self.binary_logistic(node, right, lr);
                }
                loss
            }
            OutputLayer::Softmax => self.softmax(target, lr),
        };
        self.loss += f64::from(loss);
        self.nexamples += 1;

        if ctx.config.model == ModelType::Supervised {
            self.grad /= features.len() as f32;
        }
        for &id in features {
            ctx.input.add_to_row(id, self.grad.view(), 1.0);
        }
    }

    fn binary_logistic(&mut self, target_row: usize, label: bool, lr: f32) -> f32 {
        let ctx = self.ctx;

        let score = sigmoid(ctx.output.dot_row(self.hidden.view(), target_row));
        let alpha = lr * (label as u8 as f32 - score);

        ctx.output.add_row_to(&mut self.grad, target_row, alpha);
        ctx.output.add_to_row(target_row, self.hidden.view(), alpha);

        if label {
            -score.ln()
        } else {
            -(1.0 - score).ln()
        }
    }

    fn negative_sampling(&mut self, negatives: &[u32], target: usize, lr: f32) -> f32 {
        let mut loss = self.binary_logistic(target, true, lr);

        for _ in 0..self.ctx.config.neg {
            let negative = self.sample_negative(negatives, target);
            loss += self.binary_logistic(negative, false, lr);
        }

        loss
    }

    fn sample_negative(&mut self, negatives: &[u32], target: usize) -> usize {
        loop {
            let negative = negatives[self.rng.gen_range(0..negatives.len())] as usize;
            if negative != target {
                return negative;
            }
        }
    }

    fn softmax(&mut self, target: usize, lr: f32) -> f32 {
        let ctx = self.ctx;
        let output_rows = ctx.output.rows();

        self.scores.clear();
        let hidden = self.hidden.view();
        self.scores
            .extend((0..output_rows).map(|idx| ctx.output.dot_row(hidden, idx)));

        let max = self.scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut z = 0f32;
        for score in self.scores.iter_mut() {
            *score = (*score - max).exp();
            z += *score;
        }

        let mut loss = 0f32;
        for idx in 0..output_rows {
            let probability = self.scores[idx] / z;
            let label = (idx == target) as u8 as f32;
            let alpha = lr * (label - probability);

            ctx.output.add_row_to(&mut self.grad, idx, alpha);
            ctx.output.add_to_row(idx, self.hidden.view(), alpha);

            if idx == target {
                loss = -probability.ln();
            }
        }

        loss
    }
}

/// Read a word2vec-style text file with pretrained vectors.
///
/// The first line carries the shape of the data, every following line
/// a word and its vector components. The words are added to the
/// dictionary.
fn read_pretrained(
    path: &Path,
    config: &Config,
    dict: &mut Dictionary,
) -> Result<(Vec<String>, Array2<f32>)> {
    let file = File::open(path).map_err(|e| {
        Error::read_error(format!("{} cannot be opened for loading", path.display()), e)
    })?;
    let mut reader = BufReader::new(file);

    let n_words = read_number(&mut reader, b' ')?;
    let dims = read_number(&mut reader, b'\n')?;
    if dims != config.dim as usize {
        return Err(Error::Format(format!(
            "Dimension of pretrained vectors ({}) does not match dimension ({})",
            dims, config.dim
        )));
    }

    let mut words = Vec::with_capacity(n_words);
    let mut data = Vec::with_capacity(n_words * dims);
    for line in reader.lines() {
        let line = line.map_err(|e| Error::read_error("Cannot read pretrained vectors", e))?;
        let mut parts = line
            .split(|c: char| c.is_ascii_whitespace())
            .filter(|part| !part.is_empty());

        let word = match parts.next() {
            Some(word) => word,
            None => continue,
        };
        words.push(word.to_owned());

        for part in parts {
            data.push(part.parse::<f32>().map_err(|e| {
                Error::Format(format!("Cannot parse vector component '{}': {}", part, e))
            })?);
        }
    }

    if words.len() != n_words {
        return Err(Error::Format(format!(
            "Incorrect vocabulary size, expected: {}, got: {}",
            n_words,
            words.len()
        )));
    }
    if data.len() != n_words * dims {
        return Err(Error::Format(format!(
            "Incorrect embedding dimensionality, expected: {}, got: {}",
            dims,
            data.len() / n_words.max(1),
        )));
    }

    for word in &words {
        dict.add(word);
    }

    let matrix = Array2::from_shape_vec((n_words, dims), data)?;

    Ok((words, matrix))
}
