//! Token dictionary with subword units.

use std::io::{BufRead, Read, Write};
use std::iter;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fnv::FnvHashMap;
use rand::Rng;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::subword::{fasttext_hash, SubwordIndices};
use crate::util::read_string;

/// End-of-sentence marker token.
pub const EOS: &str = "</s>";

const BOW: char = '<';
const EOW: char = '>';

/// Maximum number of tokens consumed per line during unsupervised
/// training.
const MAX_LINE_SIZE: usize = 1024;

const WORD_NGRAM_MULTIPLIER: u64 = 116_049_371;

/// Vocabulary entry type.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryType {
    Word,
    Label,
}

impl EntryType {
    fn read<R>(reader: &mut R) -> Result<EntryType>
    where
        R: Read,
    {
        let entry_type = reader
            .read_u8()
            .map_err(|e| Error::read_error("Cannot read entry type", e))?;

        match entry_type {
            0 => Ok(EntryType::Word),
            1 => Ok(EntryType::Label),
            t => Err(Error::Format(format!("Unknown entry type: {}", t))),
        }
    }

    fn write<W>(self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        let code = match self {
            EntryType::Word => 0,
            EntryType::Label => 1,
        };

        writer
            .write_u8(code)
            .map_err(|e| Error::write_error("Cannot write entry type", e))
    }
}

#[derive(Clone, Debug)]
struct Entry {
    word: String,
    count: u64,
    entry_type: EntryType,
    subwords: Vec<usize>,
}

/// Vocabulary over the words and labels of a corpus.
///
/// Words are assigned the indices *[0, nwords)* in decreasing order of
/// frequency, labels the indices *[nwords, nwords + nlabels)*. Subword
/// and token n-gram features are hashed into `bucket` buckets starting
/// at index `nwords`.
#[derive(Clone, Debug)]
pub struct Dictionary {
    entries: Vec<Entry>,
    index: FnvHashMap<String, usize>,
    nwords: usize,
    nlabels: usize,
    ntokens: u64,
    pdiscard: Vec<f32>,
    min_n: u32,
    max_n: u32,
    bucket: usize,
    label_prefix: String,
    word_ngrams: u32,
}

impl Dictionary {
    /// Construct an empty dictionary.
    pub fn new(config: &Config) -> Self {
        Dictionary {
            entries: Vec::new(),
            index: FnvHashMap::default(),
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
            pdiscard: Vec::new(),
            min_n: config.min_n,
            max_n: config.max_n,
            bucket: config.bucket as usize,
            label_prefix: config.label_prefix.clone(),
            word_ngrams: config.word_ngrams,
        }
    }

    /// Construct a dictionary from a corpus.
    ///
    /// Reads the corpus, prunes infrequent entries, and prepares the
    /// subword and discard tables.
    pub fn from_corpus<R>(reader: &mut R, config: &Config) -> Result<Self>
    where
        R: BufRead,
    {
        let mut dict = Dictionary::new(config);
        dict.read_corpus(reader)?;
        dict.threshold(
            u64::from(config.min_count),
            u64::from(config.min_count_label),
        );
        dict.init_tables(config.sampling_threshold);
        Ok(dict)
    }

    /// Count a token.
    pub fn add(&mut self, token: &str) {
        self.ntokens += 1;

        match self.index.get(token) {
            Some(&id) => self.entries[id].count += 1,
            None => {
                let entry_type = self.token_type(token);
                self.index.insert(token.to_owned(), self.entries.len());
                self.entries.push(Entry {
                    word: token.to_owned(),
                    count: 1,
                    entry_type,
                    subwords: Vec::new(),
                });

                match entry_type {
                    EntryType::Word => self.nwords += 1,
                    EntryType::Label => self.nlabels += 1,
                }
            }
        }
    }

    /// Count all tokens of a corpus.
    ///
    /// Every line is terminated by the end-of-sentence marker.
    pub fn read_corpus<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: BufRead,
    {
        for line in reader.lines() {
            let line =
                line.map_err(|e| Error::read_error("Cannot read line from training data", e))?;

            for token in line.split_whitespace() {
                self.add(token);
            }

            self.add(EOS);
        }

        Ok(())
    }

    /// Prune infrequent entries.
    ///
    /// Removes words occurring fewer than `min_count` times and labels
    /// occurring fewer than `min_count_label` times. Words are ordered
    /// before labels, both in decreasing order of frequency.
    pub fn threshold(&mut self, min_count: u64, min_count_label: u64) {
        let mut entries = std::mem::take(&mut self.entries);

        entries.retain(|entry| match entry.entry_type {
            EntryType::Word => entry.count >= min_count,
            EntryType::Label => entry.count >= min_count_label,
        });
        entries.sort_by(|e1, e2| {
            (e1.entry_type == EntryType::Label, e2.count)
                .cmp(&(e2.entry_type == EntryType::Label, e1.count))
        });

        self.index = entries
            .iter()
            .enumerate()
            .map(|(id, entry)| (entry.word.clone(), id))
            .collect();
        self.nwords = entries
            .iter()
            .filter(|entry| entry.entry_type == EntryType::Word)
            .count();
        self.nlabels = entries.len() - self.nwords;
        self.entries = entries;
    }

    /// Prepare the subword and discard tables.
    ///
    /// Must be called after the final `threshold`, since subword
    /// indices start at the number of in-vocabulary words.
    pub fn init_tables(&mut self, sampling_threshold: f64) {
        let nwords = self.nwords;
        let subwords_enabled = self.subwords_enabled();
        let (min_n, max_n, bucket) = (self.min_n as usize, self.max_n as usize, self.bucket);

        for (id, entry) in self.entries.iter_mut().enumerate().take(nwords) {
            entry.subwords.clear();
            entry.subwords.push(id);

            if entry.word != EOS && subwords_enabled {
                let bracketed = bracket(&entry.word);
                entry.subwords.extend(
                    bracketed
                        .subword_indices(min_n, max_n, bucket)
                        .into_iter()
                        .map(|idx| nwords + idx as usize),
                );
            }
        }

        self.pdiscard = self
            .entries
            .iter()
            .take(nwords)
            .map(|entry| {
                let f = entry.count as f64 / self.ntokens as f64;
                ((sampling_threshold / f).sqrt() + sampling_threshold / f) as f32
            })
            .collect();
    }

    fn token_type(&self, token: &str) -> EntryType {
        if token.starts_with(&self.label_prefix) {
            EntryType::Label
        } else {
            EntryType::Word
        }
    }

    fn subwords_enabled(&self) -> bool {
        self.max_n > 0 && self.min_n <= self.max_n && self.bucket > 0
    }

    /// Subword indices of an out-of-vocabulary token.
    fn oov_indices(&self, token: &str) -> Vec<usize> {
        if token == EOS || !self.subwords_enabled() {
            return Vec::new();
        }

        bracket(token)
            .subword_indices(self.min_n as usize, self.max_n as usize, self.bucket)
            .into_iter()
            .map(|idx| self.nwords + idx as usize)
            .collect()
    }

    /// Get the number of distinct entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the number of in-vocabulary words.
    pub fn nwords(&self) -> usize {
        self.nwords
    }

    /// Get the number of labels.
    pub fn nlabels(&self) -> usize {
        self.nlabels
    }

    /// Get the number of tokens counted from the corpus.
    pub fn ntokens(&self) -> u64 {
        self.ntokens
    }

    /// Get the index of a token.
    pub fn get_id(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    /// Get the word at the given index.
    pub fn word(&self, id: usize) -> &str {
        &self.entries[id].word
    }

    /// Iterate over the in-vocabulary words.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.entries[..self.nwords]
            .iter()
            .map(|entry| entry.word.as_str())
    }

    /// Get the label at the given label index.
    pub fn label(&self, label_id: usize) -> &str {
        &self.entries[self.nwords + label_id].word
    }

    /// Iterate over the labels.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries[self.nwords..]
            .iter()
            .map(|entry| entry.word.as_str())
    }

    /// Get the frequencies of all entries of the given type, in index
    /// order.
    pub fn counts(&self, entry_type: EntryType) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|entry| entry.entry_type == entry_type)
            .map(|entry| entry.count)
            .collect()
    }

    /// Get the subword indices of an in-vocabulary word.
    pub fn subwords(&self, id: usize) -> &[usize] {
        &self.entries[id].subwords
    }

    /// Get the subword indices of a word, known or unknown.
    ///
    /// For in-vocabulary words, the stored indices are returned. For
    /// out-of-vocabulary words, indices are computed from the word's
    /// character n-grams, which may be empty when subword units are
    /// disabled.
    pub fn word_indices(&self, word: &str) -> Vec<usize> {
        match self.get_id(word) {
            Some(id) if self.entries[id].entry_type == EntryType::Word => {
                self.entries[id].subwords.clone()
            }
            _ => self.oov_indices(word),
        }
    }

    /// Should the given word be discarded during subsampling?
    pub(crate) fn discard(&self, id: usize, uniform: f32) -> bool {
        uniform > self.pdiscard[id]
    }

    /// Convert a line of text into classification features and labels.
    ///
    /// Features are the subword indices of the line's words plus the
    /// hashed token n-gram features. Unknown words contribute their
    /// character n-grams, unknown labels are skipped.
    pub fn supervised_line(&self, line: &str) -> (Vec<usize>, Vec<usize>) {
        self.supervised_features(line.split_whitespace())
    }

    /// `supervised_line` over a corpus line, with the end-of-sentence
    /// marker appended.
    pub(crate) fn supervised_line_with_eos(&self, line: &str) -> (Vec<usize>, Vec<usize>) {
        self.supervised_features(line.split_whitespace().chain(iter::once(EOS)))
    }

    fn supervised_features<'a, I>(&self, tokens: I) -> (Vec<usize>, Vec<usize>)
    where
        I: Iterator<Item = &'a str>,
    {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        let mut token_hashes = Vec::new();

        for token in tokens {
            match self.get_id(token) {
                Some(id) => match self.entries[id].entry_type {
                    EntryType::Word => {
                        features.extend_from_slice(&self.entries[id].subwords);
                        token_hashes.push(fasttext_hash(token));
                    }
                    EntryType::Label => labels.push(id - self.nwords),
                },
                None => {
                    if self.token_type(token) == EntryType::Label {
                        continue;
                    }

                    features.extend(self.oov_indices(token));
                    token_hashes.push(fasttext_hash(token));
                }
            }
        }

        self.add_word_ngrams(&mut features, &token_hashes);

        (features, labels)
    }

    /// Hash token n-grams into the bucket space.
    fn add_word_ngrams(&self, features: &mut Vec<usize>, token_hashes: &[u32]) {
        if self.bucket == 0 {
            return;
        }

        let n = self.word_ngrams as usize;

        for i in 0..token_hashes.len() {
            let mut h = u64::from(token_hashes[i]);
            for &token_hash in token_hashes
                .iter()
                .take(std::cmp::min(token_hashes.len(), i + n))
                .skip(i + 1)
            {
                h = h
                    .wrapping_mul(WORD_NGRAM_MULTIPLIER)
                    .wrapping_add(u64::from(token_hash));
                features.push(self.nwords + (h % self.bucket as u64) as usize);
            }
        }
    }

    /// Convert a line of text into subsampled word indices.
    ///
    /// Returns the word indices and the number of in-vocabulary tokens
    /// that were consumed.
    pub fn unsupervised_line(
        &self,
        line: &str,
        rng: &mut impl Rng,
    ) -> (Vec<usize>, usize) {
        let mut words = Vec::new();
        let mut ntokens = 0;

        for token in line.split_whitespace().chain(iter::once(EOS)) {
            if let Some(id) = self.get_id(token) {
                ntokens += 1;

                if self.entries[id].entry_type == EntryType::Word
                    && !self.discard(id, rng.gen::<f32>())
                {
                    words.push(id);
                }

                if ntokens > MAX_LINE_SIZE {
                    break;
                }
            }
        }

        (words, ntokens)
    }

    /// Read the dictionary block of a model file.
    pub(crate) fn read<R>(reader: &mut R, config: &Config) -> Result<Dictionary>
    where
        R: BufRead,
    {
        let size = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read vocabulary size", e))?
            as usize;
        let nwords = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read number of words", e))?
            as usize;
        let nlabels = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read number of labels", e))?
            as usize;
        let ntokens = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read number of tokens", e))?;

        let prune_idx_size = reader
            .read_i64::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read pruned vocabulary size", e))?;
        if prune_idx_size > 0 {
            return Err(Error::Format(
                "Pruned vocabularies are not supported".into(),
            ));
        }

        let mut dict = Dictionary::new(config);
        dict.ntokens = ntokens;

        for id in 0..size {
            let word = read_string(reader, 0, false)?;
            let count = reader
                .read_u64::<LittleEndian>()
                .map_err(|e| Error::read_error("Cannot read word frequency", e))?;
            let entry_type = EntryType::read(reader)?;

            match entry_type {
                EntryType::Word => dict.nwords += 1,
                EntryType::Label => dict.nlabels += 1,
            }

            dict.index.insert(word.clone(), id);
            dict.entries.push(Entry {
                word,
                count,
                entry_type,
                subwords: Vec::new(),
            });
        }

        if dict.nwords != nwords || dict.nlabels != nlabels {
            return Err(Error::Format(format!(
                "Vocabulary sizes do not match entry types, expected: {} words and {} labels, got: {} and {}",
                nwords, nlabels, dict.nwords, dict.nlabels
            )));
        }

        dict.init_tables(config.sampling_threshold);

        Ok(dict)
    }

    /// Write the dictionary block of a model file.
    pub(crate) fn write<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        writer
            .write_u32::<LittleEndian>(self.entries.len() as u32)
            .map_err(|e| Error::write_error("Cannot write vocabulary size", e))?;
        writer
            .write_u32::<LittleEndian>(self.nwords as u32)
            .map_err(|e| Error::write_error("Cannot write number of words", e))?;
        writer
            .write_u32::<LittleEndian>(self.nlabels as u32)
            .map_err(|e| Error::write_error("Cannot write number of labels", e))?;
        writer
            .write_u64::<LittleEndian>(self.ntokens)
            .map_err(|e| Error::write_error("Cannot write number of tokens", e))?;
        writer
            .write_i64::<LittleEndian>(-1)
            .map_err(|e| Error::write_error("Cannot write pruned vocabulary size", e))?;

        for entry in &self.entries {
            writer
                .write_all(entry.word.as_bytes())
                .map_err(|e| Error::write_error("Cannot write word", e))?;
            writer
                .write_u8(0)
                .map_err(|e| Error::write_error("Cannot write word terminator", e))?;
            writer
                .write_u64::<LittleEndian>(entry.count)
                .map_err(|e| Error::write_error("Cannot write word frequency", e))?;
            entry.entry_type.write(writer)?;
        }

        Ok(())
    }
}

fn bracket(word: &str) -> String {
    let mut bracketed = String::with_capacity(word.len() + 2);
    bracketed.push(BOW);
    bracketed.push_str(word);
    bracketed.push(EOW);
    bracketed
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::{Dictionary, EntryType, EOS};
    use crate::config::Config;

    fn word_config() -> Config {
        Config {
            min_count: 1,
            bucket: 10_000,
            ..Default::default()
        }
    }

    fn word_dict() -> Dictionary {
        let corpus = "the quick brown fox jumps over the lazy dog\nthe cat sat on the mat\n";
        Dictionary::from_corpus(&mut Cursor::new(corpus), &word_config()).unwrap()
    }

    fn label_dict() -> Dictionary {
        let corpus = "__label__greeting hello hi there\n\
                      __label__greeting hello again\n\
                      __label__farewell bye now\n";
        Dictionary::from_corpus(&mut Cursor::new(corpus), &Config::supervised()).unwrap()
    }

    #[test]
    fn words_are_ordered_by_descending_frequency() {
        let dict = word_dict();

        assert_eq!(dict.word(0), "the");
        assert_eq!(dict.word(1), EOS);
        assert_eq!(dict.nlabels(), 0);
        // 13 distinct words plus the end-of-sentence marker.
        assert_eq!(dict.nwords(), 14);
        assert_eq!(dict.ntokens(), 17);
    }

    #[test]
    fn threshold_prunes_infrequent_words() {
        let corpus = "the quick brown fox jumps over the lazy dog\nthe cat sat on the mat\n";
        let config = Config {
            min_count: 2,
            ..word_config()
        };
        let dict = Dictionary::from_corpus(&mut Cursor::new(corpus), &config).unwrap();

        // Only "the" (4) and the end-of-sentence marker (2) survive.
        assert_eq!(dict.nwords(), 2);
        assert_eq!(dict.get_id("quick"), None);
    }

    #[test]
    fn labels_sort_after_words() {
        let dict = label_dict();

        assert_eq!(dict.nlabels(), 2);
        assert_eq!(dict.label(0), "__label__greeting");
        assert_eq!(dict.label(1), "__label__farewell");
        assert!(dict.get_id("__label__greeting").unwrap() >= dict.nwords());
        assert_eq!(dict.labels().collect::<Vec<_>>().len(), 2);
    }

    #[test]
    fn subwords_contain_the_word_itself() {
        let dict = word_dict();
        let id = dict.get_id("quick").unwrap();

        let subwords = dict.subwords(id);
        assert_eq!(subwords[0], id);
        // "<quick>" has 3..=6-grams.
        assert!(subwords.len() > 1);
        assert!(subwords[1..].iter().all(|&idx| idx >= dict.nwords()));
    }

    #[test]
    fn supervised_line_extracts_labels_and_features() {
        let dict = label_dict();

        let (features, labels) = dict.supervised_line("hello hi there");
        assert_eq!(features.len(), 3);
        assert_eq!(labels, Vec::<usize>::new());

        let (_, labels) = dict.supervised_line("__label__farewell bye");
        assert_eq!(labels, vec![1]);
    }

    #[test]
    fn supervised_line_on_unknown_words_is_empty() {
        let dict = label_dict();

        // Subword units are disabled for classification models, so
        // unknown words contribute no features.
        let (features, labels) = dict.supervised_line("wtf");
        assert_eq!(features, Vec::<usize>::new());
        assert_eq!(labels, Vec::<usize>::new());
    }

    #[test]
    fn word_ngrams_add_features_per_token_pair() {
        let corpus = "__label__greeting hello hi there\n";
        let config = Config {
            word_ngrams: 2,
            ..Config::supervised()
        };
        let dict = Dictionary::from_corpus(&mut Cursor::new(corpus), &config).unwrap();

        let (features, _) = dict.supervised_line("hello hi there");
        // Three unigrams plus two bigram features.
        assert_eq!(features.len(), 5);
        assert!(features[3..].iter().all(|&idx| idx >= dict.nwords()));
    }

    #[test]
    fn unsupervised_line_keeps_known_words() {
        let corpus = "the quick brown fox\nthe lazy dog\n";
        let config = Config {
            min_count: 1,
            // Disable subsampling for a deterministic test.
            sampling_threshold: 1.0,
            ..Default::default()
        };
        let dict = Dictionary::from_corpus(&mut Cursor::new(corpus), &config).unwrap();

        let mut rng = XorShiftRng::seed_from_u64(42);
        let (words, ntokens) = dict.unsupervised_line("the quick fox wtf", &mut rng);

        // "wtf" is unknown and does not count; the end-of-sentence
        // marker counts as an ordinary word.
        assert_eq!(ntokens, 4);
        assert_eq!(
            words,
            vec![
                dict.get_id("the").unwrap(),
                dict.get_id("quick").unwrap(),
                dict.get_id("fox").unwrap(),
                dict.get_id(EOS).unwrap(),
            ]
        );
    }

    #[test]
    fn dictionary_write_read_roundtrip() {
        let check_dict = label_dict();

        let mut cursor = Cursor::new(Vec::new());
        check_dict.write(&mut cursor).unwrap();
        cursor.set_position(0);
        let dict = Dictionary::read(&mut cursor, &Config::supervised()).unwrap();

        assert_eq!(dict.nwords(), check_dict.nwords());
        assert_eq!(dict.nlabels(), check_dict.nlabels());
        assert_eq!(dict.ntokens(), check_dict.ntokens());
        assert_eq!(
            dict.words().collect::<Vec<_>>(),
            check_dict.words().collect::<Vec<_>>()
        );
        assert_eq!(
            dict.counts(EntryType::Word),
            check_dict.counts(EntryType::Word)
        );
    }
}
