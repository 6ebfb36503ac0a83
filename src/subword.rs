//! N-gram extraction and subword hashing.

use std::cmp;

/// Iterator over character n-grams in a string.
///
/// N-grams provides an iterator over the n-grams in a string between a
/// minimum and maximum length. N-grams are produced on character
/// boundaries, the hash of an n-gram covers its UTF-8 bytes.
///
/// **Warning:** no guarantee is provided with regard to the iteration
/// order. The iterator only guarantees that all n-grams are produced.
pub struct NGrams<'a> {
    word: &'a str,
    offsets: Vec<usize>,
    start: usize,
    len: usize,
    min_n: usize,
    max_n: usize,
}

impl<'a> NGrams<'a> {
    /// Create a new n-gram iterator.
    ///
    /// The iterator will create n-grams of length *[min_n, max_n]*.
    pub fn new(word: &'a str, min_n: usize, max_n: usize) -> Self {
        assert!(min_n != 0, "The minimum n-gram length cannot be zero.");
        assert!(
            min_n <= max_n,
            "The maximum length should be equal to or greater than the minimum length."
        );

        let mut offsets: Vec<usize> = word.char_indices().map(|(offset, _)| offset).collect();
        offsets.push(word.len());

        let n_chars = offsets.len() - 1;

        NGrams {
            word,
            offsets,
            start: 0,
            len: cmp::min(max_n, n_chars),
            min_n,
            max_n,
        }
    }

    fn n_chars(&self) -> usize {
        self.offsets.len() - 1
    }
}

impl<'a> Iterator for NGrams<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.len < self.min_n {
            self.start += 1;

            if self.start >= self.n_chars() || self.n_chars() - self.start < self.min_n {
                return None;
            }

            self.len = cmp::min(self.max_n, self.n_chars() - self.start);
        }

        let ngram = &self.word[self.offsets[self.start]..self.offsets[self.start + self.len]];

        self.len -= 1;

        Some(ngram)
    }
}

/// fastText FNV-1a implementation.
///
/// The fastText implementation of FNV-1a has a quirk caused by sign
/// extension on compilers where char is signed:
///
/// https://github.com/facebookresearch/fastText/issues/539
///
/// This implementation 'emulates' the quirk for compatibility with
/// pretrained fastText models.
pub(crate) fn fasttext_hash(ngram: &str) -> u32 {
    let mut h = 2_166_136_261;

    for byte in ngram.bytes() {
        // Cast bytes to i8, so that sign-extension is applied when
        // widening to u32.
        h ^= (byte as i8) as u32;
        h = h.wrapping_mul(16_777_619);
    }

    h
}

/// Extension trait for computing subword indices.
///
/// Subword indexing assigns an identifier to each subword (n-gram) of a
/// string. A subword is indexed by computing its hash and then mapping
/// the hash to a bucket.
///
/// Since a non-perfect hash function is used, multiple subwords can
/// map to the same index.
pub trait SubwordIndices {
    /// Return the subword indices of the subwords of a string.
    ///
    /// The n-grams that are used are of length *[min_n, max_n]*, these
    /// are mapped to indices into `buckets` buckets.
    fn subword_indices(&self, min_n: usize, max_n: usize, buckets: usize) -> Vec<u64>;

    /// Return the subword n-grams of a string with their indices.
    fn ngrams_indices(&self, min_n: usize, max_n: usize, buckets: usize) -> Vec<(String, u64)>;
}

impl SubwordIndices for str {
    fn subword_indices(&self, min_n: usize, max_n: usize, buckets: usize) -> Vec<u64> {
        let buckets = check_buckets(buckets);

        NGrams::new(self, min_n, max_n)
            .map(|ngram| u64::from(fasttext_hash(ngram) % buckets))
            .collect()
    }

    fn ngrams_indices(&self, min_n: usize, max_n: usize, buckets: usize) -> Vec<(String, u64)> {
        let buckets = check_buckets(buckets);

        NGrams::new(self, min_n, max_n)
            .map(|ngram| {
                (
                    ngram.to_owned(),
                    u64::from(fasttext_hash(ngram) % buckets),
                )
            })
            .collect()
    }
}

fn check_buckets(buckets: usize) -> u32 {
    // fastText is inconsistent with types when it comes to buckets,
    // the data types are:
    //
    // - buckets: int
    // - hash: uint32_t
    // - bucket: int32_t
    //
    // We will make the following assumptions: (1) the range of
    // buckets is determined by int32_t; (2) the maximum number of
    // buckets is the maximum value of int32_t.
    assert!(
        buckets <= i32::max_value() as usize,
        "The largest possible number of buckets is: {}",
        i32::max_value()
    );

    buckets as u32
}
