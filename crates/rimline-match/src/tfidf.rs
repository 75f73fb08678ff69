//! Character n-gram TF-IDF index for fuzzy name matching
//!
//! Names are lower-cased, stripped of punctuation and split into overlapping
//! character trigrams (spaces included). The vocabulary and IDF weights come
//! from the candidate list only; query trigrams outside it are ignored.
//! Vectors are L2-normalized, so cosine similarity is a sparse dot product
//! accumulated through an inverted index.

use rustc_hash::FxHashMap;

/// n in character n-grams
pub const GRAM: usize = 3;

/// Lower-case, keep alphanumerics, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character trigrams of the normalized name. Names shorter than one
/// trigram yield themselves as the only gram.
pub fn grams(name: &str) -> Vec<String> {
    let chars: Vec<char> = normalize_name(name).chars().collect();
    match chars.len() {
        0 => Vec::new(),
        n if n < GRAM => vec![chars.iter().collect()],
        _ => chars.windows(GRAM).map(|w| w.iter().collect()).collect(),
    }
}

type SparseVec = Vec<(usize, f64)>;

fn l2_normalize(mut v: SparseVec) -> SparseVec {
    let norm = v.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, w) in &mut v {
            *w /= norm;
        }
    } else {
        v.clear();
    }
    v
}

/// TF-IDF vectors of a fixed candidate name list.
#[derive(Debug, Default)]
pub struct NameIndex {
    vocab: FxHashMap<String, usize>,
    idf: Vec<f64>,
    /// term -> (candidate, weight)
    postings: Vec<Vec<(usize, f64)>>,
    len: usize,
}

impl NameIndex {
    /// Fit on `names`. Smoothed IDF: `ln((1 + n) / (1 + df)) + 1`.
    pub fn fit<S: AsRef<str>>(names: &[S]) -> Self {
        let docs: Vec<Vec<String>> = names.iter().map(|n| grams(n.as_ref())).collect();

        let mut vocab: FxHashMap<String, usize> = FxHashMap::default();
        let mut df: Vec<usize> = Vec::new();
        for doc in &docs {
            let mut seen: Vec<usize> = Vec::with_capacity(doc.len());
            for gram in doc {
                let next = vocab.len();
                let term = *vocab.entry(gram.clone()).or_insert(next);
                if term == df.len() {
                    df.push(0);
                }
                if !seen.contains(&term) {
                    seen.push(term);
                    df[term] += 1;
                }
            }
        }

        let n = docs.len() as f64;
        let idf: Vec<f64> = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let mut index = Self {
            vocab,
            idf,
            postings: Vec::new(),
            len: docs.len(),
        };
        index.postings = vec![Vec::new(); index.idf.len()];
        for (doc_id, doc) in docs.iter().enumerate() {
            for (term, weight) in index.vectorize_grams(doc) {
                index.postings[term].push((doc_id, weight));
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn vectorize_grams(&self, grams: &[String]) -> SparseVec {
        let mut tf: FxHashMap<usize, f64> = FxHashMap::default();
        for gram in grams {
            if let Some(&term) = self.vocab.get(gram) {
                *tf.entry(term).or_insert(0.0) += 1.0;
            }
        }
        let mut v: SparseVec = tf
            .into_iter()
            .map(|(term, count)| (term, count * self.idf[term]))
            .collect();
        v.sort_unstable_by_key(|(term, _)| *term);
        l2_normalize(v)
    }

    /// Cosine similarity of `query` against every candidate, in fit order.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let mut scores = vec![0.0; self.len];
        for (term, qw) in self.vectorize_grams(&grams(query)) {
            for &(doc, dw) in &self.postings[term] {
                scores[doc] += qw * dw;
            }
        }
        scores
    }

    /// Highest-scoring candidate; the first one wins a tie. `None` when no
    /// candidate shares a trigram with the query.
    pub fn best(&self, query: &str) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, score) in self.scores(query).into_iter().enumerate() {
            if score > 0.0 && best.map_or(true, |(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize_name("  J. de  Vries "), "j de vries");
        assert_eq!(normalize_name("O'Brien-Smith"), "obriensmith");
        assert_eq!(normalize_name("Ünal, Ayşe"), "ünal ayşe");
    }

    #[test]
    fn trigrams_include_spaces() {
        assert_eq!(grams("Li Bo"), vec!["li ", "i b", " bo"]);
        assert_eq!(grams("Xu"), vec!["xu"]);
        assert!(grams(".,").is_empty());
    }

    #[test]
    fn initials_score_above_threshold() {
        let index = NameIndex::fit(&["J. de Vries", "Maria Jansen", "Pieter Bakker"]);
        let scores = index.scores("Jan de Vries");
        assert!(scores[0] > 0.87 && scores[0] < 0.88, "{scores:?}");
        assert!(scores[1] > 0.11 && scores[1] < 0.12, "{scores:?}");
        assert_eq!(scores[2], 0.0);

        let (best, score) = index.best("Jan de Vries").unwrap();
        assert_eq!(best, 0);
        assert!(score >= 0.8);
    }

    #[test]
    fn idf_depends_on_candidate_list() {
        let alone = NameIndex::fit(&["J. de Vries"]);
        let score = alone.scores("Jan de Vries")[0];
        assert!(score > 0.93 && score < 0.94, "{score}");
    }

    #[test]
    fn identical_names_score_one() {
        let index = NameIndex::fit(&["Xi Li", "Yu Li"]);
        let scores = index.scores("xi li");
        assert!((scores[0] - 1.0).abs() < 1e-9);
        assert!(scores[1] < 0.3);
    }

    #[test]
    fn ties_go_to_first_candidate() {
        let index = NameIndex::fit(&["P. Bakker", "Pieter Bakker", "Pieter Bakker"]);
        assert_eq!(index.best("Pieter Bakker").map(|(i, _)| i), Some(1));
    }

    #[test]
    fn no_overlap_no_best() {
        let index = NameIndex::fit(&["Maria Jansen"]);
        assert!(index.best("Zhou Qi").is_none());
        assert!(NameIndex::fit::<&str>(&[]).best("anyone").is_none());
    }
}
