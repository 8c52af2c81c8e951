/*!
 * Provider text search
 *
 * A TF-IDF index over each provider's specialties, conditions,
 * affiliations and hospital/system names, queried by cosine similarity.
 * The index sits behind [`VectorIndex`] so another similarity backend can
 * replace it. When no index is available, or the query has several terms,
 * search falls back to case-insensitive keyword matching.
 */

use std::collections::{HashMap, HashSet};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::TextSearchConfig;
use crate::data_types::{Npi, ProviderRecord};
use crate::{PlanError, Result};

lazy_static::lazy_static! {
    /// English stop words removed before vectorizing
    static ref STOP_WORDS: HashSet<&'static str> = [
        "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
        "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
        "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing", "down",
        "during", "each", "else", "etc", "few", "for", "from", "further", "had", "has", "have",
        "having", "he", "her", "here", "hers", "him", "his", "how", "i", "if", "in", "into",
        "is", "it", "its", "itself", "just", "me", "more", "most", "my", "no", "nor", "not",
        "of", "off", "on", "once", "only", "or", "other", "our", "ours", "out", "over", "own",
        "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
        "theirs", "them", "then", "there", "these", "they", "this", "those", "through", "to",
        "too", "under", "until", "up", "very", "was", "we", "were", "what", "when", "where",
        "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
    ].into_iter().collect();
}

/// Pluggable similarity index over `(id, text)` documents
pub trait VectorIndex: Send + Sync {
    /// Index a corpus, replacing any previous contents
    fn build(&mut self, corpus: &[(Npi, String)]) -> Result<()>;

    /// Ids ranked by descending similarity to `text`, at most `top_k`
    fn query(&self, text: &str, top_k: usize) -> Vec<(Npi, f64)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sparse vector as `(term index, weight)` pairs sorted by term index
type SparseVector = Vec<(usize, f64)>;

/// TF-IDF index with unigram and bigram features
pub struct TfIdfIndex {
    max_features: usize,
    min_similarity: f64,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    documents: Vec<(Npi, SparseVector)>,
}

impl TfIdfIndex {
    pub fn new(config: &TextSearchConfig) -> Self {
        Self {
            max_features: config.max_features,
            min_similarity: config.min_similarity,
            vocabulary: HashMap::new(),
            idf: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    fn vectorize(&self, text: &str) -> SparseVector {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for feature in features(text) {
            if let Some(&idx) = self.vocabulary.get(&feature) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }
        let mut vector: SparseVector = counts.into_iter()
            .map(|(idx, tf)| (idx, tf * self.idf[idx]))
            .collect();
        vector.sort_by_key(|(idx, _)| *idx);
        l2_normalize(&mut vector);
        vector
    }
}

impl VectorIndex for TfIdfIndex {
    fn build(&mut self, corpus: &[(Npi, String)]) -> Result<()> {
        if corpus.is_empty() {
            return Err(PlanError::Custom {
                message: "cannot build a text index over an empty corpus".to_string(),
                suggestion: None,
            });
        }

        let tokenized: Vec<Vec<String>> = corpus.iter().map(|(_, text)| features(text)).collect();

        // corpus frequency and document frequency per feature
        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &tokenized {
            let mut seen: HashSet<&str> = HashSet::new();
            for feature in doc {
                *term_freq.entry(feature.as_str()).or_insert(0) += 1;
                if seen.insert(feature.as_str()) {
                    *doc_freq.entry(feature.as_str()).or_insert(0) += 1;
                }
            }
        }
        if term_freq.is_empty() {
            return Err(PlanError::Custom {
                message: "text index vocabulary is empty".to_string(),
                suggestion: Some("Provider text fields contain only stop words or are blank".to_string()),
            });
        }

        let mut ranked: Vec<(&str, usize)> = term_freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(self.max_features);
        ranked.sort_by(|a, b| a.0.cmp(b.0));

        let n_docs = corpus.len() as f64;
        self.vocabulary = ranked.iter()
            .enumerate()
            .map(|(idx, (term, _))| (term.to_string(), idx))
            .collect();
        self.idf = ranked.iter()
            .map(|(term, _)| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        self.documents = corpus.iter()
            .map(|(npi, text)| (npi.clone(), self.vectorize(text)))
            .collect();

        debug!(
            documents = self.documents.len(),
            vocabulary = self.vocabulary.len(),
            "text index built"
        );
        Ok(())
    }

    fn query(&self, text: &str, top_k: usize) -> Vec<(Npi, f64)> {
        let query = self.vectorize(text);
        if query.is_empty() {
            return Vec::new();
        }

        let score = |(npi, doc): &(Npi, SparseVector)| {
            let similarity = dot(&query, doc);
            (similarity > self.min_similarity).then(|| (npi.clone(), similarity))
        };

        #[cfg(feature = "parallel")]
        let mut hits: Vec<(Npi, f64)> = self.documents.par_iter().filter_map(score).collect();

        #[cfg(not(feature = "parallel"))]
        let mut hits: Vec<(Npi, f64)> = self.documents.iter().filter_map(score).collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(top_k);
        hits
    }

    fn len(&self) -> usize {
        self.documents.len()
    }
}

/// Lower-cased word tokens (two or more characters) with stop words removed
fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(*t))
        .map(str::to_string)
        .collect()
}

/// Unigrams followed by bigrams of adjacent tokens
fn features(text: &str) -> Vec<String> {
    let tokens = tokens(text);
    let bigrams: Vec<String> = tokens.windows(2).map(|w| format!("{} {}", w[0], w[1])).collect();
    tokens.into_iter().chain(bigrams).collect()
}

fn l2_normalize(vector: &mut SparseVector) {
    let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, w) in vector.iter_mut() {
            *w /= norm;
        }
    }
}

fn dot(a: &SparseVector, b: &SparseVector) -> f64 {
    let (mut i, mut j, mut sum) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// Text blob indexed for a provider
pub fn provider_text(provider: &ProviderRecord) -> String {
    [
        &provider.specialties,
        &provider.conditions,
        &provider.affiliations,
        &provider.hospital_names,
        &provider.system_names,
    ]
    .iter()
    .flat_map(|list| list.iter())
    .map(|s| s.trim().to_lowercase())
    .filter(|s| !s.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

/// Semantic search with keyword fallback
pub struct TextSearch {
    index: Option<Box<dyn VectorIndex>>,
    top_k: usize,
}

impl TextSearch {
    /// Build the TF-IDF index over `providers`; a failed build leaves
    /// keyword search as the only strategy.
    pub fn build(providers: &[ProviderRecord], config: &TextSearchConfig) -> Self {
        if !config.enabled {
            return Self::keyword_only();
        }
        let corpus: Vec<(Npi, String)> = providers.iter()
            .map(|p| (p.npi.clone(), provider_text(p)))
            .collect();
        let mut index = TfIdfIndex::new(config);
        match index.build(&corpus) {
            Ok(()) => Self::with_index(Box::new(index), config.top_k),
            Err(e) => {
                warn!(error = %e, "text index unavailable; using keyword search");
                Self::keyword_only()
            }
        }
    }

    /// Use a caller-supplied index
    pub fn with_index(index: Box<dyn VectorIndex>, top_k: usize) -> Self {
        Self { index: Some(index), top_k }
    }

    pub fn keyword_only() -> Self {
        Self { index: None, top_k: 0 }
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Providers of `subset` matching `terms`.
    ///
    /// A single term goes through the index; hits come back in descending
    /// similarity. Several terms, a missing index, or a term with no
    /// semantic hit use keyword search, which keeps subset order.
    pub fn search<'a>(&self, subset: &[&'a ProviderRecord], terms: &[String]) -> Vec<&'a ProviderRecord> {
        if let (Some(index), [term]) = (&self.index, terms) {
            let hits = index.query(term, self.top_k);
            if !hits.is_empty() {
                let by_npi: HashMap<&Npi, &'a ProviderRecord> = subset.iter().map(|p| (&p.npi, *p)).collect();
                return hits.iter().filter_map(|(npi, _)| by_npi.get(npi).copied()).collect();
            }
            debug!(term = %term, "no semantic hits; falling back to keyword search");
        }
        keyword_search(subset, terms)
    }
}

/// Case-insensitive keyword search: a provider matches when any indexed
/// field contains any term.
pub fn keyword_search<'a>(subset: &[&'a ProviderRecord], terms: &[String]) -> Vec<&'a ProviderRecord> {
    let patterns: Vec<Regex> = terms.iter()
        .filter(|t| !t.trim().is_empty())
        .filter_map(|t| RegexBuilder::new(&regex::escape(t.trim())).case_insensitive(true).build().ok())
        .collect();
    if patterns.is_empty() {
        return Vec::new();
    }

    subset.iter()
        .copied()
        .filter(|p| {
            [&p.specialties, &p.conditions, &p.affiliations, &p.hospital_names, &p.system_names]
                .iter()
                .flat_map(|list| list.iter())
                .any(|value| patterns.iter().any(|re| re.is_match(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(npi: &str, specialties: &[&str], conditions: &[&str]) -> ProviderRecord {
        let mut p = ProviderRecord::new(Npi::new(npi).unwrap(), format!("Provider {npi}"));
        p.specialties = specialties.iter().map(|s| s.to_string()).collect();
        p.conditions = conditions.iter().map(|s| s.to_string()).collect();
        p
    }

    fn corpus() -> Vec<ProviderRecord> {
        vec![
            provider("1", &["Neurological Surgery"], &["Spinal Stenosis", "Back Pain"]),
            provider("2", &["Cardiology"], &["Atrial Fibrillation", "Heart Failure"]),
            provider("3", &["Orthopaedic Surgery"], &["Spinal Fusion", "Scoliosis"]),
        ]
    }

    #[test]
    fn test_features_include_bigrams_without_stop_words() {
        let f = features("Disorders of the Spinal Cord");
        assert!(f.contains(&"disorders".to_string()));
        assert!(f.contains(&"spinal cord".to_string()));
        assert!(!f.iter().any(|t| t == "the" || t == "of"));
    }

    #[test]
    fn test_tfidf_ranks_by_similarity() {
        let providers = corpus();
        let corpus: Vec<(Npi, String)> = providers.iter().map(|p| (p.npi.clone(), provider_text(p))).collect();
        let mut index = TfIdfIndex::new(&TextSearchConfig::default());
        index.build(&corpus).unwrap();

        let hits = index.query("spinal stenosis", 10);
        assert_eq!(hits.first().map(|(npi, _)| npi.as_str()), Some("1"));
        assert!(hits.iter().all(|(_, s)| *s > 0.1 && *s <= 1.0 + 1e-9));
        assert!(!hits.iter().any(|(npi, _)| npi.as_str() == "2"));
        assert!(index.query("zebra", 10).is_empty());
    }

    #[test]
    fn test_empty_corpus_degrades_to_keyword() {
        let search = TextSearch::build(&[], &TextSearchConfig::default());
        assert!(!search.has_index());
    }

    #[test]
    fn test_multiple_terms_use_keyword_search() {
        let providers = corpus();
        let subset: Vec<&ProviderRecord> = providers.iter().collect();
        let search = TextSearch::build(&providers, &TextSearchConfig::default());
        assert!(search.has_index());

        let hits = search.search(&subset, &["heart".to_string(), "SCOLIOSIS".to_string()]);
        let npis: Vec<&str> = hits.iter().map(|p| p.npi.as_str()).collect();
        assert_eq!(npis, vec!["2", "3"]);
    }

    #[test]
    fn test_search_restricted_to_subset() {
        let providers = corpus();
        let subset: Vec<&ProviderRecord> = providers.iter().filter(|p| p.npi.as_str() != "1").collect();
        let search = TextSearch::build(&providers, &TextSearchConfig::default());
        let hits = search.search(&subset, &["spinal".to_string()]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].npi.as_str(), "3");
    }
}
