//! # Topic classifier
//!
//! A tiny bag-of-words classifier fitted once at startup on an embedded
//! corpus of hand-labeled phrases (see `assets/training.yaml`).
//!
//! ## Pipeline
//! - **Tokens**: runs of two or more word characters of the normalized text.
//! - **Features**: TF-IDF with smoothed idf `ln((1 + n) / (1 + df)) + 1`,
//!   each document vector L2-normalized. The vocabulary keeps at most
//!   [`MAX_FEATURES`] terms, most frequent first.
//! - **Model**: multinomial naive Bayes over the TF-IDF weights with additive
//!   smoothing [`SMOOTHING`] and empirical class priors. Posteriors come out of
//!   a log-sum-exp softmax, so they always sum to one over the seven classes.
//!
//! Classes are kept in lexicographic order of their stored labels; that order
//! breaks ties in [`TopicClassifier::ranked_labels`].
//!
//! ## Confidence
//! [`TopicClassifier::classify`] falls back to [`Topic::Other`] whenever the
//! best posterior is below [`CONFIDENCE_THRESHOLD`]. Text with no known terms
//! scores the class priors (1/7 each), which always falls back.
//!
//! ```rust
//! use tagvault::classifier::TopicClassifier;
//! use tagvault::topic::Topic;
//!
//! let classifier = TopicClassifier::new().unwrap();
//! assert_eq!(classifier.classify("Встреча с коллегами"), Topic::Work);
//! assert_eq!(classifier.classify("qwerty zxcv"), Topic::Other);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info};

use crate::normalize::normalize;
use crate::topic::Topic;
use crate::{Error, Result};

/// Below this posterior the prediction is reported as [`Topic::Other`].
pub const CONFIDENCE_THRESHOLD: f64 = 0.30;

/// Additive smoothing for the naive Bayes term likelihoods.
pub const SMOOTHING: f64 = 0.1;

/// Upper bound on the vocabulary size.
pub const MAX_FEATURES: usize = 1000;

const TRAINING_YAML: &str = include_str!("../assets/training.yaml");

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").unwrap());

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    TOKEN.find_iter(text).map(|m| m.as_str().to_lowercase())
}

/// Labeled example phrases grouped by topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct TrainingCorpus {
    pub examples: BTreeMap<Topic, Vec<String>>,
}

impl TrainingCorpus {
    /// The corpus compiled into the binary.
    pub fn embedded() -> Result<Self> {
        Self::from_yaml(TRAINING_YAML)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn len(&self) -> usize {
        self.examples.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fitted TF-IDF + multinomial naive Bayes model.
///
/// Immutable after construction, so a single instance can be shared across
/// tasks behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct TopicClassifier {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    classes: Vec<Topic>,
    class_log_prior: Vec<f64>,
    /// `[class][term]` log likelihoods.
    feature_log_prob: Vec<Vec<f64>>,
}

impl TopicClassifier {
    /// Fit on the embedded corpus.
    ///
    /// # Errors
    /// Fails if the embedded corpus does not parse or cannot be fitted; there
    /// is no partially initialized classifier.
    pub fn new() -> Result<Self> {
        let corpus = TrainingCorpus::embedded()?;
        Self::fit(&corpus, SMOOTHING)
    }

    pub fn fit(corpus: &TrainingCorpus, alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha.is_finite()) {
            return Err(Error::Classifier(format!("smoothing must be positive, got {alpha}")));
        }
        if corpus.examples.contains_key(&Topic::Other) {
            return Err(Error::Classifier("the overflow label cannot be trained".into()));
        }

        let mut documents: Vec<(Topic, Vec<String>)> = Vec::with_capacity(corpus.len());
        for (topic, phrases) in &corpus.examples {
            for phrase in phrases {
                documents.push((*topic, tokenize(&normalize(phrase)).collect()));
            }
        }
        if documents.is_empty() {
            return Err(Error::Classifier("training corpus is empty".into()));
        }

        let vocabulary = build_vocabulary(documents.iter().map(|(_, tokens)| tokens.as_slice()));
        if vocabulary.is_empty() {
            return Err(Error::Classifier("training corpus has no usable terms".into()));
        }
        let n_terms = vocabulary.len();

        let mut df = vec![0usize; n_terms];
        for (_, tokens) in &documents {
            let mut seen = vec![false; n_terms];
            for token in tokens {
                if let Some(&i) = vocabulary.get(token) {
                    if !seen[i] {
                        seen[i] = true;
                        df[i] += 1;
                    }
                }
            }
        }
        let n_docs = documents.len() as f64;
        let idf: Vec<f64> = df
            .iter()
            .map(|&d| ((1.0 + n_docs) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let mut classes: Vec<Topic> = corpus
            .examples
            .iter()
            .filter(|(_, phrases)| !phrases.is_empty())
            .map(|(topic, _)| *topic)
            .collect();
        classes.sort_by_key(|t| t.label());

        let mut class_counts = vec![0usize; classes.len()];
        let mut feature_counts = vec![vec![0.0f64; n_terms]; classes.len()];
        for (topic, tokens) in &documents {
            let c = classes
                .iter()
                .position(|t| t == topic)
                .ok_or_else(|| Error::Classifier(format!("unknown class {topic}")))?;
            class_counts[c] += 1;
            for (i, w) in tfidf(&vocabulary, &idf, tokens) {
                feature_counts[c][i] += w;
            }
        }

        let class_log_prior = class_counts
            .iter()
            .map(|&count| (count as f64 / n_docs).ln())
            .collect();
        let feature_log_prob = feature_counts
            .iter()
            .map(|counts| {
                let denom = (counts.iter().sum::<f64>() + alpha * n_terms as f64).ln();
                counts.iter().map(|fc| (fc + alpha).ln() - denom).collect()
            })
            .collect();

        info!(
            "Topic classifier fitted on {} phrases, {} classes, {} terms",
            documents.len(),
            classes.len(),
            n_terms
        );

        Ok(Self {
            vocabulary,
            idf,
            classes,
            class_log_prior,
            feature_log_prob,
        })
    }

    /// Classes in model order.
    pub fn classes(&self) -> &[Topic] {
        &self.classes
    }

    /// Posterior probability for every class, in [`classes`](Self::classes) order.
    pub fn probabilities(&self, text: &str) -> Result<Vec<f64>> {
        let tokens: Vec<String> = tokenize(&normalize(text)).collect();
        let features = tfidf(&self.vocabulary, &self.idf, &tokens);

        let joint: Vec<f64> = self
            .class_log_prior
            .iter()
            .zip(&self.feature_log_prob)
            .map(|(prior, log_prob)| prior + features.iter().map(|&(i, w)| w * log_prob[i]).sum::<f64>())
            .collect();

        let max = joint.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = joint.iter().map(|j| (j - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(Error::Classifier(format!("degenerate posterior for {text:?}")));
        }
        Ok(exp.into_iter().map(|e| e / total).collect())
    }

    /// Most probable topic, or [`Topic::Other`] when confidence is too low.
    ///
    /// Never fails: internal errors are logged and reported as `Other`.
    pub fn classify(&self, text: &str) -> Topic {
        match self.probabilities(text) {
            Ok(probs) => {
                let (best, p) = probs
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });
                debug!("Best topic {} with p={:.3}", self.classes[best], p);
                if p < CONFIDENCE_THRESHOLD {
                    Topic::Other
                } else {
                    self.classes[best]
                }
            }
            Err(e) => {
                error!("Classification failed: {e}");
                Topic::Other
            }
        }
    }

    /// The `top_k` most probable topics, best first.
    ///
    /// Equal probabilities keep model class order. On internal failure returns
    /// `[(Other, 1.0)]`.
    pub fn ranked_labels(&self, text: &str, top_k: usize) -> Vec<(Topic, f64)> {
        match self.probabilities(text) {
            Ok(probs) => {
                let mut ranked: Vec<(Topic, f64)> =
                    self.classes.iter().copied().zip(probs).collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                ranked.truncate(top_k);
                ranked
            }
            Err(e) => {
                error!("Ranking topics failed: {e}");
                vec![(Topic::Other, 1.0)]
            }
        }
    }
}

fn build_vocabulary<'a>(documents: impl Iterator<Item = &'a [String]>) -> HashMap<String, usize> {
    let mut term_counts: HashMap<&str, usize> = HashMap::new();
    for tokens in documents {
        for token in tokens {
            *term_counts.entry(token.as_str()).or_default() += 1;
        }
    }

    let mut terms: Vec<(&str, usize)> = term_counts.into_iter().collect();
    if terms.len() > MAX_FEATURES {
        terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        terms.truncate(MAX_FEATURES);
    }
    terms.sort_by(|a, b| a.0.cmp(b.0));

    terms
        .into_iter()
        .enumerate()
        .map(|(i, (term, _))| (term.to_string(), i))
        .collect()
}

/// Sparse L2-normalized TF-IDF vector as `(term index, weight)` pairs.
fn tfidf(vocabulary: &HashMap<String, usize>, idf: &[f64], tokens: &[String]) -> Vec<(usize, f64)> {
    let mut tf: BTreeMap<usize, f64> = BTreeMap::new();
    for token in tokens {
        if let Some(&i) = vocabulary.get(token) {
            *tf.entry(i).or_default() += 1.0;
        }
    }

    let mut weights: Vec<(usize, f64)> = tf.into_iter().map(|(i, n)| (i, n * idf[i])).collect();
    let norm = weights.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, w) in &mut weights {
            *w /= norm;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> TopicClassifier {
        TopicClassifier::new().expect("embedded corpus fits")
    }

    #[test]
    fn test_embedded_corpus_shape() {
        let corpus = TrainingCorpus::embedded().unwrap();
        assert_eq!(corpus.len(), 63);
        assert_eq!(corpus.examples.len(), 7);
        assert!(corpus.examples.values().all(|phrases| phrases.len() == 9));
    }

    #[test]
    fn test_classes_sorted_by_label() {
        let labels: Vec<_> = classifier().classes().iter().map(|t| t.label()).collect();
        let mut sorted = labels.clone();
        sorted.sort();
        assert_eq!(labels, sorted);
        assert_eq!(labels.len(), 7);
    }

    #[test]
    fn test_meeting_with_colleagues_is_work() {
        let clf = classifier();
        assert_eq!(clf.classify("встреча с коллегами"), Topic::Work);
        let (top, p) = clf.ranked_labels("встреча с коллегами", 1)[0];
        assert_eq!(top, Topic::Work);
        assert!(p > CONFIDENCE_THRESHOLD, "p = {p}");
    }

    #[test]
    fn test_stress_accent_does_not_change_prediction() {
        let clf = classifier();
        let accented = "Встре\u{301}ча с колле\u{301}гами";
        assert_eq!(clf.classify(accented), Topic::Work);
        assert_eq!(
            clf.probabilities(accented).unwrap(),
            clf.probabilities("встреча с коллегами").unwrap()
        );
    }

    #[test]
    fn test_clear_topics() {
        let clf = classifier();
        assert_eq!(clf.classify("Домашнее задание по математике"), Topic::Study);
        assert_eq!(clf.classify("болит голова"), Topic::Health);
        assert_eq!(clf.classify("оплата счетов"), Topic::Finance);
        assert_eq!(clf.classify("Срочное сообщение!"), Topic::Important);
    }

    #[test]
    fn test_unknown_text_is_other() {
        let clf = classifier();
        assert_eq!(clf.classify("xyzzy qwerty"), Topic::Other);
        assert_eq!(clf.classify(""), Topic::Other);
        assert_eq!(clf.classify("🎉🎉🎉"), Topic::Other);
    }

    #[test]
    fn test_ambiguous_word_is_other() {
        // "встреча" appears once each in work, family and leisure phrases.
        assert_eq!(classifier().classify("встреча"), Topic::Other);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let clf = classifier();
        for text in ["встреча с коллегами", "", "покупка машины и страховка дома", "lorem ipsum"] {
            let probs = clf.probabilities(text).unwrap();
            assert_eq!(probs.len(), 7);
            let sum: f64 = probs.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "sum = {sum} for {text:?}");
        }
    }

    #[test]
    fn test_ranked_labels_sorted_and_bounded() {
        let clf = classifier();
        let ranked = clf.ranked_labels("экзамен завтра", 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, Topic::Study);
        assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));

        assert_eq!(clf.ranked_labels("экзамен завтра", 20).len(), 7);
        assert!(clf.ranked_labels("экзамен завтра", 0).is_empty());
    }

    #[test]
    fn test_ties_keep_class_order() {
        let clf = classifier();
        // Balanced priors: unknown text scores every class equally.
        let ranked = clf.ranked_labels("nothing known here", 7);
        let order: Vec<Topic> = ranked.iter().map(|(t, _)| *t).collect();
        assert_eq!(order, clf.classes());
        assert!(ranked.iter().all(|(_, p)| (p - 1.0 / 7.0).abs() < 1e-9));
    }

    #[test]
    fn test_never_returns_outside_label_set() {
        let clf = classifier();
        for text in ["", "   ", "!!!", "работа работа работа", "\u{0}\u{1}", "a"] {
            let topic = clf.classify(text);
            assert!(Topic::CATEGORIES.contains(&topic) || topic == Topic::Other);
        }
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        let empty = TrainingCorpus::from_yaml("{}").unwrap();
        assert!(TopicClassifier::fit(&empty, SMOOTHING).is_err());

        let no_terms = TrainingCorpus::from_yaml("work: ['a', '!']").unwrap();
        assert!(TopicClassifier::fit(&no_terms, SMOOTHING).is_err());

        let overflow = TrainingCorpus::from_yaml("other: ['misc stuff']").unwrap();
        assert!(TopicClassifier::fit(&overflow, SMOOTHING).is_err());

        let corpus = TrainingCorpus::embedded().unwrap();
        assert!(TopicClassifier::fit(&corpus, 0.0).is_err());
    }

    #[test]
    fn test_fit_custom_corpus() {
        let corpus = TrainingCorpus::from_yaml(
            "finance:\n  - pay the rent\n  - bank transfer\nhealth:\n  - doctor visit\n  - morning run\n",
        )
        .unwrap();
        let clf = TopicClassifier::fit(&corpus, 1.0).unwrap();
        assert_eq!(clf.classes(), &[Topic::Health, Topic::Finance]);
        assert_eq!(clf.classify("bank rent"), Topic::Finance);
    }
}
