//! Intent classifier: multinomial naive Bayes over lowercase word tokens.
//!
//! The model is an immutable snapshot behind an `Arc`. Training clones the current snapshot,
//! adds the example, and swaps the new snapshot in under a write lock, so a classification
//! always scores against one whole model. Training calls are serialized by a separate mutex.

use crate::types::StructuredInput;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier has not been trained")]
    Untrained,
    #[error("invalid training example: {0}")]
    InvalidExample(String),
    #[error("training file {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One labelled utterance, as stored in the training file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrainingFile {
    #[serde(default)]
    examples: Vec<TrainingExample>,
}

#[derive(Debug, Clone, Default)]
struct LabelStats {
    examples: u64,
    tokens: u64,
    counts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default)]
struct Model {
    /// Ordered so scoring and tie-breaking do not depend on hash order.
    labels: BTreeMap<String, LabelStats>,
    vocabulary: HashSet<String>,
    examples: Vec<TrainingExample>,
}

impl Model {
    fn add(&mut self, label: &str, text: &str) {
        let stats = self.labels.entry(label.to_string()).or_default();
        stats.examples += 1;
        for token in tokenize(text) {
            stats.tokens += 1;
            *stats.counts.entry(token.clone()).or_insert(0) += 1;
            self.vocabulary.insert(token);
        }
        self.examples.push(TrainingExample {
            label: label.to_string(),
            text: text.to_string(),
        });
    }

    fn total_examples(&self) -> u64 {
        self.labels.values().map(|s| s.examples).sum()
    }

    /// Best label and its confidence: the label's posterior scaled by the share of input
    /// tokens the model has seen at all. Returns None when the model has no labels.
    fn best(&self, text: &str) -> Option<(&str, f64)> {
        if self.labels.is_empty() {
            return None;
        }
        let tokens = tokenize(text);
        let known: Vec<&String> = tokens
            .iter()
            .filter(|t| self.vocabulary.contains(*t))
            .collect();
        let coverage = if tokens.is_empty() {
            0.0
        } else {
            known.len() as f64 / tokens.len() as f64
        };

        let total = self.total_examples() as f64;
        let vocab = self.vocabulary.len() as f64;
        let scores: Vec<(&str, f64)> = self
            .labels
            .iter()
            .map(|(label, stats)| {
                let denom = stats.tokens as f64 + vocab;
                let mut score = (stats.examples as f64 / total).ln();
                for t in &known {
                    let c = stats.counts.get(*t).copied().unwrap_or(0) as f64;
                    score += ((c + 1.0) / denom).ln();
                }
                (label.as_str(), score)
            })
            .collect();

        let mut best = scores[0];
        for s in &scores[1..] {
            if s.1 > best.1 {
                best = *s;
            }
        }
        let norm: f64 = scores.iter().map(|(_, s)| (s - best.1).exp()).sum();
        let posterior = 1.0 / norm;
        Some((best.0, posterior * coverage))
    }
}

/// Lowercase alphanumeric runs; everything else separates tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub struct Classifier {
    model: RwLock<Arc<Model>>,
    write: Mutex<()>,
    min_confidence: f64,
    training_file: Option<PathBuf>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE)
    }
}

impl Classifier {
    /// In-memory classifier with no training file.
    pub fn new(min_confidence: f64) -> Self {
        Self {
            model: RwLock::new(Arc::new(Model::default())),
            write: Mutex::new(()),
            min_confidence,
            training_file: None,
        }
    }

    /// Classifier backed by a training file: existing examples are loaded now and the file is
    /// rewritten after every successful `train`. A missing file starts untrained.
    pub async fn open(
        training_file: impl Into<PathBuf>,
        min_confidence: f64,
    ) -> Result<Self, ClassifierError> {
        let path = training_file.into();
        let mut model = Model::default();
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => {
                let file: TrainingFile = serde_json::from_str(&s).map_err(|e| {
                    ClassifierError::Persist {
                        path: path.display().to_string(),
                        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                    }
                })?;
                for ex in file.examples {
                    model.add(&ex.label, &ex.text);
                }
                log::info!(
                    "classifier: loaded {} example(s) across {} label(s) from {}",
                    model.examples.len(),
                    model.labels.len(),
                    path.display()
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("classifier: no training file at {}, starting untrained", path.display());
            }
            Err(source) => {
                return Err(ClassifierError::Persist {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
        Ok(Self {
            model: RwLock::new(Arc::new(model)),
            write: Mutex::new(()),
            min_confidence,
            training_file: Some(path),
        })
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Add one example. Labels are trimmed and lowercased.
    pub async fn train(&self, label: &str, text: &str) -> Result<(), ClassifierError> {
        let label = label.trim().to_lowercase();
        if label.is_empty() {
            return Err(ClassifierError::InvalidExample("empty label".to_string()));
        }
        if tokenize(text).is_empty() {
            return Err(ClassifierError::InvalidExample(format!(
                "no words in example for {}",
                label
            )));
        }

        let _write = self.write.lock().await;
        let current = self.model.read().await.clone();
        let mut next = (*current).clone();
        next.add(&label, text.trim());
        if let Some(path) = &self.training_file {
            save_examples(path, &next.examples).await?;
        }
        *self.model.write().await = Arc::new(next);
        log::debug!("classifier: trained label {}", label);
        Ok(())
    }

    /// Score `text` against every label. Below the confidence threshold the result is the
    /// unclassified input, which is not an error.
    pub async fn classify(&self, text: &str) -> Result<StructuredInput, ClassifierError> {
        let model = self.model.read().await.clone();
        let (label, confidence) = model.best(text).ok_or(ClassifierError::Untrained)?;
        if confidence >= self.min_confidence && confidence > 0.0 {
            Ok(StructuredInput::classified(label, confidence, text))
        } else {
            Ok(StructuredInput::unclassified(confidence, text))
        }
    }

    /// Known labels in order.
    pub async fn labels(&self) -> Vec<String> {
        self.model.read().await.labels.keys().cloned().collect()
    }

    pub async fn example_count(&self) -> usize {
        self.model.read().await.examples.len()
    }
}

async fn save_examples(path: &Path, examples: &[TrainingExample]) -> Result<(), ClassifierError> {
    let persist_err = |source| ClassifierError::Persist {
        path: path.display().to_string(),
        source,
    };
    let file = TrainingFile {
        examples: examples.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| persist_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
    }
    tokio::fs::write(path, json).await.map_err(persist_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(tokenize("Hello, THERE! it's 9am"), vec!["hello", "there", "it", "s", "9am"]);
        assert!(tokenize("  ?! ").is_empty());
    }

    #[tokio::test]
    async fn classify_before_training_is_untrained() {
        let c = Classifier::default();
        assert!(matches!(c.classify("hello").await, Err(ClassifierError::Untrained)));
    }

    #[tokio::test]
    async fn trained_text_classifies_to_its_label() {
        let c = Classifier::default();
        c.train("greeting", "hello there").await.unwrap();
        c.train("weather", "what is the weather tomorrow").await.unwrap();
        let si = c.classify("hello there").await.unwrap();
        assert_eq!(si.intent(), Some("greeting"));
        assert!(si.confidence >= c.min_confidence());
        assert_eq!(si.raw_text, "hello there");
    }

    #[tokio::test]
    async fn unseen_words_are_unclassified_not_an_error() {
        let c = Classifier::default();
        c.train("greeting", "hello").await.unwrap();
        let si = c.classify("asdkjh").await.unwrap();
        assert!(!si.is_classified());
        assert_eq!(si.confidence, 0.0);
    }

    #[tokio::test]
    async fn rejects_empty_label_and_wordless_text() {
        let c = Classifier::default();
        assert!(matches!(c.train("  ", "hi").await, Err(ClassifierError::InvalidExample(_))));
        assert!(matches!(c.train("x", "!!").await, Err(ClassifierError::InvalidExample(_))));
        assert!(matches!(c.classify("hi").await, Err(ClassifierError::Untrained)));
    }

    #[tokio::test]
    async fn scoring_is_deterministic() {
        let build = || async {
            let c = Classifier::default();
            c.train("a", "red green blue").await.unwrap();
            c.train("b", "green yellow").await.unwrap();
            c.train("c", "blue purple green").await.unwrap();
            c
        };
        let c1 = build().await;
        let c2 = build().await;
        for text in ["green", "blue green", "yellow red", "purple"] {
            assert_eq!(c1.classify(text).await.unwrap(), c2.classify(text).await.unwrap());
        }
    }

    #[tokio::test]
    async fn ties_resolve_to_first_label() {
        let c = Classifier::new(0.0);
        c.train("beta", "same words").await.unwrap();
        c.train("alpha", "same words").await.unwrap();
        let si = c.classify("same words").await.unwrap();
        assert_eq!(si.intent(), Some("alpha"));
        assert!((si.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn classification_runs_alongside_training() {
        let c = Arc::new(Classifier::default());
        for _ in 0..10 {
            c.train("greeting", "hello").await.unwrap();
        }
        let mut handles = Vec::new();
        for i in 0..20 {
            let c = c.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    c.train("farewell", &format!("goodbye friend {}", i)).await.unwrap();
                } else {
                    let si = c.classify("hello").await.unwrap();
                    assert_eq!(si.intent(), Some("greeting"));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(c.example_count().await, 20);
        assert_eq!(c.labels().await, vec!["farewell", "greeting"]);
    }

    #[tokio::test]
    async fn training_file_round_trips_examples() {
        let dir = std::env::temp_dir().join(format!("switchboard-classifier-{}", uuid::Uuid::new_v4()));
        let path = dir.join("training.json");
        {
            let c = Classifier::open(&path, DEFAULT_MIN_CONFIDENCE).await.unwrap();
            assert!(matches!(c.classify("hi").await, Err(ClassifierError::Untrained)));
            c.train("Greeting", "hello there").await.unwrap();
        }
        let reopened = Classifier::open(&path, DEFAULT_MIN_CONFIDENCE).await.unwrap();
        assert_eq!(reopened.labels().await, vec!["greeting"]);
        let si = reopened.classify("hello").await.unwrap();
        assert_eq!(si.intent(), Some("greeting"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
