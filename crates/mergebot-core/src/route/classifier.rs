//! Intent classifier contract.
//!
//! Natural-language addressee resolution is delegated to an external
//! collaborator (typically an LLM call) supplied by the embedding
//! application. The core defines only the call contract: message text plus
//! candidate capability tags in, ranked candidates (or none) out. The
//! engine ships no model-backed implementation so its routing stays
//! deterministic under test.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// A capability tag ranked by match confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedIntent {
    /// The matched capability tag.
    pub tag: String,
    /// Match confidence in `[0.0, 1.0]`, higher is better.
    pub confidence: f64,
}

impl RankedIntent {
    /// Convenience constructor.
    pub fn new(tag: impl Into<String>, confidence: f64) -> Self {
        Self {
            tag: tag.into(),
            confidence,
        }
    }
}

/// Error from the external classification collaborator.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ClassifierError(pub String);

/// Trait for the external intent-classification collaborator.
pub trait IntentClassifier: Send + Sync {
    /// Rank the candidate capability tags against the message text.
    ///
    /// Returning an empty vector means no candidate matched.
    fn classify(
        &self,
        text: &str,
        candidate_tags: &[String],
    ) -> impl Future<Output = Result<Vec<RankedIntent>, ClassifierError>> + Send;
}

/// Object-safe version of [`IntentClassifier`] with boxed futures.
pub trait IntentClassifierDyn: Send + Sync {
    fn classify_boxed<'a>(
        &'a self,
        text: &'a str,
        candidate_tags: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RankedIntent>, ClassifierError>> + Send + 'a>>;
}

impl<T: IntentClassifier> IntentClassifierDyn for T {
    fn classify_boxed<'a>(
        &'a self,
        text: &'a str,
        candidate_tags: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RankedIntent>, ClassifierError>> + Send + 'a>> {
        Box::pin(self.classify(text, candidate_tags))
    }
}

/// Type-erased intent classifier.
pub struct BoxIntentClassifier {
    inner: Box<dyn IntentClassifierDyn + Send + Sync>,
}

impl BoxIntentClassifier {
    /// Wrap a concrete classifier in a type-erased box.
    pub fn new<T: IntentClassifier + 'static>(classifier: T) -> Self {
        Self {
            inner: Box::new(classifier),
        }
    }

    /// Rank the candidate capability tags against the message text.
    pub async fn classify(
        &self,
        text: &str,
        candidate_tags: &[String],
    ) -> Result<Vec<RankedIntent>, ClassifierError> {
        self.inner.classify_boxed(text, candidate_tags).await
    }
}

impl std::fmt::Debug for BoxIntentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxIntentClassifier").finish_non_exhaustive()
    }
}

/// Classifier used when the embedding application supplies none.
///
/// Matches nothing, so every natural-language message without an explicit
/// or schema-based addressee resolves to `NoAddressee`.
pub struct NullClassifier;

impl IntentClassifier for NullClassifier {
    async fn classify(
        &self,
        _text: &str,
        _candidate_tags: &[String],
    ) -> Result<Vec<RankedIntent>, ClassifierError> {
        Ok(Vec::new())
    }
}
