pub mod dictionary;
pub mod lda;
pub mod preprocess;
pub mod similarity;

pub use dictionary::{BagOfWords, Dictionary};
pub use lda::{LdaModel, LdaParams};
pub use preprocess::TextPreprocessor;
pub use similarity::{cosine_similarity, pairwise_sweep, ScoredPair, SweepControl};

/// A fitted model that maps a bag-of-words onto a topic distribution.
pub trait TopicModel: Send + Sync {
    fn n_topics(&self) -> usize;

    /// Full-length distribution over topics; entries sum to one.
    fn document_topics(&self, bow: &BagOfWords) -> Vec<f64>;
}
