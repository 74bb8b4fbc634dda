pub mod error;
pub mod model;
pub mod summarizer;

pub use error::{EnrichmentError, EnrichmentResult};
pub use model::{feature_vector, InferenceModel, LinearModel};
pub use summarizer::{ChatSummarizer, LlmConfig, TextSummarizer};
