//! Research Providers
//!
//! External retrieval behind traits: synchronous web search and asynchronous
//! deep-research tasks (`deep`), rate-limited encyclopedia lookups
//! (`encyclopedia`), and authoritative Q&A (`qa`).

pub mod deep;
pub mod encyclopedia;
pub mod qa;

pub use deep::{DeepTaskStatus, ExaClient, SearchApi, SearchHit, SharedSearchApi};
pub use encyclopedia::{Encyclopedia, EncyclopediaArticle, SharedEncyclopedia, WikipediaClient};
pub use qa::{CreditLatch, PerplexityClient, QaAnswer, QaApi, SharedQaApi};
