//! Finding aggregation and pattern synthesis.

pub mod aggregator;
pub mod corpus;
pub mod links;
pub mod patterns;

pub use aggregator::Aggregator;
pub use patterns::PatternAnalyzer;
