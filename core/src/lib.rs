pub mod cache;
pub mod error;
pub mod feedback;
pub mod policy;
pub mod prompt;
pub mod retrieval;
pub mod reward;
pub mod similarity;
