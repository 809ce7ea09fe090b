pub mod enhancer;
pub mod fetcher;
pub mod publisher;
pub mod tool;
pub mod vectorizer;
