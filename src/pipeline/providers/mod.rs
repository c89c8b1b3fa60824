// src/pipeline/providers/mod.rs
pub mod browserless;
pub mod google_cse;
pub mod google_news_rss;
pub mod openai;
