//! CodePal - Ask questions about a code repository
//!
//! Chunks and embeds a repository into a persistent, fingerprinted vector
//! index, then answers natural-language questions with a bounded agent loop
//! that calls read-only repository tools (semantic search, file read,
//! structural outline, directory listing) before synthesizing an answer.

pub mod agent;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod parsing;
pub mod repository;
pub mod session;
pub mod storage;
pub mod tools;

pub use engine::{AskResponse, Engine, SearchResult};
pub use error::{CodePalError, Result};
