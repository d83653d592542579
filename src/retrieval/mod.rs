//! 检索后端：Retriever trait 与内存实现
//!
//! 引擎只依赖 search(query, top_k)；结果写入执行历史前用 format_results 格式化。

pub mod memory;
pub mod tokenizer;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use memory::InMemoryRetriever;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("retrieval backend error: {0}")]
    Backend(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub similarity: f64,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// 返回按相似度降序排列的至多 top_k 条结果
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, RetrievalError>;
}

pub const NO_RESULTS: &str = "No relevant results found";

/// 编号列表，相似度保留两位小数
pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS.to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. [{:.2}] {}", i + 1, r.similarity, r.content))
        .collect::<Vec<_>>()
        .join("\n")
}
