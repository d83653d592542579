//! 内存检索后端：文档按 token 集合存储，查询时按 Jaccard 相似度排序

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::retrieval::tokenizer::{jaccard_similarity, tokenize_to_set};
use crate::retrieval::{RetrievalError, Retriever, SearchResult};

struct Document {
    content: String,
    tokens: HashSet<String>,
}

#[derive(Default)]
pub struct InMemoryRetriever {
    documents: RwLock<BTreeMap<String, Document>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加或替换文档
    pub fn add_document(
        &self,
        id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), RetrievalError> {
        let content = content.into();
        let tokens = tokenize_to_set(&content);
        self.documents
            .write()
            .map_err(|e| RetrievalError::Backend(e.to_string()))?
            .insert(id.into(), Document { content, tokens });
        Ok(())
    }

    pub fn remove_document(&self, id: &str) -> bool {
        self.documents
            .write()
            .map(|mut docs| docs.remove(id).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery("query must not be empty".into()));
        }
        let query_tokens = tokenize_to_set(query);
        let docs = self
            .documents
            .read()
            .map_err(|e| RetrievalError::Backend(e.to_string()))?;

        let mut results: Vec<SearchResult> = docs
            .iter()
            .map(|(id, doc)| SearchResult {
                id: id.clone(),
                content: doc.content.clone(),
                similarity: jaccard_similarity(&query_tokens, &doc.tokens),
            })
            .filter(|r| r.similarity > 0.0)
            .collect();
        // 分数相同按 id 排序（BTreeMap 迭代顺序 + 稳定排序）
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(top_k);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever() -> InMemoryRetriever {
        let r = InMemoryRetriever::new();
        r.add_document("rust", "Rust is a systems programming language").unwrap();
        r.add_document("tokio", "Tokio is an async runtime for Rust").unwrap();
        r.add_document("cooking", "How to bake sourdough bread").unwrap();
        r
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity_and_excludes_zero() {
        let r = retriever();
        let results = r.search("async runtime", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "tokio");

        let results = r.search("rust language", 5).await.unwrap();
        assert_eq!(results[0].id, "rust");
        assert!(results.iter().all(|r| r.id != "cooking"));
    }

    #[tokio::test]
    async fn test_top_k_truncates() {
        let r = retriever();
        assert_eq!(r.search("rust", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let r = retriever();
        assert!(matches!(r.search("  ", 3).await, Err(RetrievalError::InvalidQuery(_))));
    }

    #[test]
    fn test_add_replace_remove() {
        let r = retriever();
        assert_eq!(r.len(), 3);
        r.add_document("rust", "replaced").unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.remove_document("rust"));
        assert!(!r.remove_document("rust"));
        assert_eq!(r.len(), 2);
    }
}
