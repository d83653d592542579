//! 计划相关性门限（启发式）
//!
//! 把查询按空白切分，只保留字符数大于 min_word_chars 的词；统计有多少词以子串形式出现在
//! 小写化后的 thought 中，命中比例 ≥ threshold 即接受。这只是廉价的相关性近似，不是语义校验。

use crate::core::AgentError;

pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.3;
const DEFAULT_MIN_WORD_CHARS: usize = 2;

/// 相关性门限；threshold 为 0 时等同于关闭
#[derive(Debug, Clone)]
pub struct RelevanceGate {
    threshold: f64,
    min_word_chars: usize,
}

impl Default for RelevanceGate {
    fn default() -> Self {
        Self::new(DEFAULT_RELEVANCE_THRESHOLD)
    }
}

impl RelevanceGate {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            min_word_chars: DEFAULT_MIN_WORD_CHARS,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 返回 (命中词数, 有效词数)
    pub fn score(&self, query: &str, thought: &str) -> (usize, usize) {
        let thought = thought.to_lowercase();
        let query = query.to_lowercase();
        let words: Vec<&str> = query
            .split_whitespace()
            .filter(|w| w.chars().count() > self.min_word_chars)
            .collect();
        let matches = words.iter().filter(|w| thought.contains(**w)).count();
        (matches, words.len())
    }

    /// 查询没有有效词时直接接受（无从比较）
    pub fn is_relevant(&self, query: &str, thought: &str) -> bool {
        let (matches, total) = self.score(query, thought);
        if total == 0 {
            return true;
        }
        matches as f64 / total as f64 >= self.threshold
    }

    pub fn check(&self, query: &str, thought: &str) -> Result<(), AgentError> {
        if self.is_relevant(query, thought) {
            return Ok(());
        }
        let (matches, total) = self.score(query, thought);
        Err(AgentError::validation(format!(
            "plan is not relevant to the query: thought mentions {matches} of {total} significant query words (needs {:.0}%)",
            self.threshold * 100.0
        )))
    }
}
