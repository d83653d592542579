//! 中英文混合分词：含 CJK 字符时用 jieba 搜索引擎模式，否则按空白切分

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 去掉首尾标点后的小写词；单字符只保留 CJK
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let raw: Vec<&str> = if contains_cjk(text) {
        jieba().cut_for_search(text, true)
    } else {
        text.split_whitespace().collect()
    };

    raw.into_iter()
        .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|s| s.chars().count() > 1 || s.chars().next().is_some_and(is_cjk))
        .collect()
}

pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard 相似度：|A∩B| / |A∪B|，任一为空时为 0
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_english_strips_punctuation() {
        let tokens = tokenize("Rust, the language! a");
        assert_eq!(tokens, vec!["rust", "the", "language"]);
    }

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("我喜欢编程和人工智能");
        assert!(tokens.iter().any(|t| t.contains("编程")));
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
    }

    #[test]
    fn test_jaccard() {
        let a = tokenize_to_set("rust async runtime");
        let b = tokenize_to_set("tokio async runtime");
        assert!((jaccard_similarity(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard_similarity(&a, &HashSet::new()), 0.0);
    }
}
