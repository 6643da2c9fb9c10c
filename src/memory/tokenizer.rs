//! 分词与 token 估算
//!
//! 检索打分用词集合重叠度；含 CJK 的文本走 jieba 搜索引擎模式，其余按非字母数字切分。
//! token 数是启发式估算（ASCII 约 4 字符/token，其他约 1.5 字符/token），只用于预算比较。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}'
    )
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// 单字符 ASCII 词（a、x、1）不参与打分
fn keep(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (None, _) => false,
        (Some(c), None) => is_cjk(c),
        _ => token.chars().any(is_word_char),
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().any(is_cjk) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| keep(s))
            .collect()
    } else {
        text.split(|c: char| !is_word_char(c))
            .map(str::to_lowercase)
            .filter(|s| keep(s))
            .collect()
    }
}

pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// 两个词集合的交集大小
pub fn overlap_score(a: &HashSet<String>, b: &HashSet<String>) -> usize {
    a.intersection(b).count()
}

/// 估算文本 token 数（非空文本至少为 1）
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let ascii = text.chars().filter(char::is_ascii).count();
    let other = text.chars().count() - ascii;
    (ascii / 4 + (other as f64 / 1.5).ceil() as usize).max(1)
}
