//! 用户属性抽取：从用户消息里识别称呼、情绪与压力源
//!
//! 纯正则启发式，抽到的键值由存储层做 last-write-wins 合并。键名固定：
//! name / feelings / triggers / concerns。

use regex::Regex;

/// 属性抽取器（正则在构造时编译一次）
pub struct AttributeExtractor {
    name_patterns: Vec<Regex>,
    feeling: Regex,
    trigger: Regex,
    concern: Regex,
}

/// feeling 捕获里要跳过的虚词
const FEELING_STOPWORDS: &[&str] = &["like", "that", "as", "the", "it", "about", "this", "i"];

/// 抽取值的最大长度，防止把整句话吞进属性表
const MAX_VALUE_LEN: usize = 80;

impl AttributeExtractor {
    pub fn new() -> Self {
        Self {
            name_patterns: vec![
                Regex::new(r"(?i)\bmy name is ([A-Za-z][A-Za-z'\-]*)").unwrap(),
                Regex::new(r"(?i)\bcall me ([A-Za-z][A-Za-z'\-]*)").unwrap(),
                // 仅匹配大写开头的词，避免把 "I'm anxious" 当成名字
                Regex::new(r"\b[Ii]'?m ([A-Z][A-Za-z'\-]+)\b").unwrap(),
            ],
            feeling: Regex::new(r"(?i)\bfeel(?:ing)?\s+(?:really\s+|very\s+|so\s+|a bit\s+)?([a-z]+)")
                .unwrap(),
            trigger: Regex::new(r"(?i)\b(?:anxious|worried|stressed|nervous)\s+about\s+([^.!?\n]+)")
                .unwrap(),
            concern: Regex::new(r"(?i)\bstruggling with\s+([^.!?\n]+)").unwrap(),
        }
    }

    /// 对一条用户消息跑一遍全部启发式
    pub fn extract(&self, text: &str) -> Vec<(String, String)> {
        let mut attrs = Vec::new();

        for pattern in &self.name_patterns {
            if let Some(cap) = pattern.captures(text) {
                if let Some(name) = cap.get(1) {
                    attrs.push(("name".to_string(), clamp(name.as_str())));
                    break;
                }
            }
        }

        if let Some(cap) = self.feeling.captures(text) {
            if let Some(word) = cap.get(1) {
                let word = word.as_str().to_lowercase();
                if !FEELING_STOPWORDS.contains(&word.as_str()) {
                    attrs.push(("feelings".to_string(), word));
                }
            }
        }

        if let Some(cap) = self.trigger.captures(text) {
            if let Some(phrase) = cap.get(1) {
                attrs.push(("triggers".to_string(), clamp(phrase.as_str())));
            }
        }

        if let Some(cap) = self.concern.captures(text) {
            if let Some(phrase) = cap.get(1) {
                attrs.push(("concerns".to_string(), clamp(phrase.as_str())));
            }
        }

        attrs
    }
}

impl Default for AttributeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp(value: &str) -> String {
    let trimmed = value.trim();
    trimmed.chars().take(MAX_VALUE_LEN).collect()
}
