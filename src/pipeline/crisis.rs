//! 危机检测：关键词分级 + 三态状态机
//!
//! 纯函数 step(state, text) 决定转移与动作，不做任何 IO；路由层负责
//! 把新状态写回存储并发事件。重度关键词单条即触发；中度关键词需要
//! 同一条消息里命中 moderate_threshold 个不同模式。全部词边界匹配。

use regex::Regex;

use crate::session::CrisisState;

/// 重度关键词：任一命中即触发
const SEVERE_KEYWORDS: &[&str] = &[
    "suicide",
    "self-harm",
    "self harm",
    "kill myself",
    "end my life",
    "can't go on",
    "want to die",
    "hurt myself",
];

/// 中度关键词：同一消息命中 moderate_threshold 个不同模式才触发
const MODERATE_KEYWORDS: &[&str] = &[
    "hopeless",
    "worthless",
    "no reason to live",
    "give up",
    "can't take it anymore",
    "no way out",
    "trapped",
    "burden to everyone",
];

/// 危机后用户确认安全的词（词边界匹配，substring 会把 broken 当成 ok）
const AFFIRMATIVE_KEYWORDS: &[&str] = &[
    "yes", "called", "contacted", "talked", "speaking", "safe", "better", "okay", "ok",
];

/// 各国热线条目
pub struct Hotline {
    pub name: &'static str,
    pub number: Option<&'static str>,
    pub text_line: Option<&'static str>,
    pub website: &'static str,
}

const US_HOTLINE: Hotline = Hotline {
    name: "National Suicide Prevention Lifeline",
    number: Some("988 or 1-800-273-8255"),
    text_line: Some("Text HOME to 741741"),
    website: "https://988lifeline.org/",
};

const UK_HOTLINE: Hotline = Hotline {
    name: "Samaritans",
    number: Some("116 123"),
    text_line: Some("Text SHOUT to 85258"),
    website: "https://www.samaritans.org/",
};

const CA_HOTLINE: Hotline = Hotline {
    name: "Canada Suicide Prevention Service",
    number: Some("1-833-456-4566"),
    text_line: Some("Text HOME to 686868"),
    website: "https://www.crisisservicescanada.ca/",
};

const AU_HOTLINE: Hotline = Hotline {
    name: "Lifeline Australia",
    number: Some("13 11 14"),
    text_line: Some("Text 0477 13 11 14"),
    website: "https://www.lifeline.org.au/",
};

const INTERNATIONAL_HOTLINE: Hotline = Hotline {
    name: "International Association for Suicide Prevention",
    number: None,
    text_line: None,
    website: "https://www.iasp.info/resources/Crisis_Centres/",
};

/// 按国家码取热线，未知回退国际条目
pub fn hotline_for(country: &str) -> &'static Hotline {
    match country {
        "US" => &US_HOTLINE,
        "UK" => &UK_HOTLINE,
        "CA" | "Canada" => &CA_HOTLINE,
        "AU" | "Australia" => &AU_HOTLINE,
        _ => &INTERNATIONAL_HOTLINE,
    }
}

/// step 的结果动作
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrisisAction {
    /// 无动作，继续管道
    None,
    /// 触发危机：发热线资源，短路后续阶段
    Triggered,
    /// 等待确认：发 check-in，短路后续阶段
    CheckIn,
    /// 用户确认安全：回 Normal，本轮继续走管道
    Cleared,
}

/// 一次转移
#[derive(Clone, Copy, Debug)]
pub struct CrisisStep {
    pub next: CrisisState,
    pub action: CrisisAction,
}

/// 危机检测器（正则在构造时编译一次）
pub struct CrisisDetector {
    severe: Vec<Regex>,
    moderate: Vec<Regex>,
    affirmative: Vec<Regex>,
    moderate_threshold: usize,
    hotline: &'static Hotline,
}

fn word_boundary_patterns(keywords: &[&str]) -> Vec<Regex> {
    keywords
        .iter()
        .map(|k| Regex::new(&format!(r"\b{}\b", regex::escape(k))).unwrap())
        .collect()
}

impl CrisisDetector {
    pub fn new(country: &str, moderate_threshold: usize) -> Self {
        Self {
            severe: word_boundary_patterns(SEVERE_KEYWORDS),
            moderate: word_boundary_patterns(MODERATE_KEYWORDS),
            affirmative: word_boundary_patterns(AFFIRMATIVE_KEYWORDS),
            moderate_threshold: moderate_threshold.max(1),
            hotline: hotline_for(country),
        }
    }

    /// 状态机转移。任何状态下命中关键词都重新触发。
    pub fn step(&self, state: CrisisState, text: &str) -> CrisisStep {
        let lower = text.to_lowercase();

        if self.is_triggered(&lower) {
            return CrisisStep {
                next: CrisisState::CrisisActive,
                action: CrisisAction::Triggered,
            };
        }

        match state {
            CrisisState::Normal => CrisisStep {
                next: CrisisState::Normal,
                action: CrisisAction::None,
            },
            CrisisState::CrisisActive | CrisisState::FollowupPending => {
                if self.is_affirmative(&lower) {
                    CrisisStep {
                        next: CrisisState::Normal,
                        action: CrisisAction::Cleared,
                    }
                } else {
                    CrisisStep {
                        next: CrisisState::FollowupPending,
                        action: CrisisAction::CheckIn,
                    }
                }
            }
        }
    }

    fn is_triggered(&self, lower: &str) -> bool {
        if self.severe.iter().any(|re| re.is_match(lower)) {
            return true;
        }
        let distinct = self.moderate.iter().filter(|re| re.is_match(lower)).count();
        distinct >= self.moderate_threshold
    }

    fn is_affirmative(&self, lower: &str) -> bool {
        self.affirmative.iter().any(|re| re.is_match(lower))
    }

    /// 危机响应文本（热线资源）
    pub fn crisis_response(&self) -> String {
        let mut response = String::from(
            "I'm deeply concerned about what you've shared. Your life matters, \
             and I strongly urge you to reach out for immediate support.\n\n",
        );

        match self.hotline.number {
            Some(number) => {
                response.push_str(&format!(
                    "Please contact {} right now at {}.\n",
                    self.hotline.name, number
                ));
            }
            None => {
                response.push_str(&format!("Please reach out to {} right now.\n", self.hotline.name));
            }
        }
        if let Some(text_line) = self.hotline.text_line {
            response.push_str(&format!("You can also {}.\n", text_line));
        }

        response.push_str(
            "\nThis is a serious situation that requires professional support. \
             These trained counselors are available 24/7 and can provide immediate help.\n\n\
             Would you be willing to reach out to them? Your safety is the top priority right now.\n",
        );
        response.push_str(&format!(
            "\nAdditional resources are available at: {}",
            self.hotline.website
        ));
        response
    }

    /// 未确认安全时的 check-in 文本
    pub fn check_in_message(&self) -> String {
        "I want to check in with you. Have you contacted the crisis hotline or spoken \
         with a mental health professional? Your wellbeing is important, and I want to \
         make sure you're getting the support you need."
            .to_string()
    }
}
