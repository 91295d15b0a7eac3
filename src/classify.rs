//! 意图/焦点分类
//!
//! 先走快速规则匹配（不调用 LLM），未命中再请求 LLM 输出 JSON；
//! 任何一步失败都退化为静态默认值，绝不把分类错误抛给上层。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::context::Message;
use crate::llm::LlmClient;

/// 确认状态（用户是否在回应一个已挂牌的 offer）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Yes,
    No,
    Clarifying,
    #[default]
    None,
}

/// 分类结果快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default = "default_focus")]
    pub focus: String,
    #[serde(default = "default_intent")]
    pub intent: String,
    #[serde(default)]
    pub confirmation_status: ConfirmationStatus,
    #[serde(default = "default_urgency")]
    pub urgency: String,
    #[serde(default = "default_emotion")]
    pub emotion: String,
    #[serde(default)]
    pub confidence: f32,
}

fn default_focus() -> String {
    "diagnosis".to_string()
}

fn default_intent() -> String {
    "diagnosis".to_string()
}

fn default_urgency() -> String {
    "medium".to_string()
}

fn default_emotion() -> String {
    "neutral".to_string()
}

impl Classification {
    /// 分类能力不可用时的静态默认
    pub fn fallback() -> Self {
        Self {
            focus: default_focus(),
            intent: default_intent(),
            confirmation_status: ConfirmationStatus::None,
            urgency: default_urgency(),
            emotion: default_emotion(),
            confidence: 0.0,
        }
    }
}

const CLASSIFIER_PROMPT: &str = "You are a conversation intent classifier for a health assistant. \
Analyze the User Message given the Context. Respond with JSON ONLY. Fields: \
'focus': what the user is focused on (diagnosis, plan, wellbeing, progress, acceleration, other). \
'intent': what the user wants (diagnosis, plan, answer, other). \
'confirmation_status': if responding to a question — yes, no, clarifying, or none. \
'urgency': low, medium, high. 'emotion': neutral, stressed, anxious, upbeat. \
'confidence': 0.0-1.0. Do not add commentary.";

/// 意图/焦点分类器
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    /// 启用快速规则匹配（不调用 LLM）
    enable_fast_match: bool,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            enable_fast_match: true,
        }
    }

    /// 分类用户话语；state_snapshot 为状态机当前的文本快照
    pub async fn classify(&self, user_text: &str, state_snapshot: &str) -> Classification {
        if self.enable_fast_match {
            if let Some(cls) = self.fast_match(user_text) {
                return cls;
            }
        }

        match self.llm_classify(user_text, state_snapshot).await {
            Ok(cls) => cls,
            Err(e) => {
                tracing::warn!("Classifier degraded to defaults: {}", e);
                Classification::fallback()
            }
        }
    }

    /// 快速规则匹配（不调用 LLM）
    fn fast_match(&self, input: &str) -> Option<Classification> {
        let t = input.trim().to_lowercase();

        let affirmative = matches!(
            t.as_str(),
            "yes" | "yeah" | "yep" | "sure" | "ok" | "okay" | "yes please" | "sounds good"
        ) || t.starts_with("yes,")
            || t.starts_with("yes ");
        if affirmative {
            return Some(Classification {
                focus: "plan".to_string(),
                intent: "plan".to_string(),
                confirmation_status: ConfirmationStatus::Yes,
                confidence: 0.9,
                ..Classification::fallback()
            });
        }

        let negative = matches!(t.as_str(), "no" | "nope" | "no thanks" | "not now" | "maybe later")
            || t.starts_with("no,")
            || t.starts_with("no ");
        if negative {
            return Some(Classification {
                focus: "diagnosis".to_string(),
                intent: "other".to_string(),
                confirmation_status: ConfirmationStatus::No,
                confidence: 0.9,
                ..Classification::fallback()
            });
        }

        if t.contains("plan") || t.contains("help me fix") || t.contains("what should i do") {
            return Some(Classification {
                focus: "plan".to_string(),
                intent: "plan".to_string(),
                confidence: 0.8,
                ..Classification::fallback()
            });
        }

        if t.contains("stressed") || t.contains("anxious") || t.contains("meditat") {
            return Some(Classification {
                focus: "wellbeing".to_string(),
                intent: "diagnosis".to_string(),
                emotion: "stressed".to_string(),
                confidence: 0.8,
                ..Classification::fallback()
            });
        }

        if t.contains("progress") || t.contains("how am i doing") {
            return Some(Classification {
                focus: "progress".to_string(),
                intent: "diagnosis".to_string(),
                confidence: 0.7,
                ..Classification::fallback()
            });
        }

        // 跟进式提问：直接让综合者作答，不再扇出专科
        let question_lead = ["will ", "would ", "does ", "do ", "is ", "are ", "can ", "how much", "what about"];
        if t.ends_with('?') && question_lead.iter().any(|p| t.starts_with(p)) {
            return Some(Classification {
                focus: "other".to_string(),
                intent: "answer".to_string(),
                confidence: 0.7,
                ..Classification::fallback()
            });
        }

        None
    }

    /// 使用 LLM 分类，输出按 JSON 解析
    async fn llm_classify(&self, user_text: &str, snapshot: &str) -> Result<Classification, String> {
        let prompt = format!(
            "User message:\n{}\n\nContext:\n{}\n\nRespond with JSON exactly in this shape:\n\
             {{\"focus\":\"...\", \"intent\":\"...\", \"confirmation_status\":\"...\", \
             \"urgency\":\"...\", \"emotion\":\"...\", \"confidence\":0.0}}",
            user_text.trim(),
            if snapshot.is_empty() { "(none)" } else { snapshot }
        );

        let messages = vec![Message::system(CLASSIFIER_PROMPT), Message::user(prompt)];
        let raw = self.llm.complete(&messages).await?;
        let cleaned = raw.replace("```json", "").replace("```", "");
        serde_json::from_str(cleaned.trim()).map_err(|e| e.to_string())
    }
}
