//! Mock LLM 客户端（用于测试与无 Key 演示）
//!
//! MockLlmClient 回显最后一条 User 消息；ScriptedLlmClient 按脚本依次吐出预设回复，
//! 脚本耗尽后返回错误，便于测试降级路径。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::context::{Message, Role};
use crate::llm::LlmClient;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("(mock) {}", last_user))
    }
}

/// 脚本客户端：依次返回预设回复，耗尽后报错
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    /// 永远失败的客户端（测试分类器/worker 的静态默认降级）
    pub fn failing() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.responses
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .ok_or_else(|| "script exhausted".to_string())
    }
}
