//! LLM 客户端抽象
//!
//! 所有后端实现 LlmClient::complete（非流式）；调用方自行决定失败时的降级文案。

use async_trait::async_trait;

use crate::core::context::Message;

/// LLM 客户端 trait：以消息序列换一段完成文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
