//! 内容生成能力抽象
//!
//! worker 的文案生成是可替换的外部能力，经由 LlmClient 注入；
//! 引擎自身的正确性从不依赖其输出内容。

mod mock;
mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use traits::LlmClient;
