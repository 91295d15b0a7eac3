//! 网格错误类型
//!
//! 路由错误、worker 异常、分类失败与缓存故障都在调度器/编排器边界被吸收为降级行为，
//! 对用户不可见；只有回合超时对当前回合致命（上下文仍保留到下一回合）。

use thiserror::Error;

/// 编排引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Worker {name} failed: {reason}")]
    WorkerFailed { name: String, reason: String },

    #[error("Classifier error: {0}")]
    ClassifierError(String),

    #[error("Data call {call} failed: {reason}")]
    DataCallFailed { call: String, reason: String },

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 回合级墙钟超时（仅对本回合致命）
    #[error("Turn deadline exceeded")]
    TurnTimeout,
}
