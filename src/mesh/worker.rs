//! Worker 契约
//!
//! worker 消费共享上下文并返回类型化的路由指令；领域完成通过上下文里的
//! 类型化信号申报，调度器从不解析自然语言发现。

use async_trait::async_trait;

use crate::core::context::SharedContext;
use crate::core::error::MeshError;

/// worker 的路由指令
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handoff {
    /// 移交给一个或多个同伴（长度 > 1 时并行执行；空列表视为就地终止）
    Next(Vec<String>),
    /// 终点信号：本 worker 的产出即最终回复（综合者 / 紧急停止）
    Stop,
}

impl Handoff {
    pub fn to(name: impl Into<String>) -> Self {
        Handoff::Next(vec![name.into()])
    }

    pub fn parallel<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Handoff::Next(names.into_iter().map(Into::into).collect())
    }
}

/// 网格 worker 契约
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// 是否允许在路由确定前被投机执行。
    /// 只有幂等、只读为主（至多写 trace 与调用缓存）的 worker 才能开启；
    /// 任何会产出用户可见消息或不可逆副作用的 worker 必须保持 false。
    fn speculation_safe(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &SharedContext) -> Result<Handoff, MeshError>;
}
