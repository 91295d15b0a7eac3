//! Hive - 健康助理智能体网格编排引擎
//!
//! 模块划分：
//! - **classify**: 意图/焦点分类（规则快匹配 + LLM 兜底 + 静态默认）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 上下文、状态机、会话存储、响应缓存、编排器门面
//! - **data**: 外部数据查询边界与修改指纹
//! - **llm**: 内容生成能力抽象（Mock / Scripted）
//! - **mesh**: worker 契约、注册表与网状调度器
//! - **workers**: 固定 worker 集合（守卫、规划、医师、专科、画像、综合）

pub mod classify;
pub mod config;
pub mod core;
pub mod data;
pub mod llm;
pub mod mesh;
pub mod observability;
pub mod workers;
