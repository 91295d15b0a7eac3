//! 引擎核心：上下文、状态机、会话、缓存与编排器门面

pub mod cache;
pub mod context;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod state;

pub use cache::{CachedReply, ResponseCache};
pub use context::{ConversationContext, DomainStatus, Message, Role, SharedContext, Widget};
pub use domain::PlanDomain;
pub use error::MeshError;
pub use orchestrator::{Orchestrator, TurnReply, TurnRequest};
pub use session::{SessionHandle, SessionStore, SessionSummary};
pub use state::{ConversationState, Stage};
