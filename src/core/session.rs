//! 会话存储
//!
//! 会话 id -> 共享上下文，上下文原地更新、从不替换。闲置超时的会话在下次访问时
//! 顺手清理；回合进行中的会话（回合闸被占）绝不逐出。同一会话不支持并发回合，
//! 调用方应拒绝或串行化（回合闸就是为此准备的）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::context::{ConversationContext, SharedContext};

pub type SessionId = String;

/// 会话句柄：上下文 + 单写者回合闸
#[derive(Clone)]
pub struct SessionHandle {
    pub ctx: SharedContext,
    /// 同一会话同时只允许一个回合持闸
    pub turn_gate: Arc<tokio::sync::Mutex<()>>,
}

struct SessionEntry {
    handle: SessionHandle,
    last_active: Instant,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// 会话列表的展示条目
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub id: SessionId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub message_count: usize,
    pub user_intent: String,
}

pub struct SessionStore {
    sessions: tokio::sync::Mutex<HashMap<SessionId, SessionEntry>>,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 取出会话（不存在则创建）；访问即续期
    pub async fn get_or_create(
        &self,
        id: Option<&str>,
        opening: &str,
    ) -> (SessionId, SessionHandle) {
        let mut sessions = self.sessions.lock().await;
        Self::cleanup_locked(&mut sessions, self.timeout);

        let id = match id {
            Some(id) => id.to_string(),
            None => format!("session_{}", uuid::Uuid::new_v4()),
        };

        let entry = sessions.entry(id.clone()).or_insert_with(|| {
            tracing::info!("New session {}", id);
            SessionEntry {
                handle: SessionHandle {
                    ctx: Arc::new(tokio::sync::Mutex::new(ConversationContext::new(opening))),
                    turn_gate: Arc::new(tokio::sync::Mutex::new(())),
                },
                last_active: Instant::now(),
                created_at: chrono::Utc::now(),
            }
        });
        entry.last_active = Instant::now();
        (id, entry.handle.clone())
    }

    /// 主动清理过期会话，返回清理数
    pub async fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        Self::cleanup_locked(&mut sessions, self.timeout)
    }

    fn cleanup_locked(sessions: &mut HashMap<SessionId, SessionEntry>, timeout: Duration) -> usize {
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let expired = entry.last_active.elapsed() > timeout;
            // 回合进行中（闸被占）的会话不逐出
            let mid_turn = entry.handle.turn_gate.try_lock().is_err();
            if expired && !mid_turn {
                tracing::info!("Session {} expired", id);
                false
            } else {
                true
            }
        });
        before - sessions.len()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// 活跃会话一览（回合进行中的会话消息数可能读不到，计 0）
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .map(|(id, entry)| {
                let (message_count, user_intent) = entry
                    .handle
                    .ctx
                    .try_lock()
                    .map(|c| (c.history.len(), c.user_intent.clone()))
                    .unwrap_or((0, String::new()));
                SessionSummary {
                    id: id.clone(),
                    created_at: entry.created_at,
                    message_count,
                    user_intent,
                }
            })
            .collect()
    }
}
