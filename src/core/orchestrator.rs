//! 编排器门面：按请求装配各组件
//!
//! 单回合控制流：数据版本检查 -> 会话取用 -> 响应缓存 -> 单写者回合闸 ->
//! 状态机 -> 网状调度 -> 缓存写回。所有能力（生成、数据、分类）由构造时注入，
//! 没有任何模块级单例，测试可整体换假件。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::classify::IntentClassifier;
use crate::config::AppConfig;
use crate::core::cache::{CachedReply, ResponseCache};
use crate::core::context::{SharedContext, Widget};
use crate::core::session::{SessionStore, SessionSummary};
use crate::core::state::update_state;
use crate::data::DataSource;
use crate::llm::LlmClient;
use crate::mesh::MeshScheduler;
use crate::workers::create_workers;

/// 回合输入（sessionId 缺省即新开会话）
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub session_id: Option<String>,
    pub text: String,
}

impl TurnRequest {
    pub fn new(session_id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: text.into(),
        }
    }
}

/// 回合输出：最终回复 + 挂件 + 本回合的诊断日志
#[derive(Clone, Debug)]
pub struct TurnReply {
    pub text: String,
    pub widgets: Vec<Widget>,
    pub session_id: String,
    pub trace: Vec<String>,
}

pub struct Orchestrator {
    sessions: SessionStore,
    scheduler: MeshScheduler,
    classifier: IntentClassifier,
    data: Arc<dyn DataSource>,
    response_cache: ResponseCache,
    /// 引擎级数据版本（指纹变化即递增）
    data_version: AtomicU64,
    last_fingerprint: Mutex<Option<u64>>,
    turn_timeout: Duration,
}

impl Orchestrator {
    pub fn new(cfg: &AppConfig, llm: Arc<dyn LlmClient>, data: Arc<dyn DataSource>) -> Self {
        let registry = Arc::new(create_workers(llm.clone(), data.clone()));
        let scheduler = MeshScheduler::new(
            registry,
            cfg.mesh.hop_budget,
            cfg.mesh.loop_threshold,
            cfg.mesh.max_parallel_workers,
            cfg.mesh.speculation,
        );
        Self {
            sessions: SessionStore::new(cfg.session.timeout_secs),
            scheduler,
            classifier: IntentClassifier::new(llm),
            data,
            response_cache: ResponseCache::new(
                cfg.cache.response_ttl_secs,
                cfg.cache.response_capacity,
            ),
            data_version: AtomicU64::new(0),
            last_fingerprint: Mutex::new(None),
            turn_timeout: Duration::from_secs(cfg.mesh.turn_timeout_secs),
        }
    }

    /// 处理一个回合
    pub async fn handle_turn(&self, req: TurnRequest) -> TurnReply {
        self.poll_data_version().await;
        let version = self.data_version.load(Ordering::SeqCst);

        let (session_id, handle) = self
            .sessions
            .get_or_create(req.session_id.as_deref(), &req.text)
            .await;

        // 响应缓存命中：整个调度回合被短路
        let normalized = ResponseCache::normalize(&req.text);
        if let Some(hit) = self.response_cache.get(&session_id, version, &normalized) {
            tracing::info!("Response cache hit for session {}", session_id);
            handle.ctx.lock().await.add_trace("response cache HIT");
            return TurnReply {
                text: hit.text,
                widgets: hit.widgets,
                session_id,
                trace: vec!["response cache HIT".to_string()],
            };
        }

        // 单写者：同一会话的并发回合直接拒绝
        let Ok(_gate) = handle.turn_gate.try_lock() else {
            tracing::warn!("Concurrent turn rejected for session {}", session_id);
            return TurnReply {
                text: "A previous request for this session is still being processed.".to_string(),
                widgets: Vec::new(),
                session_id,
                trace: vec!["turn rejected: session busy".to_string()],
            };
        };

        let turn = self.run_turn(&handle.ctx, &req.text, version);
        match tokio::time::timeout(self.turn_timeout, turn).await {
            Ok((text, widgets, trace)) => {
                self.response_cache.put(
                    &session_id,
                    version,
                    &normalized,
                    CachedReply {
                        text: text.clone(),
                        widgets: widgets.clone(),
                    },
                );
                TurnReply {
                    text,
                    widgets,
                    session_id,
                    trace,
                }
            }
            Err(_) => {
                // 回合超时：尽量给出已有的综合回复，上下文保留到下一回合
                let mut c = handle.ctx.lock().await;
                c.add_trace("turn deadline exceeded");
                let text = c
                    .last_model_message()
                    .map(|m| m.content.clone())
                    .unwrap_or_else(|| {
                        "Sorry - that took longer than expected. Please try again.".to_string()
                    });
                let widgets = c.take_widgets();
                TurnReply {
                    text,
                    widgets,
                    session_id,
                    trace: vec!["turn deadline exceeded".to_string()],
                }
            }
        }
    }

    async fn run_turn(
        &self,
        ctx: &SharedContext,
        text: &str,
        version: u64,
    ) -> (String, Vec<Widget>, Vec<String>) {
        let (trace_start, snapshot) = {
            let mut c = ctx.lock().await;
            let start = c.trace.len();
            c.sync_data_version(version);
            c.begin_turn(text);
            let snapshot = format!(
                "stage={:?}, intent={}, focus={}, pending_offer={:?}, findings={}",
                c.state.stage,
                c.state.intent,
                c.state.focus,
                c.state.pending_offer,
                c.accumulated_findings.len()
            );
            (start, snapshot)
        };

        let cls = self.classifier.classify(text, &snapshot).await;
        {
            let mut c = ctx.lock().await;
            update_state(&mut c, text, &cls);
            let trace_msg = format!(
                "state -> stage={:?} intent={} focus={}",
                c.state.stage, c.state.intent, c.state.focus
            );
            c.add_trace(trace_msg);
        }

        let reply = match self.scheduler.run_turn(ctx).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Turn failed: {}", e);
                ctx.lock().await.add_trace(format!("turn failed: {}", e));
                "Sorry - something went wrong while processing that. Please try again.".to_string()
            }
        };

        let mut c = ctx.lock().await;
        let widgets = c.take_widgets();
        let trace = c.trace[trace_start..].to_vec();
        (reply, widgets, trace)
    }

    /// 侦测底层数据变化，变了就递增引擎级数据版本
    async fn poll_data_version(&self) {
        let fp = self.data.fingerprint().await;
        let mut last = self.last_fingerprint.lock().expect("fingerprint lock");
        if let Some(prev) = *last {
            if prev != fp {
                let v = self.data_version.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!("Data change detected, version -> {}", v);
            }
        }
        *last = Some(fp);
    }

    pub fn data_version(&self) -> u64 {
        self.data_version.load(Ordering::SeqCst)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.active_count().await
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list_sessions().await
    }

    pub async fn evict_expired_sessions(&self) -> usize {
        self.sessions.evict_expired().await
    }
}
