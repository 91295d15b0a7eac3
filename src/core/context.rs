//! 会话上下文：一次对话的全部共享可变状态
//!
//! worker 与调度器都通过同一把粗粒度锁（每会话一把，见 SharedContext）访问上下文；
//! 本模块只做纯数据操作，不做任何 I/O。历史与发现都是回合内只追加的。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::PlanDomain;
use super::state::ConversationState;

/// 消息角色（user 输入 / model 产出 / system 注入）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    System,
}

/// 单条消息；sender 标记产出该消息的 worker
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sender: None,
        }
    }

    pub fn model(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            sender: Some(sender.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            sender: None,
        }
    }
}

/// 挂件：回合内累积、回合末一次性交给调用方的不透明 UI 产物
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Widget {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Widget {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// 回合内去重用的调用签名
    fn signature(&self) -> String {
        format!("{}:{}", self.kind, self.payload)
    }
}

/// 领域完成信号（类型化，调度器不解析自然语言）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainStatus {
    Completed,
    Offered,
}

/// 每会话一把粗粒度锁：所有可变操作都经过它
pub type SharedContext = Arc<tokio::sync::Mutex<ConversationContext>>;

/// 共享会话上下文（随会话创建，原地更新直到闲置逐出，从不整体替换）
pub struct ConversationContext {
    /// 用户最初的高层目标
    pub user_intent: String,
    /// 对话历史（插入顺序即未来重放顺序）
    pub history: Vec<Message>,
    /// 各 worker 累积的内部发现（带来源标记）
    pub accumulated_findings: Vec<String>,
    /// worker 与调度器之间的自由信号通道（后写覆盖）
    pub flags: HashMap<String, bool>,
    /// 本会话内已产出完成结果的专科领域
    pub plan_domain_flags: HashMap<PlanDomain, bool>,
    /// 当前计划请求仍欠的领域（pending ⊆ required）
    pub pending_plan_domains: BTreeSet<PlanDomain>,
    pub required_plan_domains: BTreeSet<PlanDomain>,
    /// 本回合内申报完成的领域（综合者据此决定交付形态）
    pub completed_this_turn: Vec<PlanDomain>,
    /// 外部调用结果缓存（数据版本递增时整体清空）
    tool_cache: HashMap<String, serde_json::Value>,
    /// 回合内累积的挂件，回合末被取走
    pending_widgets: Vec<Widget>,
    /// 回合内挂件签名去重
    widget_signatures: HashSet<String>,
    /// 可观测性事件日志（只追加）
    pub trace: Vec<String>,
    /// 本回合调度迭代计数
    pub hop_count: u32,
    /// 数据版本（递增即作废 tool_cache 与响应缓存键）
    pub data_version: u64,
    pub state: ConversationState,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ConversationContext {
    pub fn new(user_intent: impl Into<String>) -> Self {
        let plan_domain_flags = PlanDomain::ALL.into_iter().map(|d| (d, false)).collect();
        Self {
            user_intent: user_intent.into(),
            history: Vec::new(),
            accumulated_findings: Vec::new(),
            flags: HashMap::new(),
            plan_domain_flags,
            pending_plan_domains: BTreeSet::new(),
            required_plan_domains: BTreeSet::new(),
            completed_this_turn: Vec::new(),
            tool_cache: HashMap::new(),
            pending_widgets: Vec::new(),
            widget_signatures: HashSet::new(),
            trace: Vec::new(),
            hop_count: 0,
            data_version: 0,
            state: ConversationState::default(),
            created_at: chrono::Utc::now(),
        }
    }

    /// 回合开始：计数清零、领域工作集重置、追加用户消息
    pub fn begin_turn(&mut self, user_text: &str) {
        self.hop_count = 0;
        self.pending_plan_domains.clear();
        self.required_plan_domains.clear();
        self.completed_this_turn.clear();
        self.widget_signatures.clear();
        if self.user_intent.is_empty() {
            self.user_intent = user_text.to_string();
        }
        self.history.push(Message::user(user_text));
        self.add_trace(format!("turn start: {}", preview(user_text, 60)));
    }

    pub fn add_message(&mut self, msg: Message) {
        self.history.push(msg);
    }

    /// 最近一条用户消息（状态机与 worker 的共同输入）
    pub fn last_user_text(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// 最近一条 model 消息（回合的候选最终回复）
    pub fn last_model_message(&self) -> Option<&Message> {
        self.history.iter().rev().find(|m| m.role == Role::Model)
    }

    pub fn add_finding(&mut self, origin: &str, finding: impl Into<String>) {
        self.accumulated_findings
            .push(format!("[{}]: {}", origin, finding.into()));
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.flags.insert(key.to_string(), value);
    }

    pub fn get_flag(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    /// 类型化领域信号：完成则落旗并从工作集中销账
    pub fn signal_domain(&mut self, origin: &str, domain: PlanDomain, status: DomainStatus) {
        match status {
            DomainStatus::Completed => {
                self.plan_domain_flags.insert(domain, true);
                self.pending_plan_domains.remove(&domain);
                if !self.completed_this_turn.contains(&domain) {
                    self.completed_this_turn.push(domain);
                }
                self.add_trace(format!("{}: domain completed: {}", origin, domain.label()));
            }
            DomainStatus::Offered => {
                self.add_trace(format!("{}: domain offered: {}", origin, domain.label()));
            }
        }
    }

    /// 登记一次多领域派发（幂等：已完成的领域不再进入 pending）
    pub fn register_plan_dispatch(&mut self, domains: &[PlanDomain]) {
        for d in domains {
            self.required_plan_domains.insert(*d);
            if !self.plan_domain_flags.get(d).copied().unwrap_or(false) {
                self.pending_plan_domains.insert(*d);
            }
        }
        if !domains.is_empty() {
            let labels: Vec<_> = domains.iter().map(|d| d.label()).collect();
            self.add_trace(format!("plan dispatch registered: [{}]", labels.join(", ")));
        }
    }

    fn cache_key(call: &str, args: &serde_json::Value) -> String {
        // serde_json 的 Map 按键排序，序列化结果天然规范化
        format!("{}:{}", call, args)
    }

    pub fn get_cached_tool_result(
        &self,
        call: &str,
        args: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.tool_cache.get(&Self::cache_key(call, args)).cloned()
    }

    pub fn cache_tool_result(&mut self, call: &str, args: &serde_json::Value, result: serde_json::Value) {
        self.tool_cache.insert(Self::cache_key(call, args), result);
    }

    pub fn tool_cache_len(&self) -> usize {
        self.tool_cache.len()
    }

    /// 数据版本自增：整体作废调用缓存
    pub fn increment_data_version(&mut self) {
        self.data_version += 1;
        self.tool_cache.clear();
        self.add_trace(format!("tool cache cleared (data v{})", self.data_version));
    }

    /// 对齐到引擎级数据版本（落后即清缓存）
    pub fn sync_data_version(&mut self, version: u64) {
        if version > self.data_version {
            self.data_version = version;
            self.tool_cache.clear();
            self.add_trace(format!("tool cache cleared (data v{})", version));
        }
    }

    /// 追加挂件；同一回合内重复签名的挂件被丢弃
    pub fn push_widget(&mut self, widget: Widget) -> bool {
        let sig = widget.signature();
        if !self.widget_signatures.insert(sig) {
            self.add_trace(format!("skipped duplicate widget {}", widget.kind));
            return false;
        }
        self.add_trace(format!("widget added: {}", widget.kind));
        self.pending_widgets.push(widget);
        true
    }

    /// 回合末取走全部挂件
    pub fn take_widgets(&mut self) -> Vec<Widget> {
        std::mem::take(&mut self.pending_widgets)
    }

    pub fn add_trace(&mut self, entry: impl Into<String>) {
        self.trace.push(entry.into());
    }
}

/// 截断展示用的文本预览
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
