//! 守卫 worker：安全筛查
//!
//! 每回合第一个、同步执行。检出紧急情况即返回终点信号，它自己的消息就是最终回复；
//! 否则只产出一条机器可读状态行（STATUS/FOCUS），供调度器播种焦点分类。
//! 抑郁/焦虑等常规心理健康话题不算紧急，交给正念教练处理。

use async_trait::async_trait;
use regex::Regex;

use crate::core::context::{Message, SharedContext};
use crate::core::domain::{PlanDomain, GUARDRAIL};
use crate::core::error::MeshError;
use crate::mesh::{Handoff, Worker};

const EMERGENCY_REPLY: &str = "I'm really concerned about what you just shared. Please contact \
emergency services right now (911/112), or reach the Suicide & Crisis Lifeline at 988. \
You don't have to go through this alone.";

pub struct GuardrailWorker {
    emergency: Regex,
}

impl GuardrailWorker {
    pub fn new() -> Self {
        // 仅限迫在眉睫的危险；宁可放行交给专科，也不过度拦截
        let emergency = Regex::new(concat!(
            r"(?i)(kill myself|end my life|end it all|want to die|suicid|cutting myself",
            r"|overdose|chest pain|can'?t breathe|difficulty breathing|stroke symptoms",
            r"|losing consciousness)",
        ))
        .expect("emergency pattern");
        Self { emergency }
    }

    /// 状态行的主题判定（纯规则，轻量）
    fn topic(input: &str) -> &'static str {
        let t = input.trim().to_lowercase();
        if t.contains("plan") || t.contains("help me fix") {
            "plan"
        } else if t.ends_with('?') {
            "question"
        } else if !PlanDomain::scan(&t).is_empty()
            || t.contains("health")
            || t.contains("tired")
            || t.contains("level")
        {
            "diagnosis"
        } else {
            "general"
        }
    }
}

impl Default for GuardrailWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for GuardrailWorker {
    fn name(&self) -> &str {
        GUARDRAIL
    }

    async fn run(&self, ctx: &SharedContext) -> Result<Handoff, MeshError> {
        let mut c = ctx.lock().await;
        let input = c.last_user_text().unwrap_or_default().to_string();

        if self.emergency.is_match(&input) {
            tracing::warn!("Guardrail emergency stop triggered");
            c.set_flag("emergency_stop", true);
            c.add_trace(format!("{}: emergency stop", GUARDRAIL));
            c.add_message(Message::model(EMERGENCY_REPLY, GUARDRAIL));
            return Ok(Handoff::Stop);
        }

        let topic = Self::topic(&input);
        c.add_finding(GUARDRAIL, format!("STATUS: Safe. FOCUS: {}.", topic));
        c.add_trace(format!("{}: safe (focus {})", GUARDRAIL, topic));
        // 守卫不表达路由意见，入口由调度器从状态推导
        Ok(Handoff::Next(Vec::new()))
    }
}
