//! 综合者 worker：链路终点
//!
//! 把各专科输入合成一份回复，是全网格唯一向用户写消息的 worker。
//! 交付形态二选一：诊断（给分析、问要不要计划、不带挂件）或
//! 计划（给行动建议、按完成领域与风险旗标补挂件、问后续问题）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::context::{DomainStatus, Message, SharedContext, Widget};
use crate::core::domain::{PlanDomain, CRITIC};
use crate::core::error::MeshError;
use crate::core::state::Stage;
use crate::data::{cached_call, DataSource};
use crate::llm::LlmClient;
use crate::mesh::{Handoff, Worker};

use super::comprehensive_targets;

pub struct CriticWorker {
    llm: Arc<dyn LlmClient>,
    data: Arc<dyn DataSource>,
    /// 同伴花名册，仅用于生成 prose
    roster: String,
}

impl CriticWorker {
    pub fn new(llm: Arc<dyn LlmClient>, data: Arc<dyn DataSource>) -> Self {
        Self {
            llm,
            data,
            roster: String::new(),
        }
    }

    pub fn with_roster(mut self, roster: String) -> Self {
        self.roster = roster;
        self
    }

    /// 生成能力不可用时的确定性汇总
    fn deterministic_body(findings: &[String]) -> String {
        let lines: Vec<&str> = findings
            .iter()
            .map(String::as_str)
            .filter(|f| !f.contains("STATUS:"))
            .collect();
        if lines.is_empty() {
            "I don't have enough data on file yet to say anything specific.".to_string()
        } else {
            format!("### Summary\n\n{}", lines.join("\n"))
        }
    }
}

#[async_trait]
impl Worker for CriticWorker {
    fn name(&self) -> &str {
        CRITIC
    }

    async fn run(&self, ctx: &SharedContext) -> Result<Handoff, MeshError> {
        // 跟进式提问时把血检拉回上下文（通常命中上一回合的调用缓存）
        {
            let intent = ctx.lock().await.state.intent.clone();
            if intent == "answer" {
                let _ = cached_call(ctx, &self.data, CRITIC, "get_biomarkers", &json!({})).await;
            }
        }

        let (findings, user_text, delivered) = {
            let c = ctx.lock().await;
            let delivered =
                !c.completed_this_turn.is_empty() || c.state.stage == Stage::PlanDelivery;
            (
                c.accumulated_findings.clone(),
                c.last_user_text().unwrap_or_default().to_string(),
                delivered,
            )
        };

        // 正文交给生成能力；失败回退确定性拼装（出锁调用）
        let prompt = format!(
            "User message: {}\n\nSpecialist findings:\n{}\n\n\
             Synthesize ONE cohesive response. Always quote actual biomarker values with \
             their optimal ranges, never vague labels like \"high\".",
            user_text,
            findings.join("\n")
        );
        let messages = vec![
            Message::system(format!(
                "You are the Response Synthesizer - the final step before the user sees anything.\n{}",
                self.roster
            )),
            Message::user(prompt),
        ];
        let body = match self.llm.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Critic generation degraded: {}", e);
                Self::deterministic_body(&findings)
            }
        };

        let mut c = ctx.lock().await;
        let closing = if delivered {
            // 计划交付：按本回合完成的领域与风险旗标补挂件
            for domain in c.completed_this_turn.clone() {
                match domain {
                    PlanDomain::Nutrition => {
                        c.push_widget(Widget::new("meal_plan", json!({"plan_type": "cholesterol"})));
                    }
                    PlanDomain::Fitness => {
                        c.push_widget(Widget::new("workout", json!({"goal": "Cardio"})));
                    }
                    PlanDomain::Supplements => {
                        c.push_widget(Widget::new(
                            "supplement",
                            json!({"supplement_names": ["Vitamin D3"]}),
                        ));
                    }
                    _ => {}
                }
            }
            if c.get_flag("needs_meal_widget") {
                c.push_widget(Widget::new("meal_plan", json!({"plan_type": "cholesterol"})));
            }
            if c.get_flag("needs_workout_widget") {
                c.push_widget(Widget::new("workout", json!({"goal": "Cardio"})));
            }
            if c.get_flag("needs_supp_widget") {
                c.push_widget(Widget::new(
                    "supplement",
                    json!({"supplement_names": ["Vitamin D3"]}),
                ));
            }
            "Do you have questions about this plan, or want to dive deeper into any area?"
        } else if c.state.stage == Stage::AwaitingConfirmation {
            // offer 还挂着而用户没说清：重申确认
            "Just to confirm - would you like me to put that plan together?"
        } else if c.state.intent == "plan" {
            // 计划请求但没点名领域：挂牌综合 offer，先问覆盖范围
            register_comprehensive_offer(&mut c);
            "Which areas would you like the plan to cover - nutrition, exercise, sleep, \
             stress, supplements, or all of them?"
        } else if c.state.intent == "diagnosis" && findings.iter().any(|f| !f.contains("STATUS:")) {
            // 诊断交付：只给分析，不带挂件，末尾抛出计划 offer
            register_comprehensive_offer(&mut c);
            "Would you like a plan to address these issues?"
        } else {
            "Is there anything else you'd like to look into?"
        };

        c.add_message(Message::model(format!("{}\n\n{}", body, closing), CRITIC));
        Ok(Handoff::Stop)
    }
}

/// 挂牌综合计划 offer，并以类型化信号申报各领域为「已提出」
fn register_comprehensive_offer(c: &mut crate::core::context::ConversationContext) {
    c.state
        .register_offer("comprehensive_plan", comprehensive_targets());
    c.add_trace(format!("{}: offer registered: comprehensive_plan", CRITIC));
    for domain in PlanDomain::ALL {
        c.signal_domain(CRITIC, domain, DomainStatus::Offered);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::context::{ConversationContext, DomainStatus};
    use crate::data::StaticDataSource;
    use crate::llm::ScriptedLlmClient;

    fn critic(llm: ScriptedLlmClient) -> CriticWorker {
        let data: Arc<dyn DataSource> = Arc::new(StaticDataSource::new(HashMap::new()));
        CriticWorker::new(Arc::new(llm), data)
    }

    fn ctx_with_findings() -> ConversationContext {
        let mut ctx = ConversationContext::new("check my health");
        ctx.begin_turn("what are my biggest issues?");
        ctx.add_finding("Physician", "Biomarker review: LDL 167 mg/dL (optimal <100)");
        ctx
    }

    #[tokio::test]
    async fn test_diagnosis_reply_offers_plan_without_widgets() {
        let shared: SharedContext = Arc::new(tokio::sync::Mutex::new(ctx_with_findings()));
        let handoff = critic(ScriptedLlmClient::failing()).run(&shared).await.unwrap();

        assert_eq!(handoff, Handoff::Stop);
        let mut c = shared.lock().await;
        assert_eq!(c.state.stage, Stage::AwaitingConfirmation);
        assert_eq!(c.state.pending_offer.as_deref(), Some("comprehensive_plan"));
        let reply = c.last_model_message().unwrap().content.clone();
        assert!(reply.contains("Would you like a plan"));
        assert!(reply.contains("LDL 167"));
        assert!(c.take_widgets().is_empty());
    }

    #[tokio::test]
    async fn test_plan_reply_adds_widgets_for_completed_domains() {
        let mut ctx = ctx_with_findings();
        ctx.state.intent = "plan".to_string();
        ctx.signal_domain("Nutritionist", PlanDomain::Nutrition, DomainStatus::Completed);
        ctx.signal_domain("Fitness Coach", PlanDomain::Fitness, DomainStatus::Completed);
        let shared: SharedContext = Arc::new(tokio::sync::Mutex::new(ctx));

        critic(ScriptedLlmClient::failing()).run(&shared).await.unwrap();

        let mut c = shared.lock().await;
        let widgets = c.take_widgets();
        let kinds: Vec<&str> = widgets.iter().map(|w| w.kind.as_str()).collect();
        assert_eq!(kinds, vec!["meal_plan", "workout"]);
        let reply = c.last_model_message().unwrap().content.clone();
        assert!(reply.contains("questions about this plan"));
        // 已经交付计划，不再追问要不要计划
        assert!(!reply.contains("Would you like a plan"));
    }

    #[tokio::test]
    async fn test_risk_flags_add_widgets_once() {
        let mut ctx = ctx_with_findings();
        ctx.state.intent = "plan".to_string();
        ctx.set_flag("needs_meal_widget", true);
        ctx.signal_domain("Nutritionist", PlanDomain::Nutrition, DomainStatus::Completed);
        let shared: SharedContext = Arc::new(tokio::sync::Mutex::new(ctx));

        critic(ScriptedLlmClient::failing()).run(&shared).await.unwrap();

        let mut c = shared.lock().await;
        // 领域挂件与旗标挂件同型，签名去重只留一份
        let widgets = c.take_widgets();
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].kind, "meal_plan");
    }

    #[tokio::test]
    async fn test_generic_plan_request_registers_offer() {
        let mut ctx = ConversationContext::new("fix me");
        ctx.begin_turn("give me a plan");
        ctx.state.intent = "plan".to_string();
        let shared: SharedContext = Arc::new(tokio::sync::Mutex::new(ctx));

        critic(ScriptedLlmClient::failing()).run(&shared).await.unwrap();

        let c = shared.lock().await;
        assert_eq!(c.state.stage, Stage::AwaitingConfirmation);
        assert!(!c.state.offer_targets.is_empty());
        let reply = c.last_model_message().unwrap().content.clone();
        assert!(reply.contains("Which areas"));
    }
}
