//! 专科 worker：营养 / 健身 / 睡眠 / 正念
//!
//! 四个专科共用同一实现：先把各自关心的数据拉进调用缓存，再让生成能力写计划
//! 文本（失败用确定性兜底），最后以类型化信号申报领域完成并移交综合者。
//! 专科自己不写用户可见消息，最终回复一律由综合者产出。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::context::{DomainStatus, Message, SharedContext};
use crate::core::domain::{
    PlanDomain, CRITIC, FITNESS_COACH, MINDFULNESS_COACH, NUTRITIONIST, SLEEP_DOCTOR,
};
use crate::core::error::MeshError;
use crate::data::{cached_call, DataSource};
use crate::llm::LlmClient;
use crate::mesh::{Handoff, Worker};

pub struct SpecialistWorker {
    name: &'static str,
    role: &'static str,
    /// 首个为主领域（总是申报完成），其余仅在仍欠时顺带完成
    covers: Vec<PlanDomain>,
    calls: Vec<(&'static str, Value)>,
    llm: Arc<dyn LlmClient>,
    data: Arc<dyn DataSource>,
}

impl SpecialistWorker {
    pub fn nutritionist(llm: Arc<dyn LlmClient>, data: Arc<dyn DataSource>) -> Self {
        Self {
            name: NUTRITIONIST,
            role: "Registered Dietitian specializing in therapeutic nutrition",
            covers: vec![PlanDomain::Nutrition, PlanDomain::Supplements],
            calls: vec![
                ("get_user_profile", json!({})),
                ("get_food_journal", json!({})),
            ],
            llm,
            data,
        }
    }

    pub fn fitness_coach(llm: Arc<dyn LlmClient>, data: Arc<dyn DataSource>) -> Self {
        Self {
            name: FITNESS_COACH,
            role: "Certified fitness coach",
            covers: vec![PlanDomain::Fitness],
            calls: vec![
                ("get_activity_log", json!({})),
                ("get_workout_plan", json!({"goal": "Cardio"})),
            ],
            llm,
            data,
        }
    }

    pub fn sleep_doctor(llm: Arc<dyn LlmClient>, data: Arc<dyn DataSource>) -> Self {
        Self {
            name: SLEEP_DOCTOR,
            role: "Sleep medicine specialist",
            covers: vec![PlanDomain::Sleep],
            calls: vec![("get_sleep_data", json!({}))],
            llm,
            data,
        }
    }

    pub fn mindfulness_coach(llm: Arc<dyn LlmClient>, data: Arc<dyn DataSource>) -> Self {
        Self {
            name: MINDFULNESS_COACH,
            role: "Mindfulness and stress-management coach",
            covers: vec![PlanDomain::Mindfulness],
            calls: vec![("get_user_profile", json!({}))],
            llm,
            data,
        }
    }

    fn primary(&self) -> PlanDomain {
        self.covers[0]
    }
}

#[async_trait]
impl Worker for SpecialistWorker {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &SharedContext) -> Result<Handoff, MeshError> {
        // 数据打底：失败不阻断出计划，只是少了依据
        let mut gathered = Vec::new();
        for (call, args) in &self.calls {
            match cached_call(ctx, &self.data, self.name, call, args).await {
                Ok(result) => gathered.push(format!("{}: {}", call, result)),
                Err(e) => {
                    tracing::warn!("{} data call {} failed: {}", self.name, call, e);
                    let mut c = ctx.lock().await;
                    c.add_trace(format!("{}: call {} failed", self.name, call));
                }
            }
        }

        let (findings, goal) = {
            let c = ctx.lock().await;
            (c.accumulated_findings.join("\n"), c.user_intent.clone())
        };

        let label = self.primary().label();
        let prompt = format!(
            "User goal: {}\n\nFindings so far:\n{}\n\nRelevant data:\n{}\n\n\
             Write a concise, specific {} plan with concrete numbers and portions.",
            goal,
            findings,
            gathered.join("\n"),
            label
        );
        let messages = vec![
            Message::system(format!("You are a {}.", self.role)),
            Message::user(prompt),
        ];
        let plan_text = match self.llm.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("{} generation degraded: {}", self.name, e);
                format!("{} plan prepared from the latest data on file.", label)
            }
        };

        let mut c = ctx.lock().await;
        c.add_finding(self.name, format!("{} plan: {}", label, plan_text));
        c.signal_domain(self.name, self.primary(), DomainStatus::Completed);
        // 顺带领域（如营养师兼管补剂）只在本回合仍欠时销账
        for domain in self.covers.iter().skip(1) {
            if c.pending_plan_domains.contains(domain) {
                c.signal_domain(self.name, *domain, DomainStatus::Completed);
            }
        }

        Ok(Handoff::to(CRITIC))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::context::ConversationContext;
    use crate::data::StaticDataSource;
    use crate::llm::ScriptedLlmClient;

    fn shared_ctx() -> SharedContext {
        let mut ctx = ConversationContext::new("lower cholesterol");
        ctx.begin_turn("I want a plan");
        Arc::new(tokio::sync::Mutex::new(ctx))
    }

    #[tokio::test]
    async fn test_specialist_signals_completion_and_hands_to_critic() {
        let data: Arc<dyn DataSource> = Arc::new(StaticDataSource::new(HashMap::from([
            ("get_sleep_data".to_string(), json!([{"date": "2025-01-14", "hours": 5.9}])),
        ])));
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            "Wind down at 22:30, no screens after 22:00.".to_string(),
        ]));
        let worker = SpecialistWorker::sleep_doctor(llm, data);

        let ctx = shared_ctx();
        let handoff = worker.run(&ctx).await.unwrap();

        assert_eq!(handoff, Handoff::to(CRITIC));
        let c = ctx.lock().await;
        assert!(c.plan_domain_flags[&PlanDomain::Sleep]);
        assert_eq!(c.completed_this_turn, vec![PlanDomain::Sleep]);
        assert!(c
            .accumulated_findings
            .iter()
            .any(|f| f.starts_with("[Sleep Doctor]: sleep plan:")));
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_fallback_text() {
        let data: Arc<dyn DataSource> = Arc::new(StaticDataSource::new(HashMap::new()));
        let worker =
            SpecialistWorker::mindfulness_coach(Arc::new(ScriptedLlmClient::failing()), data);

        let ctx = shared_ctx();
        worker.run(&ctx).await.unwrap();

        let c = ctx.lock().await;
        assert!(c.plan_domain_flags[&PlanDomain::Mindfulness]);
        assert!(c
            .accumulated_findings
            .iter()
            .any(|f| f.contains("mindfulness plan prepared from the latest data")));
    }

    #[tokio::test]
    async fn test_nutritionist_settles_pending_supplements() {
        let data: Arc<dyn DataSource> = Arc::new(StaticDataSource::new(HashMap::new()));
        let worker = SpecialistWorker::nutritionist(Arc::new(ScriptedLlmClient::failing()), data);

        let ctx = shared_ctx();
        {
            let mut c = ctx.lock().await;
            c.register_plan_dispatch(&[PlanDomain::Nutrition, PlanDomain::Supplements]);
        }
        worker.run(&ctx).await.unwrap();

        let c = ctx.lock().await;
        assert!(c.plan_domain_flags[&PlanDomain::Supplements]);
        assert!(c.pending_plan_domains.is_empty());
    }
}
