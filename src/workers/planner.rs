//! 会话规划 worker：纯路由
//!
//! 只看状态与最新话语决定把用户送到哪些专科，自己不取数、不产出用户可见文本，
//! 因此是投机执行的合格候选（至多写 trace）。多领域派发的登记由调度器统一完成。

use async_trait::async_trait;

use crate::core::context::SharedContext;
use crate::core::domain::{
    PlanDomain, CRITIC, FITNESS_COACH, MINDFULNESS_COACH, PHYSICIAN, PLANNER, USER_PERSONA,
};
use crate::core::error::MeshError;
use crate::mesh::{Handoff, Worker};

pub struct PlannerWorker;

impl PlannerWorker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlannerWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for PlannerWorker {
    fn name(&self) -> &str {
        PLANNER
    }

    fn speculation_safe(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &SharedContext) -> Result<Handoff, MeshError> {
        let mut c = ctx.lock().await;
        let input = c.last_user_text().unwrap_or_default().to_string();
        let (intent, focus) = (c.state.intent.clone(), c.state.focus.clone());

        let handoff = if intent == "plan" || focus == "plan" {
            let named = PlanDomain::scan(&input);
            if named.is_empty() {
                // 综合计划但未点名领域：让综合者向用户确认覆盖范围
                Handoff::to(CRITIC)
            } else {
                let mut targets: Vec<String> = Vec::new();
                for d in &named {
                    let owner = d.owner().to_string();
                    if !targets.contains(&owner) {
                        targets.push(owner);
                    }
                }
                Handoff::Next(targets)
            }
        } else if focus == "wellbeing" {
            Handoff::to(MINDFULNESS_COACH)
        } else if focus == "progress" {
            Handoff::to(USER_PERSONA)
        } else if focus == "acceleration" {
            Handoff::to(FITNESS_COACH)
        } else {
            Handoff::to(PHYSICIAN)
        };

        if let Handoff::Next(targets) = &handoff {
            c.add_trace(format!("{}: route -> [{}]", PLANNER, targets.join(", ")));
        }
        Ok(handoff)
    }
}
