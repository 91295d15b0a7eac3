//! 会话状态机
//!
//! 由最新用户话语与先前状态推导 (stage, intent, focus, pending_offer) 四元组；
//! 「挂牌 -> 确认/婉拒/缩小范围」的确认协议在这里实现，路由本身交给调度器。

use serde::{Deserialize, Serialize};

use crate::classify::{Classification, ConfirmationStatus};

use super::context::ConversationContext;
use super::domain::PlanDomain;

/// 会话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Triage,
    Diagnosis,
    AwaitingConfirmation,
    PlanDelivery,
}

/// 会话状态值对象
#[derive(Clone, Debug)]
pub struct ConversationState {
    pub stage: Stage,
    pub intent: String,
    pub focus: String,
    /// 已向用户提出、等待确认/婉拒的 offer 标签
    pub pending_offer: Option<String>,
    /// offer 关联的 worker 集合
    pub offer_targets: Vec<String>,
    /// 确认后待执行的 worker 集合（仅在 PlanDelivery 阶段非空）
    pub confirmed_targets: Vec<String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            stage: Stage::Triage,
            intent: "diagnosis".to_string(),
            focus: "diagnosis".to_string(),
            pending_offer: None,
            offer_targets: Vec::new(),
            confirmed_targets: Vec::new(),
        }
    }
}

impl ConversationState {
    /// 挂牌一个 offer 并进入等待确认阶段
    pub fn register_offer(&mut self, label: impl Into<String>, targets: Vec<String>) {
        self.pending_offer = Some(label.into());
        self.offer_targets = dedup(targets);
        self.stage = Stage::AwaitingConfirmation;
    }

    /// 确认 offer：目标集合转正，进入计划交付阶段
    pub fn confirm_offer(&mut self) {
        self.confirmed_targets = std::mem::take(&mut self.offer_targets);
        self.pending_offer = None;
        self.stage = Stage::PlanDelivery;
        self.intent = "plan".to_string();
        self.focus = "plan".to_string();
    }

    /// 婉拒 offer：回到诊断阶段
    pub fn clear_offer(&mut self) {
        self.pending_offer = None;
        self.offer_targets.clear();
        self.stage = Stage::Diagnosis;
    }

    /// 计划交付完毕：清空已确认目标（保持 confirmed_targets ⇒ PlanDelivery 不变量）
    pub fn complete_delivery(&mut self) {
        self.confirmed_targets.clear();
        self.stage = Stage::Diagnosis;
    }
}

/// 状态机入口：消费上一轮状态、原始输入与外部分类结果，就地产生新状态。
///
/// 等待确认阶段的输入被映射为 确认/婉拒/部分领域请求/不明确 四类；
/// 其余阶段直接采纳分类结果，并把 stage 复位为 Triage（已在确认或交付中的除外）。
pub fn update_state(ctx: &mut ConversationContext, input: &str, cls: &Classification) {
    if ctx.state.stage == Stage::AwaitingConfirmation && ctx.state.pending_offer.is_some() {
        let named = PlanDomain::scan(input);
        let offered: Vec<PlanDomain> = ctx
            .state
            .offer_targets
            .iter()
            .filter_map(|t| PlanDomain::of_worker(t))
            .collect();

        // 用户点名了子领域：缩小范围重新挂牌并立即确认
        if !named.is_empty() && named != offered {
            let label = ctx.state.pending_offer.clone().unwrap_or_default();
            let targets = named.iter().map(|d| d.owner().to_string()).collect();
            ctx.state.register_offer(label, targets);
            ctx.state.confirm_offer();
            ctx.register_plan_dispatch(&named);
            ctx.add_trace(format!(
                "offer narrowed and confirmed: [{}]",
                named.iter().map(|d| d.label()).collect::<Vec<_>>().join(", ")
            ));
            return;
        }

        match cls.confirmation_status {
            ConfirmationStatus::Yes => {
                ctx.state.confirm_offer();
                let domains: Vec<PlanDomain> = ctx
                    .state
                    .confirmed_targets
                    .iter()
                    .filter_map(|t| PlanDomain::of_worker(t))
                    .collect();
                ctx.register_plan_dispatch(&domains);
                ctx.add_trace("offer confirmed");
            }
            ConfirmationStatus::No => {
                ctx.state.clear_offer();
                ctx.add_trace("offer declined");
            }
            // 不明确：保持等待，不推进阶段
            _ => ctx.add_trace("offer response unclear, still waiting"),
        }
        return;
    }

    ctx.state.intent = cls.intent.clone();
    ctx.state.focus = cls.focus.clone();
    if !matches!(ctx.state.stage, Stage::AwaitingConfirmation | Stage::PlanDelivery) {
        ctx.state.stage = Stage::Triage;
    }
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for n in names {
        if !seen.contains(&n) {
            seen.push(n);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{FITNESS_COACH, NUTRITIONIST, SLEEP_DOCTOR};

    fn confirmation(status: ConfirmationStatus) -> Classification {
        Classification {
            confirmation_status: status,
            ..Classification::fallback()
        }
    }

    fn offered_ctx() -> ConversationContext {
        let mut ctx = ConversationContext::new("test");
        ctx.state.register_offer(
            "comprehensive_plan",
            vec![
                NUTRITIONIST.to_string(),
                FITNESS_COACH.to_string(),
                SLEEP_DOCTOR.to_string(),
            ],
        );
        ctx
    }

    #[test]
    fn test_confirm_copies_targets_and_enters_delivery() {
        let mut ctx = offered_ctx();
        update_state(&mut ctx, "yes please", &confirmation(ConfirmationStatus::Yes));

        assert_eq!(ctx.state.stage, Stage::PlanDelivery);
        assert_eq!(
            ctx.state.confirmed_targets,
            vec![NUTRITIONIST, FITNESS_COACH, SLEEP_DOCTOR]
        );
        assert!(ctx.state.pending_offer.is_none());
        assert_eq!(ctx.state.intent, "plan");
        assert!(ctx.pending_plan_domains.contains(&PlanDomain::Nutrition));
        assert!(ctx.pending_plan_domains.contains(&PlanDomain::Sleep));
    }

    #[test]
    fn test_decline_reverts_to_diagnosis() {
        let mut ctx = offered_ctx();
        update_state(&mut ctx, "no thanks", &confirmation(ConfirmationStatus::No));

        assert_eq!(ctx.state.stage, Stage::Diagnosis);
        assert!(ctx.state.pending_offer.is_none());
        assert!(ctx.state.confirmed_targets.is_empty());
    }

    #[test]
    fn test_partial_domain_request_narrows_and_confirms() {
        let mut ctx = offered_ctx();
        update_state(
            &mut ctx,
            "Actually, I just want to focus on my diet for now",
            &confirmation(ConfirmationStatus::Clarifying),
        );

        assert_eq!(ctx.state.stage, Stage::PlanDelivery);
        assert_eq!(ctx.state.confirmed_targets, vec![NUTRITIONIST]);
        assert!(ctx.pending_plan_domains.contains(&PlanDomain::Nutrition));
        assert!(!ctx.pending_plan_domains.contains(&PlanDomain::Sleep));
    }

    #[test]
    fn test_unclear_keeps_waiting() {
        let mut ctx = offered_ctx();
        update_state(&mut ctx, "hmm what do you mean", &confirmation(ConfirmationStatus::Clarifying));

        assert_eq!(ctx.state.stage, Stage::AwaitingConfirmation);
        assert!(ctx.state.pending_offer.is_some());
    }

    #[test]
    fn test_plain_input_resets_to_triage() {
        let mut ctx = ConversationContext::new("test");
        ctx.state.stage = Stage::Diagnosis;
        let cls = Classification {
            focus: "plan".to_string(),
            intent: "plan".to_string(),
            ..Classification::fallback()
        };
        update_state(&mut ctx, "I want a plan", &cls);

        assert_eq!(ctx.state.stage, Stage::Triage);
        assert_eq!(ctx.state.focus, "plan");
    }
}
