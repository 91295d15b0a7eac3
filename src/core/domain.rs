//! Worker 花名册常量与专科计划领域
//!
//! 路由拓扑是固定的：一组命名 worker + 一个终止综合者，领域 -> 专科 worker 的归属
//! 也是拓扑的一部分。关键词扫描只服务于路由与「部分确认」，完成度判定走类型化信号。

use serde::{Deserialize, Serialize};

pub const GUARDRAIL: &str = "Guardrail";
pub const PLANNER: &str = "Conversation Planner";
pub const PHYSICIAN: &str = "Physician";
pub const NUTRITIONIST: &str = "Nutritionist";
pub const FITNESS_COACH: &str = "Fitness Coach";
pub const SLEEP_DOCTOR: &str = "Sleep Doctor";
pub const MINDFULNESS_COACH: &str = "Mindfulness Coach";
pub const USER_PERSONA: &str = "User Persona";
pub const CRITIC: &str = "Critic";

/// 终止哨兵（不是 worker 名，调度器据此结束回合）
pub const STOP: &str = "STOP";

/// 专科计划领域（plan_domain_flags 的固定键集合）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanDomain {
    Nutrition,
    Fitness,
    Sleep,
    Mindfulness,
    Supplements,
}

impl PlanDomain {
    pub const ALL: [PlanDomain; 5] = [
        PlanDomain::Nutrition,
        PlanDomain::Fitness,
        PlanDomain::Sleep,
        PlanDomain::Mindfulness,
        PlanDomain::Supplements,
    ];

    /// 领域归属的专科 worker
    pub fn owner(&self) -> &'static str {
        match self {
            PlanDomain::Nutrition => NUTRITIONIST,
            PlanDomain::Fitness => FITNESS_COACH,
            PlanDomain::Sleep => SLEEP_DOCTOR,
            PlanDomain::Mindfulness => MINDFULNESS_COACH,
            // 补剂计划由营养师顺带产出，没有独立 worker
            PlanDomain::Supplements => NUTRITIONIST,
        }
    }

    /// worker -> 主领域（调度器补登多目标派发时的反查；营养师反查为 Nutrition）
    pub fn of_worker(name: &str) -> Option<PlanDomain> {
        match name {
            NUTRITIONIST => Some(PlanDomain::Nutrition),
            FITNESS_COACH => Some(PlanDomain::Fitness),
            SLEEP_DOCTOR => Some(PlanDomain::Sleep),
            MINDFULNESS_COACH => Some(PlanDomain::Mindfulness),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanDomain::Nutrition => "nutrition",
            PlanDomain::Fitness => "fitness",
            PlanDomain::Sleep => "sleep",
            PlanDomain::Mindfulness => "mindfulness",
            PlanDomain::Supplements => "supplements",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            PlanDomain::Nutrition => &[
                "diet", "nutrition", "food", "eat", "meal", "cholesterol", "ldl",
            ],
            PlanDomain::Fitness => &["exercise", "workout", "fitness", "cardio", "training"],
            PlanDomain::Sleep => &["sleep", "insomnia", "tired", "rest"],
            PlanDomain::Mindfulness => &["stress", "meditat", "anxiety", "relax", "mindful"],
            PlanDomain::Supplements => &["supplement", "vitamin"],
        }
    }

    /// 从用户话语中扫描被点名的领域（固定顺序，去重）
    pub fn scan(text: &str) -> Vec<PlanDomain> {
        let lower = text.to_lowercase();
        Self::ALL
            .into_iter()
            .filter(|d| d.keywords().iter().any(|kw| lower.contains(kw)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_picks_named_domains() {
        let domains = PlanDomain::scan("I want a plan for cholesterol and sleep");
        assert_eq!(domains, vec![PlanDomain::Nutrition, PlanDomain::Sleep]);
    }

    #[test]
    fn test_scan_maps_tiredness_to_sleep() {
        let domains = PlanDomain::scan("I've been so tired lately");
        assert_eq!(domains, vec![PlanDomain::Sleep]);
    }

    #[test]
    fn test_scan_empty_for_generic_request() {
        assert!(PlanDomain::scan("Give me a plan").is_empty());
    }

    #[test]
    fn test_supplements_owned_by_nutritionist() {
        assert_eq!(PlanDomain::Supplements.owner(), NUTRITIONIST);
        // 反查只返回主领域
        assert_eq!(
            PlanDomain::of_worker(NUTRITIONIST),
            Some(PlanDomain::Nutrition)
        );
    }
}
