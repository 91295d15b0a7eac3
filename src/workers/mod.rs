//! 固定 worker 集合
//!
//! 守卫（安全筛查）、会话规划（纯路由）、医师（生化指标）、四个专科
//! （营养/健身/睡眠/正念）、用户画像与综合者。拓扑固定，不可由用户编程；
//! 能力描述表只喂给 prose 生成（同伴花名册），调度决策从不读它。

mod critic;
mod guardrail;
mod persona;
mod physician;
mod planner;
mod specialist;

pub use critic::CriticWorker;
pub use guardrail::GuardrailWorker;
pub use persona::UserPersonaWorker;
pub use physician::PhysicianWorker;
pub use planner::PlannerWorker;
pub use specialist::SpecialistWorker;

use std::sync::Arc;

use crate::core::domain::{
    PlanDomain, CRITIC, FITNESS_COACH, GUARDRAIL, MINDFULNESS_COACH, NUTRITIONIST, PHYSICIAN,
    PLANNER, SLEEP_DOCTOR, USER_PERSONA,
};
use crate::data::DataSource;
use crate::llm::LlmClient;
use crate::mesh::WorkerRegistry;

/// worker 能力一览（展示顺序固定）
const CAPABILITIES: [(&str, &str); 9] = [
    (
        GUARDRAIL,
        "Safety screening: emergencies stop the turn before anything else runs.",
    ),
    (
        PLANNER,
        "Routing only: understands what the user wants and picks the right specialists.",
    ),
    (
        PHYSICIAN,
        "Medical analysis, biomarker interpretation, reviewing blood work, identifying health risks.",
    ),
    (
        NUTRITIONIST,
        "Dietary planning, food journal analysis, macronutrient advice, meal plans.",
    ),
    (
        FITNESS_COACH,
        "Workout plans, exercise routines, activity analysis, heart rate zones.",
    ),
    (
        SLEEP_DOCTOR,
        "Sleep hygiene, sleep stage analysis, improving sleep quality.",
    ),
    (
        MINDFULNESS_COACH,
        "Stress reduction, meditation, mental wellness.",
    ),
    (
        USER_PERSONA,
        "Represents the user's preferences, goals, and profile data.",
    ),
    (
        CRITIC,
        "Final synthesis, safety check, formatting the response for the user.",
    ),
];

/// 同伴花名册 prose（供需要自述团队的 worker 与外层 UX 使用）
pub fn roster_text() -> String {
    let mut prose =
        String::from("You are part of a collaborative mesh. Here are your peers and their capabilities:\n");
    for (name, desc) in CAPABILITIES {
        prose.push_str(&format!("- **{}**: {}\n", name, desc));
    }
    prose
}

/// 装配全部 worker 并注册能力描述
pub fn create_workers(llm: Arc<dyn LlmClient>, data: Arc<dyn DataSource>) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();

    registry.register(Arc::new(GuardrailWorker::new()));
    registry.register(Arc::new(PlannerWorker::new()));
    registry.register(Arc::new(PhysicianWorker::new(data.clone())));
    registry.register(Arc::new(SpecialistWorker::nutritionist(llm.clone(), data.clone())));
    registry.register(Arc::new(SpecialistWorker::fitness_coach(llm.clone(), data.clone())));
    registry.register(Arc::new(SpecialistWorker::sleep_doctor(llm.clone(), data.clone())));
    registry.register(Arc::new(SpecialistWorker::mindfulness_coach(llm.clone(), data.clone())));
    registry.register(Arc::new(UserPersonaWorker::new(data.clone())));
    registry.register(Arc::new(
        CriticWorker::new(llm, data).with_roster(roster_text()),
    ));

    registry
}

/// 综合计划 offer 的默认目标集合（全领域归属，去重）
pub fn comprehensive_targets() -> Vec<String> {
    let mut targets = Vec::new();
    for domain in PlanDomain::ALL {
        let owner = domain.owner().to_string();
        if !targets.contains(&owner) {
            targets.push(owner);
        }
    }
    targets
}
