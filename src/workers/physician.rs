//! 医师 worker：生化指标解读
//!
//! 拉取血检数据（经调用缓存），按固定阈值推导风险旗标，把带具体数值的发现
//! 写进上下文。检出心血管风险且用户要计划时，默认扇出到营养师 + 健身教练。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::context::SharedContext;
use crate::core::domain::{CRITIC, FITNESS_COACH, NUTRITIONIST, PHYSICIAN};
use crate::core::error::MeshError;
use crate::data::{cached_call, DataSource};
use crate::mesh::{Handoff, Worker};

pub struct PhysicianWorker {
    data: Arc<dyn DataSource>,
}

impl PhysicianWorker {
    pub fn new(data: Arc<dyn DataSource>) -> Self {
        Self { data }
    }
}

/// "167 (calc)" / "26 ng/mL" / 数字 -> 数值
fn safe_float(value: &Value) -> Option<f64> {
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    let s = value.as_str()?;
    s.split_whitespace()
        .next()?
        .trim_end_matches('%')
        .parse()
        .ok()
}

/// 单个指标的读数
struct Reading {
    name: String,
    value: f64,
}

fn readings(biomarkers: &Value) -> Vec<Reading> {
    let Some(items) = biomarkers.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_lowercase();
            let value = safe_float(item.get("value")?)?;
            Some(Reading { name, value })
        })
        .collect()
}

#[async_trait]
impl Worker for PhysicianWorker {
    fn name(&self) -> &str {
        PHYSICIAN
    }

    async fn run(&self, ctx: &SharedContext) -> Result<Handoff, MeshError> {
        let biomarkers = match cached_call(ctx, &self.data, PHYSICIAN, "get_biomarkers", &json!({})).await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Physician data call failed: {}", e);
                let mut c = ctx.lock().await;
                c.add_trace(format!("{}: data unavailable, deferring to {}", PHYSICIAN, CRITIC));
                return Ok(Handoff::to(CRITIC));
            }
        };

        let mut c = ctx.lock().await;
        let mut ldl = None;
        let mut trig = None;
        let mut apo = None;
        let mut ratio = None;
        let mut vitd = None;
        let mut lipase = None;

        for r in readings(&biomarkers) {
            if r.name.contains("ldl") && r.name.contains("low-density") {
                ldl = Some(r.value);
            } else if r.name.contains("triglyceride") {
                trig = Some(r.value);
            } else if r.name.contains("apolipoprotein b") {
                apo = Some(r.value);
            } else if r.name.contains("cholesterol / hdl") {
                ratio = Some(r.value);
            } else if r.name.contains("vitamin d") {
                vitd = Some(r.value);
            } else if r.name.contains("lipase") {
                lipase = Some(r.value);
            }
        }

        let high_cardio = ldl.is_some_and(|v| v >= 130.0)
            || apo.is_some_and(|v| v >= 100.0)
            || ratio.is_some_and(|v| v >= 5.0)
            || trig.is_some_and(|v| v >= 150.0);

        if high_cardio {
            c.set_flag("high_cardio_risk", true);
            c.set_flag("needs_meal_widget", true);
            c.set_flag("needs_workout_widget", true);
        }
        if vitd.is_some_and(|v| v < 40.0) {
            c.set_flag("vitd_low", true);
            c.set_flag("needs_supp_widget", true);
        }
        if lipase.is_some_and(|v| v > 60.0) {
            c.set_flag("lipase_high", true);
        }

        let mut noted = Vec::new();
        if let Some(v) = ldl {
            noted.push(format!("LDL {} mg/dL (optimal <100)", v));
        }
        if let Some(v) = apo {
            noted.push(format!("ApoB {} mg/dL (optimal 40-90)", v));
        }
        if let Some(v) = trig {
            noted.push(format!("Triglycerides {} mg/dL (optimal <150)", v));
        }
        if let Some(v) = vitd {
            noted.push(format!("Vitamin D {} ng/mL (optimal 40-80)", v));
        }
        if noted.is_empty() {
            c.add_finding(PHYSICIAN, "No biomarker readings available for review.");
        } else {
            c.add_finding(PHYSICIAN, format!("Biomarker review: {}", noted.join("; ")));
        }

        // 心血管风险 + 计划意图：默认送去生活方式干预的两个专科
        if high_cardio && c.state.intent == "plan" {
            c.add_trace(format!(
                "{}: cardio risk, routing to {} + {}",
                PHYSICIAN, NUTRITIONIST, FITNESS_COACH
            ));
            return Ok(Handoff::parallel([NUTRITIONIST, FITNESS_COACH]));
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

    fn biomarker_docs() -> HashMap<String, Value> {
        HashMap::from([(
            "get_biomarkers".to_string(),
            json!([
                {"name": "LDL (Low-Density Lipoprotein)", "value": "167 (calc)"},
                {"name": "Apolipoprotein B", "value": "132"},
                {"name": "Vitamin D, 25-OH", "value": "26 ng/mL"},
            ]),
        )])
    }

    async fn run_physician(docs: HashMap<String, Value>, intent: &str) -> (Handoff, SharedContext) {
        let data: Arc<dyn DataSource> = Arc::new(StaticDataSource::new(docs));
        let mut ctx = ConversationContext::new("test");
        ctx.begin_turn("check my levels");
        ctx.state.intent = intent.to_string();
        let shared: SharedContext = Arc::new(tokio::sync::Mutex::new(ctx));
        let handoff = PhysicianWorker::new(data).run(&shared).await.unwrap();
        (handoff, shared)
    }

    #[tokio::test]
    async fn test_risk_flags_derived_from_values() {
        let (_, ctx) = run_physician(biomarker_docs(), "diagnosis").await;
        let c = ctx.lock().await;
        assert!(c.get_flag("high_cardio_risk"));
        assert!(c.get_flag("needs_meal_widget"));
        assert!(c.get_flag("vitd_low"));
        assert!(c
            .accumulated_findings
            .iter()
            .any(|f| f.contains("LDL 167")));
    }

    #[tokio::test]
    async fn test_plan_intent_with_risk_fans_out() {
        let (handoff, _) = run_physician(biomarker_docs(), "plan").await;
        assert_eq!(handoff, Handoff::parallel([NUTRITIONIST, FITNESS_COACH]));
    }

    #[tokio::test]
    async fn test_diagnosis_intent_hands_to_critic() {
        let (handoff, _) = run_physician(biomarker_docs(), "diagnosis").await;
        assert_eq!(handoff, Handoff::to(CRITIC));
    }

    #[tokio::test]
    async fn test_data_failure_defers_to_critic() {
        let (handoff, ctx) = run_physician(HashMap::new(), "plan").await;
        assert_eq!(handoff, Handoff::to(CRITIC));
        let c = ctx.lock().await;
        assert!(c.trace.iter().any(|t| t.contains("data unavailable")));
    }
}
