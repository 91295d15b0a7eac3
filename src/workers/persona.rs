//! 用户画像 worker
//!
//! 把用户档案预取进调用缓存并落一条画像发现。幂等（重复运行不叠加发现），
//! 也不产出用户可见消息，因此是进度类焦点下的投机预取候选。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::core::context::SharedContext;
use crate::core::domain::{CRITIC, USER_PERSONA};
use crate::core::error::MeshError;
use crate::data::{cached_call, DataSource};
use crate::mesh::{Handoff, Worker};

pub struct UserPersonaWorker {
    data: Arc<dyn DataSource>,
}

impl UserPersonaWorker {
    pub fn new(data: Arc<dyn DataSource>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl Worker for UserPersonaWorker {
    fn name(&self) -> &str {
        USER_PERSONA
    }

    fn speculation_safe(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &SharedContext) -> Result<Handoff, MeshError> {
        let profile = match cached_call(ctx, &self.data, USER_PERSONA, "get_user_profile", &json!({})).await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("User profile unavailable: {}", e);
                return Ok(Handoff::to(CRITIC));
            }
        };

        let mut c = ctx.lock().await;
        let tag = format!("[{}]", USER_PERSONA);
        if !c.accumulated_findings.iter().any(|f| f.starts_with(&tag)) {
            c.add_finding(USER_PERSONA, format!("Profile on file: {}", profile));
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

    #[tokio::test]
    async fn test_persona_finding_is_idempotent() {
        let data: Arc<dyn DataSource> = Arc::new(StaticDataSource::new(HashMap::from([(
            "get_user_profile".to_string(),
            json!({"age": 42, "goal": "lower LDL"}),
        )])));
        let worker = UserPersonaWorker::new(data);

        let mut ctx = ConversationContext::new("test");
        ctx.begin_turn("how am i doing?");
        let shared: SharedContext = Arc::new(tokio::sync::Mutex::new(ctx));

        worker.run(&shared).await.unwrap();
        worker.run(&shared).await.unwrap();

        let c = shared.lock().await;
        let persona_findings = c
            .accumulated_findings
            .iter()
            .filter(|f| f.starts_with("[User Persona]"))
            .count();
        assert_eq!(persona_findings, 1);
    }
}
