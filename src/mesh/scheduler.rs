//! 网状调度器：回合处理主循环
//!
//! 安全 worker 永远最先执行且结论优先；其余 worker 按移交指令串行或并行推进。
//! 循环守卫、跳数预算与领域完成检查共同保证回合必然终止：
//! 前两者防失控路由，后者防专科领域尚欠时提前触达综合者。
//! 投机执行只是延迟优化，只有声明了 speculation_safe 的 worker 才会被提前启动。

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::core::context::{ConversationContext, SharedContext};
use crate::core::domain::{PlanDomain, CRITIC, GUARDRAIL, PLANNER, STOP, USER_PERSONA};
use crate::core::error::MeshError;
use crate::core::state::Stage;

use super::registry::WorkerRegistry;
use super::worker::Handoff;

type WorkerHandle = JoinHandle<Result<Handoff, MeshError>>;

pub struct MeshScheduler {
    registry: Arc<WorkerRegistry>,
    hop_budget: u32,
    loop_threshold: usize,
    speculation: bool,
    /// 有界执行池：并行扇出与投机任务共用
    pool: Arc<Semaphore>,
}

impl MeshScheduler {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        hop_budget: u32,
        loop_threshold: usize,
        max_parallel: usize,
        speculation: bool,
    ) -> Self {
        Self {
            registry,
            hop_budget,
            loop_threshold,
            speculation,
            pool: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// 执行一个回合：安全检查 -> 入口 worker 集 -> 网格循环 -> 最终回复
    pub async fn run_turn(&self, ctx: &SharedContext) -> Result<String, MeshError> {
        // 安全 worker 先行派出
        let guardrail = self
            .registry
            .get(GUARDRAIL)
            .ok_or_else(|| MeshError::UnknownWorker(GUARDRAIL.to_string()))?;
        let guard_handle = self.spawn_worker(guardrail, ctx.clone());

        // 路由未确认前的投机启动（只读幂等的 worker 才有资格）
        let mut speculative: HashMap<String, WorkerHandle> = HashMap::new();
        if self.speculation {
            for name in self.predict_entry(ctx).await {
                let Some(worker) = self.registry.get(&name) else { continue };
                if !worker.speculation_safe() {
                    continue;
                }
                trace(ctx, format!("speculative start: {}", name)).await;
                speculative.insert(name, self.spawn_worker(worker, ctx.clone()));
            }
        }

        // 唯一的强顺序保证：安全结论出来之前不走确定性路径
        let verdict = match guard_handle.await {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => {
                trace(ctx, format!("{}: failed: {}", GUARDRAIL, e)).await;
                Handoff::Next(Vec::new())
            }
            Err(e) => {
                trace(ctx, format!("{}: panicked: {}", GUARDRAIL, e)).await;
                Handoff::Next(Vec::new())
            }
        };

        if verdict == Handoff::Stop {
            discard_speculative(ctx, speculative).await;
            let mut c = ctx.lock().await;
            c.add_trace("safety stop: turn ends with guardrail reply");
            return Ok(final_reply(&c));
        }

        let reseeded = {
            let mut c = ctx.lock().await;
            seed_focus_from_status(&mut c)
        };
        // 焦点被安全状态行改写过：投机跑的路由结论已经失效，不再认领
        if reseeded {
            if let Some(handle) = speculative.remove(PLANNER) {
                handle.abort();
                trace(ctx, format!("speculative discard: {} (focus reseeded)", PLANNER)).await;
            }
        }

        // 确定性入口
        let mut current = self.entry_workers(ctx).await;
        {
            let mut c = ctx.lock().await;
            c.add_trace(format!("entry -> [{}]", current.join(", ")));
            let entry_domains = owned_domains(&current);
            if entry_domains.len() > 1 {
                c.register_plan_dispatch(&entry_domains);
            }
        }

        // 网格循环
        let mut executed: Vec<String> = Vec::new();
        loop {
            current.retain(|n| n != STOP);
            if current.is_empty() {
                trace(ctx, "terminal: no further routing").await;
                break;
            }

            {
                let mut c = ctx.lock().await;
                if c.hop_count >= self.hop_budget {
                    c.add_trace("hop budget exhausted");
                    break;
                }
                c.hop_count += 1;
            }

            // 未知 worker 名 -> 综合者（失败安全默认）
            current = {
                let mut c = ctx.lock().await;
                let mut replaced = Vec::new();
                for name in current {
                    if self.registry.contains(&name) {
                        if !replaced.contains(&name) {
                            replaced.push(name);
                        }
                    } else {
                        c.add_trace(format!("unknown worker {} -> {}", name, CRITIC));
                        if !replaced.contains(&CRITIC.to_string()) {
                            replaced.push(CRITIC.to_string());
                        }
                    }
                }
                replaced
            };

            // 循环守卫：同名 worker 重复出场达到阈值，强制转入综合
            let repeated = current
                .iter()
                .find(|n| executed.iter().filter(|e| e == n).count() >= self.loop_threshold)
                .cloned();
            if let Some(name) = repeated {
                if current != [CRITIC] {
                    let mut c = ctx.lock().await;
                    c.add_trace(format!("loop guard: {} repeated, forcing {}", name, CRITIC));
                    c.add_finding(
                        "system",
                        "Loop prevention activated - routing directly to Critic for final synthesis",
                    );
                    current = vec![CRITIC.to_string()];
                }
            }

            {
                let mut c = ctx.lock().await;
                let trace_msg = format!("hop {}: run [{}]", c.hop_count, current.join(", "));
                c.add_trace(trace_msg);
            }
            executed.extend(current.iter().cloned());

            let handoffs = self.execute_set(&current, ctx, &mut speculative).await;

            // 合并去重（保留首次出现顺序）；Stop 不贡献后继
            let mut next: Vec<String> = Vec::new();
            for h in handoffs {
                if let Handoff::Next(names) = h {
                    for n in names {
                        if n != STOP && !next.contains(&n) {
                            next.push(n);
                        }
                    }
                }
            }

            {
                let mut c = ctx.lock().await;

                // 多目标专科派发登记
                let dispatch_domains = owned_domains(&next);
                if dispatch_domains.len() > 1 {
                    c.register_plan_dispatch(&dispatch_domains);
                }

                // 领域完成检查：尚欠专科领域时不放行综合者，并补回缺席的归属 worker
                if !c.pending_plan_domains.is_empty() {
                    if next.iter().any(|n| n == CRITIC) {
                        next.retain(|n| n != CRITIC);
                        c.add_trace(format!("dependency guard: deferred {}", CRITIC));
                    }
                    for domain in c.pending_plan_domains.clone() {
                        let owner = domain.owner();
                        if !next.iter().any(|n| n == owner) {
                            next.push(owner.to_string());
                            c.add_trace(format!("dependency guard: re-added {}", owner));
                        }
                    }
                }

                if !next.is_empty() {
                    c.add_trace(format!("next -> [{}]", next.join(", ")));
                }
            }

            current = next;
        }

        discard_speculative(ctx, speculative).await;

        let mut c = ctx.lock().await;
        if c.state.stage == Stage::PlanDelivery && c.pending_plan_domains.is_empty() {
            c.state.complete_delivery();
            c.add_trace("plan delivery complete, stage -> diagnosis");
        }
        Ok(final_reply(&c))
    }

    /// 从状态推导确定性入口 worker 集
    async fn entry_workers(&self, ctx: &SharedContext) -> Vec<String> {
        let c = ctx.lock().await;
        if c.state.stage == Stage::PlanDelivery && !c.state.confirmed_targets.is_empty() {
            let mut entry = Vec::new();
            for t in &c.state.confirmed_targets {
                if !entry.contains(t) {
                    entry.push(t.clone());
                }
            }
            entry
        } else if c.state.intent == "answer" {
            // 跟进式提问不需要专科扇出，综合者直接作答
            vec![CRITIC.to_string()]
        } else {
            vec![PLANNER.to_string()]
        }
    }

    /// 投机预测：入口集合 + 进度类焦点时的画像预取
    async fn predict_entry(&self, ctx: &SharedContext) -> Vec<String> {
        let mut names = self.entry_workers(ctx).await;
        let c = ctx.lock().await;
        if c.state.focus == "progress" && !names.iter().any(|n| n == USER_PERSONA) {
            names.push(USER_PERSONA.to_string());
        }
        names
    }

    /// 执行当前集合：单个就地调用，多个并行收齐（整批屏障）
    async fn execute_set(
        &self,
        current: &[String],
        ctx: &SharedContext,
        speculative: &mut HashMap<String, WorkerHandle>,
    ) -> Vec<Handoff> {
        if current.len() == 1 {
            let name = &current[0];
            if let Some(handle) = speculative.remove(name) {
                trace(ctx, format!("speculative claim: {}", name)).await;
                return vec![settle(name, handle.await, ctx).await];
            }
            let Some(worker) = self.registry.get(name) else {
                return vec![Handoff::to(CRITIC)];
            };
            return vec![match worker.run(ctx).await {
                Ok(h) => h,
                Err(e) => {
                    trace(ctx, format!("{}: failed: {}", name, e)).await;
                    Handoff::to(CRITIC)
                }
            }];
        }

        let mut names = Vec::with_capacity(current.len());
        let mut handles = Vec::with_capacity(current.len());
        for name in current {
            let handle = if let Some(h) = speculative.remove(name) {
                trace(ctx, format!("speculative claim: {}", name)).await;
                h
            } else {
                match self.registry.get(name) {
                    Some(worker) => self.spawn_worker(worker, ctx.clone()),
                    None => continue,
                }
            };
            names.push(name.clone());
            handles.push(handle);
        }

        let mut handoffs = Vec::with_capacity(handles.len());
        for (name, joined) in names.iter().zip(join_all(handles).await) {
            handoffs.push(settle(name, joined, ctx).await);
        }
        handoffs
    }

    fn spawn_worker(
        &self,
        worker: Arc<dyn super::worker::Worker>,
        ctx: SharedContext,
    ) -> WorkerHandle {
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.expect("semaphore closed");
            worker.run(&ctx).await
        })
    }
}

/// worker 执行结果落地：异常一律吸收为「转入综合者」
async fn settle(
    name: &str,
    joined: Result<Result<Handoff, MeshError>, tokio::task::JoinError>,
    ctx: &SharedContext,
) -> Handoff {
    match joined {
        Ok(Ok(h)) => h,
        Ok(Err(e)) => {
            trace(ctx, format!("{}: failed: {}", name, e)).await;
            Handoff::to(CRITIC)
        }
        Err(e) => {
            trace(ctx, format!("{}: panicked: {}", name, e)).await;
            Handoff::to(CRITIC)
        }
    }
}

/// 未被确定性路径认领的投机任务：中止并丢弃结果
async fn discard_speculative(ctx: &SharedContext, speculative: HashMap<String, WorkerHandle>) {
    for (name, handle) in speculative {
        handle.abort();
        trace(ctx, format!("speculative discard: {}", name)).await;
    }
}

/// 安全 worker 的状态行可以覆盖/播种焦点分类；返回是否真的改写了
fn seed_focus_from_status(c: &mut ConversationContext) -> bool {
    let tag = format!("[{}]", GUARDRAIL);
    let Some(line) = c
        .accumulated_findings
        .iter()
        .rev()
        .find(|f| f.starts_with(&tag))
    else {
        return false;
    };
    let Some(idx) = line.find("FOCUS:") else { return false };
    let topic = line[idx + "FOCUS:".len()..]
        .trim()
        .trim_end_matches('.')
        .to_lowercase();
    if matches!(topic.as_str(), "plan" | "diagnosis") && c.state.focus != topic {
        c.add_trace(format!("focus seeded from safety status: {}", topic));
        c.state.focus = topic;
        return true;
    }
    false
}

fn owned_domains(names: &[String]) -> Vec<PlanDomain> {
    names
        .iter()
        .filter_map(|n| PlanDomain::of_worker(n))
        .collect()
}

fn final_reply(c: &ConversationContext) -> String {
    c.last_model_message()
        .map(|m| m.content.clone())
        .unwrap_or_else(|| "System Error: No response generated.".to_string())
}

async fn trace(ctx: &SharedContext, entry: impl Into<String>) {
    ctx.lock().await.add_trace(entry);
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::core::context::{DomainStatus, Message};
    use crate::core::domain::{NUTRITIONIST, SLEEP_DOCTOR};
    use crate::mesh::worker::Worker;

    /// 可编排的测试 worker：按脚本移交，可随 run 申报领域完成、追加消息
    struct StubWorker {
        name: String,
        script: Mutex<VecDeque<Handoff>>,
        fallback: Handoff,
        completions: Mutex<VecDeque<Option<PlanDomain>>>,
        say: Option<String>,
        safe: bool,
        runs: AtomicUsize,
    }

    impl StubWorker {
        fn new(name: &str, fallback: Handoff) -> Self {
            Self {
                name: name.to_string(),
                script: Mutex::new(VecDeque::new()),
                fallback,
                completions: Mutex::new(VecDeque::new()),
                say: None,
                safe: false,
                runs: AtomicUsize::new(0),
            }
        }

        fn with_script(self, handoffs: Vec<Handoff>) -> Self {
            *self.script.lock().unwrap() = handoffs.into();
            self
        }

        fn with_completions(self, completions: Vec<Option<PlanDomain>>) -> Self {
            *self.completions.lock().unwrap() = completions.into();
            self
        }

        fn saying(mut self, text: &str) -> Self {
            self.say = Some(text.to_string());
            self
        }

        fn speculative(mut self) -> Self {
            self.safe = true;
            self
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Worker for StubWorker {
        fn name(&self) -> &str {
            &self.name
        }

        fn speculation_safe(&self) -> bool {
            self.safe
        }

        async fn run(&self, ctx: &SharedContext) -> Result<Handoff, MeshError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            {
                let mut c = ctx.lock().await;
                if let Some(text) = &self.say {
                    c.add_message(Message::model(text.clone(), self.name.clone()));
                }
                if let Some(Some(domain)) = self.completions.lock().unwrap().pop_front() {
                    c.signal_domain(&self.name, domain, DomainStatus::Completed);
                }
            }
            let scripted = self.script.lock().unwrap().pop_front();
            Ok(scripted.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    fn test_ctx() -> SharedContext {
        let mut ctx = ConversationContext::new("test");
        ctx.begin_turn("hello");
        Arc::new(tokio::sync::Mutex::new(ctx))
    }

    fn scheduler(registry: WorkerRegistry) -> MeshScheduler {
        MeshScheduler::new(Arc::new(registry), 15, 3, 6, false)
    }

    fn base_registry() -> (WorkerRegistry, Arc<StubWorker>, Arc<StubWorker>) {
        let mut registry = WorkerRegistry::new();
        let guardrail = Arc::new(StubWorker::new(GUARDRAIL, Handoff::Next(Vec::new())));
        let critic =
            Arc::new(StubWorker::new(CRITIC, Handoff::Stop).saying("Final synthesis reply"));
        registry.register(guardrail.clone());
        registry.register(critic.clone());
        (registry, guardrail, critic)
    }

    #[tokio::test]
    async fn test_safety_stop_bypasses_everything() {
        let (mut registry, _, critic) = base_registry();
        let guardrail = Arc::new(
            StubWorker::new(GUARDRAIL, Handoff::Stop).saying("Please call emergency services now."),
        );
        registry.register(guardrail.clone());
        let planner = Arc::new(StubWorker::new(PLANNER, Handoff::to(CRITIC)));
        registry.register(planner.clone());

        let ctx = test_ctx();
        let reply = scheduler(registry).run_turn(&ctx).await.unwrap();

        assert_eq!(reply, "Please call emergency services now.");
        assert_eq!(planner.runs(), 0);
        assert_eq!(critic.runs(), 0);
    }

    #[tokio::test]
    async fn test_loop_guard_forces_synthesis() {
        let (mut registry, _, critic) = base_registry();
        let planner = Arc::new(StubWorker::new(PLANNER, Handoff::to("Echo")));
        let echo = Arc::new(StubWorker::new("Echo", Handoff::to("Echo")));
        registry.register(planner.clone());
        registry.register(echo.clone());

        let ctx = test_ctx();
        scheduler(registry).run_turn(&ctx).await.unwrap();

        assert_eq!(echo.runs(), 3);
        assert_eq!(critic.runs(), 1);
        let c = ctx.lock().await;
        assert!(c
            .accumulated_findings
            .iter()
            .any(|f| f.contains("Loop prevention activated")));
    }

    #[tokio::test]
    async fn test_unknown_worker_replaced_with_critic() {
        let (mut registry, _, critic) = base_registry();
        let planner = Arc::new(StubWorker::new(PLANNER, Handoff::to("Ghost")));
        registry.register(planner.clone());

        let ctx = test_ctx();
        let reply = scheduler(registry).run_turn(&ctx).await.unwrap();

        assert_eq!(critic.runs(), 1);
        assert_eq!(reply, "Final synthesis reply");
        let c = ctx.lock().await;
        assert!(c.trace.iter().any(|t| t.contains("unknown worker Ghost")));
    }

    #[tokio::test]
    async fn test_dependency_guard_blocks_early_synthesis() {
        let (mut registry, _, critic) = base_registry();
        let planner = Arc::new(StubWorker::new(
            PLANNER,
            Handoff::parallel([NUTRITIONIST, SLEEP_DOCTOR]),
        ));
        let nutritionist = Arc::new(
            StubWorker::new(NUTRITIONIST, Handoff::to(CRITIC))
                .with_completions(vec![Some(PlanDomain::Nutrition)]),
        );
        // 睡眠专科第一轮忘了申报完成：综合者必须被挡下，它自己被补回
        let sleep = Arc::new(
            StubWorker::new(SLEEP_DOCTOR, Handoff::to(CRITIC))
                .with_completions(vec![None, Some(PlanDomain::Sleep)]),
        );
        registry.register(planner.clone());
        registry.register(nutritionist.clone());
        registry.register(sleep.clone());

        let ctx = test_ctx();
        scheduler(registry).run_turn(&ctx).await.unwrap();

        assert_eq!(sleep.runs(), 2);
        assert_eq!(critic.runs(), 1);
        let c = ctx.lock().await;
        assert!(c.pending_plan_domains.is_empty());
        assert!(c.plan_domain_flags[&PlanDomain::Sleep]);
        assert!(c
            .trace
            .iter()
            .any(|t| t.contains("dependency guard: deferred Critic")));
        assert!(c
            .trace
            .iter()
            .any(|t| t.contains(&format!("dependency guard: re-added {}", SLEEP_DOCTOR))));
    }

    #[tokio::test]
    async fn test_parallel_merge_dedups_preserving_order() {
        let (mut registry, _, critic) = base_registry();
        let planner = Arc::new(StubWorker::new(PLANNER, Handoff::parallel(["A", "B"])));
        let a = Arc::new(StubWorker::new("A", Handoff::parallel(["C", "D"])));
        let b = Arc::new(StubWorker::new("B", Handoff::parallel(["D", "C"])));
        let c_worker = Arc::new(StubWorker::new("C", Handoff::to(CRITIC)));
        let d_worker = Arc::new(StubWorker::new("D", Handoff::to(CRITIC)));
        registry.register(planner.clone());
        registry.register(a.clone());
        registry.register(b.clone());
        registry.register(c_worker.clone());
        registry.register(d_worker.clone());

        let ctx = test_ctx();
        scheduler(registry).run_turn(&ctx).await.unwrap();

        // C/D 各跑一次，随后的综合者也只跑一次
        assert_eq!(c_worker.runs(), 1);
        assert_eq!(d_worker.runs(), 1);
        assert_eq!(critic.runs(), 1);
        let c = ctx.lock().await;
        assert!(c.trace.iter().any(|t| t.contains("next -> [C, D]")));
    }

    #[tokio::test]
    async fn test_hop_budget_bounds_turn() {
        let (mut registry, _, _) = base_registry();
        let planner = Arc::new(StubWorker::new(PLANNER, Handoff::to("Echo")));
        let echo = Arc::new(StubWorker::new("Echo", Handoff::to("Echo")));
        registry.register(planner.clone());
        registry.register(echo.clone());

        let ctx = test_ctx();
        // 循环阈值调大，只靠跳数预算兜底
        let scheduler = MeshScheduler::new(Arc::new(registry), 5, 100, 6, false);
        let reply = scheduler.run_turn(&ctx).await.unwrap();

        let c = ctx.lock().await;
        assert_eq!(c.hop_count, 5);
        assert!(c.trace.iter().any(|t| t.contains("hop budget exhausted")));
        assert_eq!(reply, "System Error: No response generated.");
    }

    #[tokio::test]
    async fn test_empty_handoff_is_terminal() {
        let (mut registry, _, critic) = base_registry();
        let planner = Arc::new(
            StubWorker::new(PLANNER, Handoff::Next(Vec::new())).saying("Nothing more to route."),
        );
        registry.register(planner.clone());

        let ctx = test_ctx();
        let reply = scheduler(registry).run_turn(&ctx).await.unwrap();

        assert_eq!(reply, "Nothing more to route.");
        assert_eq!(critic.runs(), 0);
    }

    #[tokio::test]
    async fn test_speculative_planner_claimed_not_rerun() {
        let (mut registry, _, _) = base_registry();
        let planner = Arc::new(StubWorker::new(PLANNER, Handoff::to(CRITIC)).speculative());
        registry.register(planner.clone());

        let ctx = test_ctx();
        let scheduler = MeshScheduler::new(Arc::new(registry), 15, 3, 6, true);
        scheduler.run_turn(&ctx).await.unwrap();

        assert_eq!(planner.runs(), 1);
        let c = ctx.lock().await;
        assert!(c
            .trace
            .iter()
            .any(|t| t.contains(&format!("speculative claim: {}", PLANNER))));
    }

    #[tokio::test]
    async fn test_worker_error_contributes_critic() {
        struct FailingWorker;

        #[async_trait]
        impl Worker for FailingWorker {
            fn name(&self) -> &str {
                "Broken"
            }
            async fn run(&self, _ctx: &SharedContext) -> Result<Handoff, MeshError> {
                Err(MeshError::WorkerFailed {
                    name: "Broken".to_string(),
                    reason: "simulated failure".to_string(),
                })
            }
        }

        let (mut registry, _, critic) = base_registry();
        let planner = Arc::new(StubWorker::new(PLANNER, Handoff::to("Broken")));
        registry.register(planner.clone());
        registry.register(Arc::new(FailingWorker));

        let ctx = test_ctx();
        let reply = scheduler(registry).run_turn(&ctx).await.unwrap();

        assert_eq!(critic.runs(), 1);
        assert_eq!(reply, "Final synthesis reply");
    }
}
