//! Worker 注册表
//!
//! 固定的 name -> worker 映射，调度器只认名字。能力描述与同伴花名册
//! 随 worker 集合装配在一起（见 workers 模块），不进调度逻辑。

use std::collections::HashMap;
use std::sync::Arc;

use super::worker::Worker;

pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.name().to_string(), worker);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
