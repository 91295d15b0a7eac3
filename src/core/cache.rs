//! 回合级响应缓存
//!
//! 键 = (会话, 数据版本, 归一化输入)；命中则整个调度回合被短路。
//! TTL 到期按需剔除，容量超限先进先出逐出。数据版本进键意味着底层数据
//! 一旦变化，旧版本条目自然永不再命中。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::context::Widget;

#[derive(Clone, PartialEq, Eq, Hash)]
struct ResponseKey {
    session: String,
    data_version: u64,
    input: String,
}

/// 缓存的回合产物
#[derive(Clone)]
pub struct CachedReply {
    pub text: String,
    pub widgets: Vec<Widget>,
}

struct CachedEntry {
    reply: CachedReply,
    stored_at: Instant,
}

struct CacheInner {
    map: HashMap<ResponseKey, CachedEntry>,
    order: VecDeque<ResponseKey>,
}

pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
}

impl ResponseCache {
    pub fn new(ttl_secs: u64, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl: Duration::from_secs(ttl_secs),
            capacity: capacity.max(1),
        }
    }

    /// 输入归一化：修剪、转小写、压缩空白
    pub fn normalize(input: &str) -> String {
        input
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn get(&self, session: &str, data_version: u64, normalized_input: &str) -> Option<CachedReply> {
        let key = ResponseKey {
            session: session.to_string(),
            data_version,
            input: normalized_input.to_string(),
        };
        let mut inner = self.inner.lock().expect("response cache lock");
        let live = inner
            .map
            .get(&key)
            .map(|entry| (entry.stored_at.elapsed() <= self.ttl).then(|| entry.reply.clone()));
        match live {
            Some(Some(reply)) => Some(reply),
            Some(None) => {
                inner.map.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, session: &str, data_version: u64, normalized_input: &str, reply: CachedReply) {
        let key = ResponseKey {
            session: session.to_string(),
            data_version,
            input: normalized_input.to_string(),
        };
        let mut inner = self.inner.lock().expect("response cache lock");

        // 容量超限：按插入顺序逐出最旧的存活条目
        while inner.map.len() >= self.capacity && !inner.map.contains_key(&key) {
            let Some(oldest) = inner.order.pop_front() else { break };
            inner.map.remove(&oldest);
        }

        if inner
            .map
            .insert(
                key.clone(),
                CachedEntry {
                    reply,
                    stored_at: Instant::now(),
                },
            )
            .is_none()
        {
            inner.order.push_back(key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("response cache lock").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
