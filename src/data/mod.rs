//! 外部数据查询边界
//!
//! 所有调用都是只读查询，结果默认全量可缓存；cached_call 先查上下文调用缓存再出网。
//! 数据目录的修改指纹用于引擎级数据版本检测（变化即作废两级缓存）。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::context::SharedContext;
use crate::core::error::MeshError;

/// 外部数据源：命名查询 + 修改指纹
#[async_trait]
pub trait DataSource: Send + Sync {
    /// 执行命名查询（只读）
    async fn call(&self, name: &str, args: &Value) -> Result<Value, MeshError>;

    /// 底层数据的修改指纹（变化即认为数据已更新）
    async fn fingerprint(&self) -> u64;
}

/// 带上下文缓存的查询：命中不出网，成功结果一律写回
pub async fn cached_call(
    ctx: &SharedContext,
    data: &Arc<dyn DataSource>,
    origin: &str,
    name: &str,
    args: &Value,
) -> Result<Value, MeshError> {
    {
        let mut c = ctx.lock().await;
        if let Some(hit) = c.get_cached_tool_result(name, args) {
            c.add_trace(format!("{}: cache hit {}", origin, name));
            return Ok(hit);
        }
    }

    // 出网期间不持锁
    let result = data.call(name, args).await?;

    let mut c = ctx.lock().await;
    c.cache_tool_result(name, args, result.clone());
    c.add_trace(format!("{}: executed call {}", origin, name));
    Ok(result)
}

/// 文件数据源：数据目录下的 JSON 文档，按查询名路由
///
/// 文档形状沿用用户数据/资源两类服务的约定：biomarkers.json、activity.json、
/// food_journal.json、sleep.json、profile.json、ranges.json、workouts.json、supplements.json。
pub struct FileDataSource {
    root: PathBuf,
}

impl FileDataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn load_json(&self, filename: &str) -> Value {
        let path = self.root.join(filename);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("Malformed data file {:?}: {}", path, e);
                json!([])
            }),
            Err(_) => json!([]),
        }
    }

    /// 大小写不敏感的 name 字段部分匹配过滤
    fn filter_by_names(doc: Value, names: &[String]) -> Value {
        let Value::Array(items) = doc else { return json!([]) };
        if names.is_empty() {
            return Value::Array(items);
        }
        let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        let matched = items
            .into_iter()
            .filter(|item| {
                item.get("name")
                    .and_then(Value::as_str)
                    .map(|n| {
                        let n = n.to_lowercase();
                        lowered.iter().any(|q| n.contains(q.as_str()))
                    })
                    .unwrap_or(false)
            })
            .collect();
        Value::Array(matched)
    }

    /// 按 date 字段精确匹配；未给 date 时返回整份文档
    fn filter_by_date(doc: Value, date: Option<&str>) -> Value {
        let Some(date) = date else { return doc };
        let Value::Array(items) = doc else { return Value::Null };
        items
            .into_iter()
            .find(|item| item.get("date").and_then(Value::as_str) == Some(date))
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
impl DataSource for FileDataSource {
    async fn call(&self, name: &str, args: &Value) -> Result<Value, MeshError> {
        let result = match name {
            "get_biomarkers" => {
                let names: Vec<String> = args
                    .get("names")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Self::filter_by_names(self.load_json("biomarkers.json").await, &names)
            }
            "get_activity_log" => {
                let doc = self.load_json("activity.json").await;
                let (start, end) = (
                    args.get("start_date").and_then(Value::as_str),
                    args.get("end_date").and_then(Value::as_str),
                );
                match (start, end) {
                    (Some(start), Some(end)) => {
                        let Value::Array(items) = doc else { return Ok(json!([])) };
                        Value::Array(
                            items
                                .into_iter()
                                .filter(|e| {
                                    e.get("date")
                                        .and_then(Value::as_str)
                                        .map(|d| start <= d && d <= end)
                                        .unwrap_or(false)
                                })
                                .collect(),
                        )
                    }
                    _ => doc,
                }
            }
            "get_food_journal" => Self::filter_by_date(
                self.load_json("food_journal.json").await,
                args.get("date").and_then(Value::as_str),
            ),
            "get_sleep_data" => Self::filter_by_date(
                self.load_json("sleep.json").await,
                args.get("date").and_then(Value::as_str),
            ),
            "get_user_profile" => self.load_json("profile.json").await,
            "get_biomarker_ranges" => {
                let query = args
                    .get("biomarker_name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                let doc = self.load_json("ranges.json").await;
                match &doc {
                    Value::Object(map) => map
                        .iter()
                        .find(|(k, _)| k.to_lowercase().contains(&query))
                        .map(|(k, v)| json!({ k.clone(): v.clone() }))
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                }
            }
            "get_workout_plan" => {
                let goal = args
                    .get("goal")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                let Value::Array(items) = self.load_json("workouts.json").await else {
                    return Ok(json!([]));
                };
                Value::Array(
                    items
                        .into_iter()
                        .filter(|w| {
                            w.get("name")
                                .and_then(Value::as_str)
                                .map(|n| n.to_lowercase().contains(&goal))
                                .unwrap_or(false)
                        })
                        .collect(),
                )
            }
            "get_supplement_info" => {
                let query = args
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                let Value::Array(items) = self.load_json("supplements.json").await else {
                    return Ok(Value::Null);
                };
                items
                    .into_iter()
                    .find(|s| {
                        s.get("name")
                            .and_then(Value::as_str)
                            .map(|n| n.to_lowercase().contains(&query))
                            .unwrap_or(false)
                    })
                    .unwrap_or(Value::Null)
            }
            other => {
                return Err(MeshError::DataCallFailed {
                    call: other.to_string(),
                    reason: "no such query".to_string(),
                })
            }
        };
        Ok(result)
    }

    async fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(_) => return 0,
        };
        let mut stamps: Vec<(String, u64, u64)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(0);
                stamps.push((path.to_string_lossy().into_owned(), mtime, meta.len()));
            }
        }
        // 目录遍历顺序不稳定，先排序再入 hash
        stamps.sort();
        stamps.hash(&mut hasher);
        hasher.finish()
    }
}

/// 内存数据源（测试用）：按查询名返回固定文档，并统计出网次数
pub struct StaticDataSource {
    docs: HashMap<String, Value>,
    version: AtomicU64,
    calls: AtomicUsize,
}

impl StaticDataSource {
    pub fn new(docs: HashMap<String, Value>) -> Self {
        Self {
            docs,
            version: AtomicU64::new(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// 模拟底层数据更新
    pub fn bump(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// 实际出网次数（缓存命中不计入）
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    async fn call(&self, name: &str, _args: &Value) -> Result<Value, MeshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.docs
            .get(name)
            .cloned()
            .ok_or_else(|| MeshError::DataCallFailed {
                call: name.to_string(),
                reason: "no such query".to_string(),
            })
    }

    async fn fingerprint(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}
