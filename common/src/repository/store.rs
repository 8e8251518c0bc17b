use crate::errors::{AppError, AppResult};
use crate::util::common_utils::build_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tokio::sync::mpsc;

pub type Fields = Map<String, Value>;

/// 文档：id + JSON 字段
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub data: Fields,
}

impl Record {
    pub fn new(id: impl Into<String>, data: Fields) -> Self {
        Self { id: id.into(), data }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum OrderType {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
    In(String, Vec<Value>),
    IdIn(Vec<String>),
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq(field, value) => record.field(field) == Some(value),
            Filter::ArrayContains(field, value) => match record.field(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Filter::In(field, values) => record.field(field).is_some_and(|v| values.contains(v)),
            Filter::IdIn(ids) => ids.iter().any(|id| id == &record.id),
        }
    }

    /// in 类过滤携带的取值个数
    pub fn set_size(&self) -> usize {
        match self {
            Filter::In(_, values) => values.len(),
            Filter::IdIn(ids) => ids.len(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: OrderType,
}

/// 分页游标：上一页最后一条的排序值 + id
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub value: Value,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self { collection: name.to_string(), filters: Vec::new(), order_by: None, limit: None, start_after: None }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// 排序字段优先，id 兜底；方向同时作用于两者
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let (ordering, direction) = match &self.order_by {
            Some(order) => (
                compare_values(a.field(&order.field), b.field(&order.field)).then_with(|| a.id.cmp(&b.id)),
                order.direction,
            ),
            None => (a.id.cmp(&b.id), OrderType::Asc),
        };
        match direction {
            OrderType::Asc => ordering,
            OrderType::Desc => ordering.reverse(),
        }
    }

    pub fn cursor_for(&self, record: &Record) -> Cursor {
        let value = self
            .order_by
            .as_ref()
            .and_then(|o| record.field(&o.field).cloned())
            .unwrap_or(Value::Null);
        Cursor { value, id: record.id.clone() }
    }

    fn is_after_cursor(&self, record: &Record) -> bool {
        let Some(cursor) = &self.start_after else {
            return true;
        };
        let mut marker = Fields::new();
        if let Some(order) = &self.order_by {
            marker.insert(order.field.clone(), cursor.value.clone());
        }
        let marker = Record::new(cursor.id.clone(), marker);
        self.compare(record, &marker) == Ordering::Greater
    }

    /// 过滤、排序、游标、limit 依次作用于一组文档
    pub fn apply<'a>(&self, records: impl Iterator<Item = &'a Record>) -> Vec<Record> {
        let mut matched: Vec<Record> = records.filter(|r| self.matches(r)).cloned().collect();
        matched.sort_by(|a, b| self.compare(a, b));
        let iter = matched.into_iter().filter(|r| self.is_after_cursor(r));
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    pub fn max_set_size(&self) -> usize {
        self.filters.iter().map(Filter::set_size).max().unwrap_or(0)
    }

    /// in 过滤超过存储上限时直接拒绝，调用方需要先分批
    pub fn check_in_limit(&self, limit: usize) -> AppResult<()> {
        let size = self.max_set_size();
        if size > limit {
            return Err(AppError::Validation(format!(
                "'in' filter on {} carries {} values, limit is {}",
                self.collection, size, limit
            )));
        }
        Ok(())
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(String, Value),
    Unset(String),
    ArrayUnion(String, Vec<Value>),
    ArrayRemove(String, Vec<Value>),
}

/// 字段级更新，对应 $set / $unset / $addToSet / $pull
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub updates: Vec<FieldUpdate>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.updates.push(FieldUpdate::Set(field.to_string(), value.into()));
        self
    }

    /// None 时写入 null，与文档缺省字段等价
    pub fn set_opt<V: Into<Value>>(self, field: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(field, v),
            None => self.set(field, Value::Null),
        }
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.updates.push(FieldUpdate::Unset(field.to_string()));
        self
    }

    pub fn array_union(mut self, field: &str, values: Vec<Value>) -> Self {
        self.updates.push(FieldUpdate::ArrayUnion(field.to_string(), values));
        self
    }

    pub fn array_remove(mut self, field: &str, values: Vec<Value>) -> Self {
        self.updates.push(FieldUpdate::ArrayRemove(field.to_string(), values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn apply(&self, fields: &mut Fields) {
        for update in &self.updates {
            match update {
                FieldUpdate::Set(field, value) => {
                    fields.insert(field.clone(), value.clone());
                }
                FieldUpdate::Unset(field) => {
                    fields.remove(field);
                }
                FieldUpdate::ArrayUnion(field, values) => {
                    let entry = fields.entry(field.clone()).or_insert_with(|| Value::Array(Vec::new()));
                    if !entry.is_array() {
                        *entry = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = entry {
                        for v in values {
                            if !items.contains(v) {
                                items.push(v.clone());
                            }
                        }
                    }
                }
                FieldUpdate::ArrayRemove(field, values) => {
                    if let Some(Value::Array(items)) = fields.get_mut(field) {
                        items.retain(|v| !values.contains(v));
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { collection: String, id: String, data: Fields },
    Update { collection: String, id: String, patch: Patch },
    Delete { collection: String, id: String },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Set { collection, .. } | WriteOp::Update { collection, .. } | WriteOp::Delete { collection, .. } => {
                collection
            }
        }
    }
}

/// 带前置检查的插入结果
#[derive(Debug, Clone, PartialEq)]
pub enum GuardedInsert {
    Inserted(String),
    Blocked(Record),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub fields: Vec<(&'static str, OrderType)>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn asc(fields: &[&'static str]) -> Self {
        Self { fields: fields.iter().map(|f| (*f, OrderType::Asc)).collect(), unique: false }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// 实时订阅：每次变化推送完整结果集。drop 即取消订阅
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Vec<Record>>,
    _guard: SubscriptionGuard,
}

struct SubscriptionGuard {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Vec<Record>>, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { receiver, _guard: SubscriptionGuard { cancel: Some(Box::new(cancel)) } }
    }

    pub async fn next(&mut self) -> Option<Vec<Record>> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<Vec<Record>> {
        self.receiver.try_recv().ok()
    }

    /// 丢弃积压，只返回最新一份快照
    pub fn latest(&mut self) -> Option<Vec<Record>> {
        let mut last = None;
        while let Ok(snapshot) = self.receiver.try_recv() {
            last = Some(snapshot);
        }
        last
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Record>>;
    async fn query(&self, query: &Query) -> AppResult<Vec<Record>>;
    /// 由存储生成 id
    async fn insert(&self, collection: &str, data: Fields) -> AppResult<String>;
    /// 覆盖写入（不存在则创建）
    async fn set(&self, collection: &str, id: &str, data: Fields) -> AppResult<()>;
    /// 目标不存在时返回 NotFound
    async fn update(&self, collection: &str, id: &str, patch: &Patch) -> AppResult<()>;
    /// 目标不存在时视为成功
    async fn delete(&self, collection: &str, id: &str) -> AppResult<()>;
    /// 原子批量写：全部成功或全部不生效
    async fn batch_write(&self, ops: Vec<WriteOp>) -> AppResult<()>;
    /// 事务内读-检查-写：所有 guard 查询为空时才以给定 id 写入
    async fn set_unless_exists(&self, guards: &[Query], collection: &str, id: &str, data: Fields) -> AppResult<GuardedInsert>;
    /// 同上，id 由存储生成
    async fn insert_unless_exists(&self, guards: &[Query], collection: &str, data: Fields) -> AppResult<GuardedInsert> {
        self.set_unless_exists(guards, collection, &build_id(), data).await
    }
    async fn subscribe(&self, query: Query) -> AppResult<Subscription>;
    async fn ensure_index(&self, _collection: &str, _index: &IndexSpec) -> AppResult<()> {
        Ok(())
    }
    /// in 过滤单次允许的最大取值数
    fn in_filter_limit(&self) -> usize;
}
