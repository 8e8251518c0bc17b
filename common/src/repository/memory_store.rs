use crate::errors::{AppError, AppResult};
use crate::repository::store::{
    DocumentStore, Fields, GuardedInsert, Patch, Query, Record, Subscription, WriteOp,
};
use crate::util::common_utils::build_id;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

type Collections = HashMap<String, BTreeMap<String, Fields>>;

struct Listener {
    query: Query,
    sender: mpsc::UnboundedSender<Vec<Record>>,
}

struct MemoryInner {
    collections: RwLock<Collections>,
    listeners: DashMap<u64, Listener>,
    next_listener: AtomicU64,
    failing: DashSet<String>,
    reads: AtomicUsize,
    in_limit: usize,
}

/// 进程内文档存储：批量写在一把锁内整体提交，提交后推送订阅
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(30)
    }
}

impl MemoryStore {
    pub fn new(in_limit: usize) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                collections: RwLock::new(HashMap::new()),
                listeners: DashMap::new(),
                next_listener: AtomicU64::new(1),
                failing: DashSet::new(),
                reads: AtomicUsize::new(0),
                in_limit,
            }),
        }
    }

    /// 之后对该集合的写入全部失败
    pub fn fail_writes(&self, collection: &str) {
        self.inner.failing.insert(collection.to_string());
    }

    pub fn heal(&self, collection: &str) {
        self.inner.failing.remove(collection);
    }

    /// get/query/subscribe 的累计次数
    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.read_lock().get(collection).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// 手动重推某集合所有订阅的当前结果
    pub fn fire(&self, collection: &str) {
        let mut touched = HashSet::new();
        touched.insert(collection.to_string());
        self.notify(&touched);
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, Collections> {
        self.inner.collections.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Collections> {
        self.inner.collections.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self, collection: &str) -> AppResult<()> {
        if self.inner.failing.contains(collection) {
            return Err(AppError::Store(format!("write to {} rejected", collection)));
        }
        Ok(())
    }

    fn run_query(collections: &Collections, query: &Query) -> Vec<Record> {
        match collections.get(&query.collection) {
            Some(docs) => {
                let records: Vec<Record> = docs.iter().map(|(id, data)| Record::new(id.clone(), data.clone())).collect();
                query.apply(records.iter())
            }
            None => Vec::new(),
        }
    }

    fn apply_op(collections: &mut Collections, op: &WriteOp) -> AppResult<()> {
        match op {
            WriteOp::Set { collection, id, data } => {
                collections.entry(collection.clone()).or_default().insert(id.clone(), data.clone());
            }
            WriteOp::Update { collection, id, patch } => {
                let doc = collections
                    .get_mut(collection)
                    .and_then(|docs| docs.get_mut(id))
                    .ok_or_else(|| AppError::NotFound(format!("{}/{}", collection, id)))?;
                patch.apply(doc);
            }
            WriteOp::Delete { collection, id } => {
                if let Some(docs) = collections.get_mut(collection) {
                    docs.remove(id);
                }
            }
        }
        Ok(())
    }

    fn commit(&self, ops: Vec<WriteOp>) -> AppResult<()> {
        for op in &ops {
            self.check_writable(op.collection())?;
        }
        let touched: HashSet<String> = ops.iter().map(|op| op.collection().to_string()).collect();
        {
            let mut guard = self.write_lock();
            let mut staged = guard.clone();
            for op in &ops {
                Self::apply_op(&mut staged, op)?;
            }
            *guard = staged;
        }
        self.notify(&touched);
        Ok(())
    }

    fn notify(&self, touched: &HashSet<String>) {
        let collections = self.read_lock();
        let mut dead = Vec::new();
        for entry in self.inner.listeners.iter() {
            if !touched.contains(&entry.query.collection) {
                continue;
            }
            let snapshot = Self::run_query(&collections, &entry.query);
            if entry.sender.send(snapshot).is_err() {
                dead.push(*entry.key());
            }
        }
        drop(collections);
        for key in dead {
            self.inner.listeners.remove(&key);
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Record>> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let collections = self.read_lock();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Record::new(id, data.clone())))
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<Record>> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        query.check_in_limit(self.inner.in_limit)?;
        Ok(Self::run_query(&self.read_lock(), query))
    }

    async fn insert(&self, collection: &str, data: Fields) -> AppResult<String> {
        let id = build_id();
        self.commit(vec![WriteOp::Set { collection: collection.to_string(), id: id.clone(), data }])?;
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Fields) -> AppResult<()> {
        self.commit(vec![WriteOp::Set { collection: collection.to_string(), id: id.to_string(), data }])
    }

    async fn update(&self, collection: &str, id: &str, patch: &Patch) -> AppResult<()> {
        self.commit(vec![WriteOp::Update { collection: collection.to_string(), id: id.to_string(), patch: patch.clone() }])
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
        self.commit(vec![WriteOp::Delete { collection: collection.to_string(), id: id.to_string() }])
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> AppResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.commit(ops)
    }

    async fn set_unless_exists(&self, guards: &[Query], collection: &str, id: &str, data: Fields) -> AppResult<GuardedInsert> {
        self.check_writable(collection)?;
        for guard in guards {
            guard.check_in_limit(self.inner.in_limit)?;
        }
        {
            let mut collections = self.write_lock();
            for guard in guards {
                if let Some(existing) = Self::run_query(&collections, guard).into_iter().next() {
                    return Ok(GuardedInsert::Blocked(existing));
                }
            }
            collections.entry(collection.to_string()).or_default().insert(id.to_string(), data);
        }
        let mut touched = HashSet::new();
        touched.insert(collection.to_string());
        self.notify(&touched);
        Ok(GuardedInsert::Inserted(id.to_string()))
    }

    async fn subscribe(&self, query: Query) -> AppResult<Subscription> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        query.check_in_limit(self.inner.in_limit)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let key = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        {
            // 先推送当前结果，再登记监听，二者在同一把读锁内完成
            let collections = self.read_lock();
            let _ = sender.send(Self::run_query(&collections, &query));
            self.inner.listeners.insert(key, Listener { query, sender });
        }
        debug!("memory store: listener {} registered", key);
        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(receiver, move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.remove(&key);
            }
        }))
    }

    fn in_filter_limit(&self) -> usize {
        self.inner.in_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::query_builder::QueryBuilder;
    use crate::repository::store::OrderType;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn crud_and_query() {
        let store = MemoryStore::default();
        let id = store.insert("items", fields(json!({"ownerId": "u1", "priority": 2}))).await.unwrap();
        store.set("items", "fixed", fields(json!({"ownerId": "u1", "priority": 1}))).await.unwrap();
        store.set("items", "other", fields(json!({"ownerId": "u2", "priority": 0}))).await.unwrap();

        let query = QueryBuilder::new("items").eq("ownerId", "u1").order_by("priority", OrderType::Asc).build();
        let result = store.query(&query).await.unwrap();
        let ids: Vec<_> = result.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["fixed".to_string(), id.clone()]);

        store.update("items", &id, &Patch::new().set("priority", 0)).await.unwrap();
        assert_eq!(store.get("items", &id).await.unwrap().unwrap().data["priority"], json!(0));

        let missing = store.update("items", "nope", &Patch::new().set("priority", 0)).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        store.delete("items", &id).await.unwrap();
        store.delete("items", &id).await.unwrap();
        assert!(store.get("items", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = MemoryStore::default();
        store.set("items", "a", fields(json!({"priority": 0}))).await.unwrap();
        let ops = vec![
            WriteOp::Update { collection: "items".into(), id: "a".into(), patch: Patch::new().set("priority", 5) },
            WriteOp::Update { collection: "items".into(), id: "ghost".into(), patch: Patch::new().set("priority", 6) },
        ];
        assert!(store.batch_write(ops).await.is_err());
        assert_eq!(store.get("items", "a").await.unwrap().unwrap().data["priority"], json!(0));
    }

    #[tokio::test]
    async fn subscription_pushes_full_snapshots_until_dropped() {
        let store = MemoryStore::default();
        let query = QueryBuilder::new("friendships").array_contains("users", "a").build();
        let mut sub = store.subscribe(query).await.unwrap();
        assert!(sub.next().await.unwrap().is_empty());

        store.set("friendships", "a_b", fields(json!({"users": ["a", "b"]}))).await.unwrap();
        store.set("friendships", "c_d", fields(json!({"users": ["c", "d"]}))).await.unwrap();
        assert_eq!(sub.next().await.unwrap().len(), 1);
        // 无关文档的写入同样会重推完整结果
        assert_eq!(sub.next().await.unwrap().len(), 1);

        store.fire("friendships");
        assert_eq!(sub.next().await.unwrap().len(), 1);

        assert_eq!(store.listener_count(), 1);
        drop(sub);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn guarded_insert_blocks_on_existing_match() {
        let store = MemoryStore::default();
        let guard = QueryBuilder::new("purchases").eq("itemId", "i1").build();
        let first = store
            .insert_unless_exists(std::slice::from_ref(&guard), "purchases", fields(json!({"itemId": "i1", "buyerId": "f1"})))
            .await
            .unwrap();
        assert!(matches!(first, GuardedInsert::Inserted(_)));
        let second = store
            .insert_unless_exists(&[guard], "purchases", fields(json!({"itemId": "i1", "buyerId": "f2"})))
            .await
            .unwrap();
        match second {
            GuardedInsert::Blocked(existing) => assert_eq!(existing.data["buyerId"], json!("f1")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.len("purchases"), 1);
    }

    #[tokio::test]
    async fn injected_failures_and_in_limit() {
        let store = MemoryStore::new(2);
        store.fail_writes("activity");
        assert!(matches!(store.insert("activity", Fields::new()).await, Err(AppError::Store(_))));
        store.heal("activity");
        assert!(store.insert("activity", Fields::new()).await.is_ok());

        let query = QueryBuilder::new("users").id_in(vec!["a".into(), "b".into(), "c".into()]).build();
        assert!(matches!(store.query(&query).await, Err(AppError::Validation(_))));
    }
}
