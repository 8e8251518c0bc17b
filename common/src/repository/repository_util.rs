use crate::errors::{AppError, AppResult};
use crate::repository::store::{Cursor, DocumentStore, Fields, GuardedInsert, IndexSpec, Query, Record, Subscription};
use log::warn;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// 持久化实体：集合名 + id，读边界上的字段迁移在 normalize 里做
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn normalize(self) -> Self {
        self
    }

    fn indexes() -> Vec<IndexSpec> {
        Vec::new()
    }
}

/// 实体 -> 文档字段（id 不落在字段里）
pub fn encode<T: Entity>(entity: &T) -> AppResult<Fields> {
    match serde_json::to_value(entity)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        other => Err(AppError::Internal(format!("{} did not encode to an object: {}", T::COLLECTION, other))),
    }
}

pub fn decode<T: Entity>(record: Record) -> AppResult<T> {
    let mut data = record.data;
    data.insert("id".to_string(), Value::String(record.id));
    let entity: T = serde_json::from_value(Value::Object(data))?;
    Ok(entity.normalize())
}

/// 批量解码，坏数据记录日志后跳过
pub fn decode_all<T: Entity>(records: Vec<Record>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            match decode::<T>(record) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!("skipping malformed {} document {}: {}", T::COLLECTION, id, e);
                    None
                }
            }
        })
        .collect()
}

pub struct PageResult<T> {
    pub items: Vec<T>,
    pub has_next: bool,
    pub next_cursor: Option<Cursor>,
}

pub struct TypedSubscription<T: Entity> {
    inner: Subscription,
    _marker: PhantomData<T>,
}

impl<T: Entity> TypedSubscription<T> {
    pub fn new(inner: Subscription) -> Self {
        Self { inner, _marker: PhantomData }
    }

    pub async fn next(&mut self) -> Option<Vec<T>> {
        self.inner.next().await.map(decode_all)
    }

    pub fn try_next(&mut self) -> Option<Vec<T>> {
        self.inner.try_next().map(decode_all)
    }

    pub fn latest(&mut self) -> Option<Vec<T>> {
        self.inner.latest().map(decode_all)
    }
}

pub struct BaseRepository<T: Entity> {
    store: Arc<dyn DocumentStore>,
    _marker: PhantomData<T>,
}

impl<T: Entity> Clone for BaseRepository<T> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), _marker: PhantomData }
    }
}

impl<T: Entity> BaseRepository<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, _marker: PhantomData }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<T>> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(record) => Ok(Some(decode(record)?)),
            None => Ok(None),
        }
    }

    pub async fn find_one(&self, query: impl Into<Query>) -> AppResult<Option<T>> {
        let mut query = query.into();
        query.limit = Some(1);
        let records = self.store.query(&query).await?;
        Ok(decode_all(records).into_iter().next())
    }

    pub async fn query(&self, query: impl Into<Query>) -> AppResult<Vec<T>> {
        let records = self.store.query(&query.into()).await?;
        Ok(decode_all(records))
    }

    pub async fn exists(&self, query: impl Into<Query>) -> AppResult<bool> {
        let mut query = query.into();
        query.limit = Some(1);
        Ok(!self.store.query(&query).await?.is_empty())
    }

    /// 插入并返回存储生成的 id（实体自身的 id 字段被忽略）
    pub async fn insert(&self, entity: &T) -> AppResult<String> {
        self.store.insert(T::COLLECTION, encode(entity)?).await
    }

    pub async fn set(&self, entity: &T) -> AppResult<()> {
        self.store.set(T::COLLECTION, entity.id(), encode(entity)?).await
    }

    pub async fn update(&self, id: &str, patch: &crate::repository::store::Patch) -> AppResult<()> {
        self.store.update(T::COLLECTION, id, patch).await
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.store.delete(T::COLLECTION, id).await
    }

    pub async fn insert_unless_exists(&self, guards: &[Query], entity: &T) -> AppResult<GuardedInsert> {
        self.store.insert_unless_exists(guards, T::COLLECTION, encode(entity)?).await
    }

    /// 以实体自身的 id 做受保护写入
    pub async fn set_unless_exists(&self, guards: &[Query], entity: &T) -> AppResult<GuardedInsert> {
        self.store.set_unless_exists(guards, T::COLLECTION, entity.id(), encode(entity)?).await
    }

    /// 多取一条判断是否还有下一页
    pub async fn query_by_page(&self, query: impl Into<Query>, page_size: usize) -> AppResult<PageResult<T>> {
        let mut query = query.into();
        query.limit = Some(page_size + 1);
        let mut records = self.store.query(&query).await?;
        let has_next = records.len() > page_size;
        if has_next {
            records.pop(); // 移除多出来的那条
        }
        let next_cursor = if has_next { records.last().map(|r| query.cursor_for(r)) } else { None };
        Ok(PageResult { items: decode_all(records), has_next, next_cursor })
    }

    pub async fn subscribe(&self, query: impl Into<Query>) -> AppResult<TypedSubscription<T>> {
        let subscription = self.store.subscribe(query.into()).await?;
        Ok(TypedSubscription::new(subscription))
    }

    pub async fn ensure_indexes(&self) -> AppResult<()> {
        for index in T::indexes() {
            self.store.ensure_index(T::COLLECTION, &index).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryStore, OrderType, QueryBuilder};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Note {
        #[serde(default)]
        id: String,
        rank: i64,
    }

    impl Entity for Note {
        const COLLECTION: &'static str = "notes";

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn repo() -> BaseRepository<Note> {
        BaseRepository::new(Arc::new(MemoryStore::default()))
    }

    #[test]
    fn encode_leaves_id_out_of_fields() {
        let fields = encode(&Note { id: "n1".into(), rank: 3 }).unwrap();
        assert!(!fields.contains_key("id"));
        assert_eq!(fields.get("rank"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn page_walk_visits_every_document_once() {
        let repo = repo();
        for rank in 0..5 {
            repo.insert(&Note { id: String::new(), rank }).await.unwrap();
        }
        let query = || QueryBuilder::new("notes").order_by("rank", OrderType::Asc);

        let first = repo.query_by_page(query(), 2).await.unwrap();
        assert!(first.has_next);
        assert_eq!(first.items.iter().map(|n| n.rank).collect::<Vec<_>>(), vec![0, 1]);
        let second = repo.query_by_page(query().start_after(first.next_cursor), 2).await.unwrap();
        assert_eq!(second.items.iter().map(|n| n.rank).collect::<Vec<_>>(), vec![2, 3]);
        let last = repo.query_by_page(query().start_after(second.next_cursor), 2).await.unwrap();
        assert!(!last.has_next);
        assert!(last.next_cursor.is_none());
        assert_eq!(last.items.iter().map(|n| n.rank).collect::<Vec<_>>(), vec![4]);
    }

    #[tokio::test]
    async fn malformed_documents_are_skipped() {
        let repo = repo();
        repo.set(&Note { id: "good".into(), rank: 1 }).await.unwrap();
        let mut bad = Fields::new();
        bad.insert("rank".into(), json!("not a number"));
        repo.store().set("notes", "bad", bad).await.unwrap();

        let notes = repo.query(QueryBuilder::new("notes")).await.unwrap();
        assert_eq!(notes, vec![Note { id: "good".into(), rank: 1 }]);
        assert!(repo.find_by_id("bad").await.is_err());
    }
}
