use crate::config::DatabaseConfig;
use crate::errors::{AppError, AppResult};
use crate::repository::store::{
    DocumentStore, FieldUpdate, Fields, Filter, GuardedInsert, IndexSpec, OrderType, Patch, Query, Record,
    Subscription, WriteOp,
};
use crate::util::common_utils::build_id;
use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use log::{info, warn};
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use serde_json::Value;
use tokio::sync::mpsc;

/// MongoDB 实现。批量写和带检查的插入依赖事务，需要副本集部署
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
    in_limit: usize,
}

impl MongoStore {
    pub fn new(client: Client, db_name: &str, in_limit: usize) -> Self {
        let db = client.database(db_name);
        Self { client, db, in_limit }
    }

    pub async fn connect(config: &DatabaseConfig, in_limit: usize) -> AppResult<Self> {
        let client_options = ClientOptions::parse(&config.url).await?;
        let client = Client::with_options(client_options)?;
        info!("mongo store connected, db={}", config.db_name);
        Ok(Self::new(client, &config.db_name, in_limit))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    async fn run_query(&self, query: &Query) -> AppResult<Vec<Record>> {
        let collection = self.collection(&query.collection);
        let mut find = collection.find(filter_doc(query)?);
        if let Some(sort) = sort_doc(query) {
            find = find.sort(sort);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit as i64);
        }
        let mut cursor = find.await?;
        let mut results = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            results.push(record_from(document)?);
        }
        Ok(results)
    }

    async fn apply_in_session(&self, session: &mut ClientSession, op: &WriteOp) -> AppResult<()> {
        match op {
            WriteOp::Set { collection, id, data } => {
                let document = with_id(id, data)?;
                self.collection(collection)
                    .replace_one(doc! { "_id": id.as_str() }, document)
                    .upsert(true)
                    .session(&mut *session)
                    .await?;
            }
            WriteOp::Update { collection, id, patch } => {
                let result = self
                    .collection(collection)
                    .update_one(doc! { "_id": id.as_str() }, patch_doc(patch)?)
                    .session(&mut *session)
                    .await?;
                if result.matched_count == 0 {
                    return Err(AppError::NotFound(format!("{}/{}", collection, id)));
                }
            }
            WriteOp::Delete { collection, id } => {
                self.collection(collection).delete_one(doc! { "_id": id.as_str() }).session(&mut *session).await?;
            }
        }
        Ok(())
    }

    async fn guarded_insert_in_session(
        &self,
        session: &mut ClientSession,
        guards: &[Query],
        collection: &str,
        id: &str,
        data: &Fields,
    ) -> AppResult<GuardedInsert> {
        for guard in guards {
            let found = self
                .collection(&guard.collection)
                .find_one(filter_doc(guard)?)
                .session(&mut *session)
                .await?;
            if let Some(existing) = found {
                return Ok(GuardedInsert::Blocked(record_from(existing)?));
            }
        }
        self.collection(collection).insert_one(with_id(id, data)?).session(&mut *session).await?;
        Ok(GuardedInsert::Inserted(id.to_string()))
    }
}

fn to_bson(value: &Value) -> Bson {
    Bson::from(value.clone())
}

fn with_id(id: &str, data: &Fields) -> AppResult<Document> {
    let mut document = match Bson::from(Value::Object(data.clone())) {
        Bson::Document(document) => document,
        other => return Err(AppError::Internal(format!("expected document, got {:?}", other))),
    };
    document.insert("_id", id);
    Ok(document)
}

fn record_from(mut document: Document) -> AppResult<Record> {
    let id = match document.remove("_id") {
        Some(Bson::String(id)) => id,
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        other => return Err(AppError::Internal(format!("unsupported _id {:?}", other))),
    };
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(data) => Ok(Record::new(id, data)),
        other => Err(AppError::Internal(format!("expected object, got {}", other))),
    }
}

fn filter_doc(query: &Query) -> AppResult<Document> {
    let mut clauses: Vec<Document> = Vec::new();
    for filter in &query.filters {
        let clause = match filter {
            // 数组字段上的等值匹配即 array-contains 语义
            Filter::Eq(field, value) | Filter::ArrayContains(field, value) => doc! { field.as_str(): to_bson(value) },
            Filter::In(field, values) => {
                let arr: Vec<Bson> = values.iter().map(to_bson).collect();
                doc! { field.as_str(): { "$in": arr } }
            }
            Filter::IdIn(ids) => doc! { "_id": { "$in": ids.clone() } },
        };
        clauses.push(clause);
    }
    if let (Some(cursor), Some(order)) = (&query.start_after, &query.order_by) {
        let op = match order.direction {
            OrderType::Asc => "$gt",
            OrderType::Desc => "$lt",
        };
        let value = to_bson(&cursor.value);
        clauses.push(doc! {
            "$or": [
                { order.field.as_str(): { op: value.clone() } },
                { order.field.as_str(): value, "_id": { op: cursor.id.as_str() } },
            ]
        });
    } else if let Some(cursor) = &query.start_after {
        clauses.push(doc! { "_id": { "$gt": cursor.id.as_str() } });
    }
    Ok(match clauses.len() {
        0 => doc! {},
        1 => clauses.remove(0),
        _ => doc! { "$and": clauses },
    })
}

fn sort_doc(query: &Query) -> Option<Document> {
    let order = query.order_by.as_ref()?;
    let direction = match order.direction {
        OrderType::Asc => 1,
        OrderType::Desc => -1,
    };
    Some(doc! { order.field.as_str(): direction, "_id": direction })
}

fn patch_doc(patch: &Patch) -> AppResult<Document> {
    let mut set = Document::new();
    let mut unset = Document::new();
    let mut add_to_set = Document::new();
    let mut pull = Document::new();
    for update in &patch.updates {
        match update {
            FieldUpdate::Set(field, value) => {
                set.insert(field.as_str(), to_bson(value));
            }
            FieldUpdate::Unset(field) => {
                unset.insert(field.as_str(), "");
            }
            FieldUpdate::ArrayUnion(field, values) => {
                let arr: Vec<Bson> = values.iter().map(to_bson).collect();
                add_to_set.insert(field.as_str(), doc! { "$each": arr });
            }
            FieldUpdate::ArrayRemove(field, values) => {
                let arr: Vec<Bson> = values.iter().map(to_bson).collect();
                pull.insert(field.as_str(), doc! { "$in": arr });
            }
        }
    }
    let mut update = Document::new();
    for (op, body) in [("$set", set), ("$unset", unset), ("$addToSet", add_to_set), ("$pull", pull)] {
        if !body.is_empty() {
            update.insert(op, body);
        }
    }
    if update.is_empty() {
        return Err(AppError::Validation("empty patch".to_string()));
    }
    Ok(update)
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Record>> {
        match self.collection(collection).find_one(doc! { "_id": id }).await? {
            Some(document) => Ok(Some(record_from(document)?)),
            None => Ok(None),
        }
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<Record>> {
        query.check_in_limit(self.in_limit)?;
        self.run_query(query).await
    }

    async fn insert(&self, collection: &str, data: Fields) -> AppResult<String> {
        let id = build_id();
        self.collection(collection).insert_one(with_id(&id, &data)?).await?;
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Fields) -> AppResult<()> {
        self.collection(collection).replace_one(doc! { "_id": id }, with_id(id, &data)?).upsert(true).await?;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: &Patch) -> AppResult<()> {
        let result = self.collection(collection).update_one(doc! { "_id": id }, patch_doc(patch)?).await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound(format!("{}/{}", collection, id)));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
        self.collection(collection).delete_one(doc! { "_id": id }).await?;
        Ok(())
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> AppResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        for op in &ops {
            if let Err(e) = self.apply_in_session(&mut session, op).await {
                if let Err(abort) = session.abort_transaction().await {
                    warn!("abort transaction failed: {}", abort);
                }
                return Err(e);
            }
        }
        session.commit_transaction().await?;
        Ok(())
    }

    async fn set_unless_exists(&self, guards: &[Query], collection: &str, id: &str, data: Fields) -> AppResult<GuardedInsert> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        match self.guarded_insert_in_session(&mut session, guards, collection, id, &data).await {
            Ok(GuardedInsert::Inserted(id)) => {
                session.commit_transaction().await?;
                Ok(GuardedInsert::Inserted(id))
            }
            Ok(blocked) => {
                session.abort_transaction().await?;
                Ok(blocked)
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction().await {
                    warn!("abort transaction failed: {}", abort);
                }
                Err(e)
            }
        }
    }

    /// change stream 每来一个事件就重跑一次查询，推送完整结果集
    async fn subscribe(&self, query: Query) -> AppResult<Subscription> {
        query.check_in_limit(self.in_limit)?;
        let stream = self.collection(&query.collection).watch().await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let initial = self.run_query(&query).await?;
        let _ = sender.send(initial);

        let store = self.clone();
        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                if let Err(e) = event {
                    warn!("change stream on {} ended: {}", query.collection, e);
                    break;
                }
                match store.run_query(&query).await {
                    Ok(snapshot) => {
                        if sender.send(snapshot).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("re-query after change on {} failed: {}", query.collection, e),
                }
            }
        });
        let abort = handle.abort_handle();
        Ok(Subscription::new(receiver, move || abort.abort()))
    }

    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> AppResult<()> {
        let mut keys = Document::new();
        for (field, order) in &index.fields {
            keys.insert(*field, if *order == OrderType::Asc { 1 } else { -1 });
        }
        let options = IndexOptions::builder().unique(index.unique).build();
        let model = IndexModel::builder().keys(keys).options(options).build();
        self.collection(collection).create_index(model).await?;
        Ok(())
    }

    fn in_filter_limit(&self) -> usize {
        self.in_limit
    }
}
