use common::errors::AppResult;
use common::repository::{BaseRepository, Entity, QueryBuilder};
use common::util::common_utils::chunk_ids;
use futures::future::try_join_all;
use log::debug;
use std::collections::HashMap;

/// 按 id 批量读取：按存储的 in 上限分批并发查询，合并后按传入顺序返回，缺失的 id 直接跳过
pub async fn load_by_ids<T: Entity>(repo: &BaseRepository<T>, ids: &[String], batch_size: usize) -> AppResult<Vec<T>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let batch_size = batch_size.min(repo.store().in_filter_limit()).max(1);
    let chunks = chunk_ids(ids, batch_size);
    debug!("loading {} {} ids in {} chunks", ids.len(), T::COLLECTION, chunks.len());
    let queries = chunks.into_iter().map(|chunk| repo.query(QueryBuilder::new(T::COLLECTION).id_in(chunk)));
    let mut found: HashMap<String, T> = HashMap::new();
    for batch in try_join_all(queries).await? {
        for entity in batch {
            found.insert(entity.id().to_string(), entity);
        }
    }
    let mut ordered = Vec::with_capacity(found.len());
    for id in ids {
        if let Some(entity) = found.remove(id) {
            ordered.push(entity);
        }
    }
    Ok(ordered)
}
