use uuid::Uuid;

pub fn build_id() -> String {
    let uuid = Uuid::new_v4().simple();
    format!("{}", uuid)
}

/// 按批次大小切分 id 列表，去重并保持首次出现的顺序
pub fn chunk_ids(ids: &[String], size: usize) -> Vec<Vec<String>> {
    let size = size.max(1);
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<String> = ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect();
    unique.chunks(size).map(|c| c.to_vec()).collect()
}

/// 去重并保持首次出现的顺序
pub fn dedup_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

pub fn as_ref_to_string<S: AsRef<str>>(s: S) -> String {
    s.as_ref().to_string()
}
