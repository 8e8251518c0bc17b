use common::errors::AppResult;
use dashmap::DashMap;
use log::{debug, warn};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

/// 一次乐观变更的凭据，进程内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl Ticket {
    fn issue() -> Self {
        Ticket(NEXT_TICKET.fetch_add(1, Ordering::Relaxed))
    }
}

/// 覆盖层状态：
/// Settled 没有覆盖，展示服务端值；
/// Pending 变更在途，展示覆盖值；
/// Confirmed 写入成功，等待下一份权威快照后清除
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay<V> {
    Settled,
    Pending { value: V, ticket: Ticket },
    Confirmed { value: V, ticket: Ticket },
}

impl<V> Overlay<V> {
    fn ticket(&self) -> Option<Ticket> {
        match self {
            Overlay::Settled => None,
            Overlay::Pending { ticket, .. } | Overlay::Confirmed { ticket, .. } => Some(*ticket),
        }
    }

    fn value(&self) -> Option<&V> {
        match self {
            Overlay::Settled => None,
            Overlay::Pending { value, .. } | Overlay::Confirmed { value, .. } => Some(value),
        }
    }
}

/// 变更结束后由 run_optimistic 调用
pub trait OverlaySlot {
    fn confirm(&self, ticket: Ticket) -> bool;
    fn revert(&self, ticket: Ticket) -> bool;
}

/// 单值覆盖，例如资料页上的好友状态
#[derive(Debug, Clone)]
pub struct OverlayCell<V> {
    state: Arc<Mutex<Overlay<V>>>,
}

impl<V> Default for OverlayCell<V> {
    fn default() -> Self {
        Self { state: Arc::new(Mutex::new(Overlay::Settled)) }
    }
}

impl<V: Clone> OverlayCell<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Overlay<V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 新的覆盖直接取代旧的，旧凭据随之失效
    pub fn begin(&self, value: V) -> Ticket {
        let ticket = Ticket::issue();
        *self.lock() = Overlay::Pending { value, ticket };
        ticket
    }

    /// 收到权威快照：已确认的覆盖清除，在途的保留
    pub fn reconcile(&self) {
        let mut state = self.lock();
        if matches!(*state, Overlay::Confirmed { .. }) {
            *state = Overlay::Settled;
        }
    }

    pub fn value(&self) -> Option<V> {
        self.lock().value().cloned()
    }

    /// 有覆盖时取覆盖值，否则取服务端值
    pub fn resolve(&self, server: V) -> V {
        self.value().unwrap_or(server)
    }

    pub fn state(&self) -> Overlay<V> {
        self.lock().clone()
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.lock(), Overlay::Settled)
    }
}

impl<V: Clone> OverlaySlot for OverlayCell<V> {
    fn confirm(&self, ticket: Ticket) -> bool {
        let mut state = self.lock();
        let next = match &*state {
            Overlay::Pending { value, ticket: current } if *current == ticket => {
                Overlay::Confirmed { value: value.clone(), ticket }
            }
            _ => return false,
        };
        *state = next;
        true
    }

    fn revert(&self, ticket: Ticket) -> bool {
        let mut state = self.lock();
        if state.ticket() == Some(ticket) {
            *state = Overlay::Settled;
            true
        } else {
            false
        }
    }
}

/// 按 key 的覆盖集合，例如已处理的申请 id、刚发出申请的用户 id
#[derive(Debug, Clone)]
pub struct OverlayMap<K: Eq + Hash, V> {
    entries: Arc<DashMap<K, Overlay<V>>>,
}

impl<K: Eq + Hash, V> Default for OverlayMap<K, V> {
    fn default() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> OverlayMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, key: K, value: V) -> Ticket {
        let ticket = Ticket::issue();
        self.entries.insert(key, Overlay::Pending { value, ticket });
        ticket
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).and_then(|entry| entry.value().value().cloned())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn resolve(&self, key: &K, server: V) -> V {
        self.get(key).unwrap_or(server)
    }

    pub fn reconcile(&self) {
        self.entries.retain(|_, overlay| !matches!(overlay, Overlay::Confirmed { .. }));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_of(&self, ticket: Ticket) -> Option<K> {
        self.entries.iter().find(|entry| entry.value().ticket() == Some(ticket)).map(|entry| entry.key().clone())
    }
}

impl<K: Eq + Hash + Clone, V: Clone> OverlaySlot for OverlayMap<K, V> {
    fn confirm(&self, ticket: Ticket) -> bool {
        let Some(key) = self.key_of(ticket) else {
            return false;
        };
        match self.entries.get_mut(&key) {
            Some(mut entry) => {
                let next = match entry.value() {
                    Overlay::Pending { value, ticket: current } if *current == ticket => {
                        Overlay::Confirmed { value: value.clone(), ticket }
                    }
                    _ => return false,
                };
                *entry.value_mut() = next;
                true
            }
            None => false,
        }
    }

    fn revert(&self, ticket: Ticket) -> bool {
        let Some(key) = self.key_of(ticket) else {
            return false;
        };
        self.entries.remove_if(&key, |_, overlay| overlay.ticket() == Some(ticket)).is_some()
    }
}

/// 先展示覆盖，再执行变更；成功转为 Confirmed，失败撤销覆盖并把错误交回调用方
pub async fn run_optimistic<S, R, Fut>(slot: &S, ticket: Ticket, mutation: Fut) -> AppResult<R>
where
    S: OverlaySlot + ?Sized,
    Fut: Future<Output = AppResult<R>>,
{
    match mutation.await {
        Ok(result) => {
            slot.confirm(ticket);
            debug!("optimistic change {:?} confirmed", ticket);
            Ok(result)
        }
        Err(e) => {
            slot.revert(ticket);
            if e.is_transient() {
                warn!("optimistic change {:?} reverted: {}", ticket, e);
            } else {
                debug!("optimistic change {:?} rejected: {}", ticket, e);
            }
            Err(e)
        }
    }
}
