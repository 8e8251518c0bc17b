use crate::biz_service::friend_service::FriendService;
use crate::entitys::activity::ActivityItem;
use crate::entitys::user_entity::UserInfo;
use crate::entitys::wishlist_item::Currency;
use crate::manager::cache_key::CacheKey;
use crate::manager::client_cache::ClientCache;
use crate::session::Session;
use chrono::NaiveDate;
use common::errors::AppResult;
use common::repository::{BaseRepository, Cursor, DocumentStore, OrderType, QueryBuilder};
use common::util::common_utils::chunk_ids;
use common::util::date_util::{from_millis, next_anniversary};
use futures::future::try_join_all;
use log::debug;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// 带作者资料的动态
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub activity: ActivityItem,
    pub user: UserInfo,
}

#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub entries: Vec<FeedEntry>,
    /// 只有拿满一页时才有
    pub next_cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpcomingBirthday {
    pub user: UserInfo,
    pub date: NaiveDate,
    pub days_until: i64,
}

/// 下一次生日落在窗口内的好友，最近的在前
pub fn upcoming_birthdays(friends: &[UserInfo], today: NaiveDate, window_days: i64) -> Vec<UpcomingBirthday> {
    let mut upcoming: Vec<UpcomingBirthday> = friends
        .iter()
        .filter_map(|friend| {
            let date = next_anniversary(friend.birthday?, today);
            let days_until = (date - today).num_days();
            (days_until <= window_days).then(|| UpcomingBirthday { user: friend.clone(), date, days_until })
        })
        .collect();
    upcoming.sort_by_key(|b| b.days_until);
    upcoming
}

fn group_digits(mut value: u64, separator: char) -> String {
    let mut groups = Vec::new();
    loop {
        groups.push(value % 1000);
        value /= 1000;
        if value == 0 {
            break;
        }
    }
    let mut out = groups.pop().map(|g| g.to_string()).unwrap_or_default();
    while let Some(group) = groups.pop() {
        out.push(separator);
        out.push_str(&format!("{:03}", group));
    }
    out
}

/// ARS 不带小数、点号分组；USD 最多两位小数、逗号分组
pub fn format_price(price: f64, currency: Currency) -> String {
    let sign = if price < 0.0 { "-" } else { "" };
    let price = price.abs();
    match currency {
        Currency::Ars => format!("{}{} ARS", sign, group_digits(price.round() as u64, '.')),
        Currency::Usd => {
            let cents = (price * 100.0).round() as u64;
            let (whole, fraction) = (cents / 100, cents % 100);
            let fraction = match fraction {
                0 => String::new(),
                f if f % 10 == 0 => format!(".{}", f / 10),
                f => format!(".{:02}", f),
            };
            format!("{}{}{} USD", sign, group_digits(whole, ','), fraction)
        }
    }
}

/// now / 5m ago / 3h ago / 2d ago，一周以上显示 "Mar 4"
pub fn format_relative_time(then_ms: i64, now_ms: i64) -> String {
    let seconds = (now_ms - then_ms) / 1000;
    if seconds < 60 {
        return "now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{}d ago", days);
    }
    from_millis(then_ms).map(|t| t.format("%b %-d").to_string()).unwrap_or_default()
}

#[derive(Clone)]
pub struct ActivityService {
    pub dao: BaseRepository<ActivityItem>,
    friends: FriendService,
    cache: ClientCache,
    page_size: usize,
    feed_batch_size: usize,
    birthday_window_days: i64,
}

impl ActivityService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        friends: FriendService,
        cache: ClientCache,
        page_size: usize,
        feed_batch_size: usize,
        birthday_window_days: i64,
    ) -> Self {
        Self {
            dao: BaseRepository::new(store),
            friends,
            cache,
            page_size: page_size.max(1),
            feed_batch_size,
            birthday_window_days,
        }
    }

    /// 好友动态分页，新的在前。好友 id 按批次拆成多个 in 查询，各取一页后合并截断
    pub async fn feed_page(&self, session: &Session, cursor: Option<Cursor>) -> AppResult<FeedPage> {
        let friends = self.friends.list_friends(session.uid()).await?;
        if friends.is_empty() {
            return Ok(FeedPage::default());
        }
        let friend_ids: Vec<String> = friends.iter().map(|f| f.id.clone()).collect();
        let batch_size = self.feed_batch_size.min(self.dao.store().in_filter_limit()).max(1);
        let chunks = chunk_ids(&friend_ids, batch_size);
        debug!("feed for {} spans {} friend chunks", session.uid(), chunks.len());

        let queries = chunks.into_iter().map(|chunk| {
            self.dao.query(
                QueryBuilder::new("activity")
                    .in_array("userId", chunk)
                    .order_by("createdAt", OrderType::Desc)
                    .limit(self.page_size)
                    .start_after(cursor.clone()),
            )
        });
        let mut activities: Vec<ActivityItem> = try_join_all(queries).await?.into_iter().flatten().collect();
        activities.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        activities.truncate(self.page_size);

        let next_cursor = if activities.len() == self.page_size {
            activities.last().map(|a| Cursor { value: json!(a.created_at), id: a.id.clone() })
        } else {
            None
        };

        let authors: HashMap<&str, &UserInfo> = friends.iter().map(|f| (f.id.as_str(), f)).collect();
        let entries: Vec<FeedEntry> = activities
            .into_iter()
            .filter_map(|activity| {
                let user = (*authors.get(activity.user_id.as_str())?).clone();
                Some(FeedEntry { activity, user })
            })
            .collect();
        if cursor.is_none() {
            self.cache.put(&CacheKey::ActivityFeed(session.uid().to_string()), entries.clone());
        }
        Ok(FeedPage { entries, next_cursor })
    }

    /// 上次加载的第一页，用于首屏
    pub fn cached_first_page(&self, session: &Session) -> Option<Vec<FeedEntry>> {
        self.cache.get(&CacheKey::ActivityFeed(session.uid().to_string()))
    }

    pub async fn upcoming_birthdays(&self, session: &Session, today: NaiveDate) -> AppResult<Vec<UpcomingBirthday>> {
        let friends = self.friends.list_friends(session.uid()).await?;
        Ok(upcoming_birthdays(&friends, today, self.birthday_window_days))
    }
}
