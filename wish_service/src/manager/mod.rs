pub mod batch_loader;
pub mod cache_key;
pub mod client_cache;
pub mod friend_views;
pub mod live_view;
pub mod optimistic;
