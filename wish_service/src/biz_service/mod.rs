pub mod activity_service;
pub mod folder_service;
pub mod friend_service;
pub mod purchase_service;
pub mod user_service;
pub mod wishlist_service;
