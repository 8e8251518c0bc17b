pub mod config;
pub mod errors;
pub mod logging;
pub mod repository;
pub mod storage;
pub mod util;

pub use repository::*;
pub type UserId = String;
