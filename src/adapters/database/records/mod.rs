pub mod auth;
pub mod user;

pub use auth::{RefreshTokenRecord, UsedRefreshTokenRecord};
pub use user::UserRecord;
