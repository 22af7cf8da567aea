//! Process-local store backend for development and tests.

pub mod refresh_token_repo;
pub mod used_token_repo;
pub mod user_repo;

pub use refresh_token_repo::MemoryRefreshTokenRepository;
pub use used_token_repo::MemoryUsedTokenRepository;
pub use user_repo::MemoryUserRepository;
