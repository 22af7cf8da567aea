pub mod auth_service;
pub mod health_service;
pub mod password_service;
pub mod token_service;
