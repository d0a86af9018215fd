pub mod config;
pub mod http_client;
pub mod messages;
pub mod services;
pub mod telegram_client;
