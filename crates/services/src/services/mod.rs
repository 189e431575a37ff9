pub mod cache;
pub mod chat;
pub mod config;
pub mod error;
pub mod fetch_scheduler;
pub mod identity;
pub mod notification_feed;
pub mod optimistic;
pub mod projects;
pub mod retry;
pub mod subscription;
