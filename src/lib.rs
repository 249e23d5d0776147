pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod hints;
pub mod humanize;
pub mod locator;
pub mod observability;
pub mod params;
pub mod strategy;
