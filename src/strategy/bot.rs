//! Crawler handling
//!
//! Crawlers asking for a parameterized rendition are answered with a
//! permanent redirect to the canonical source path, so search indexes
//! collect one URL per image instead of one per device profile. The
//! redirect itself is never cached and proxy requests are left alone.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::engine::exchange::http_date;
use crate::engine::task::RequestProcessor;
use crate::engine::{EngineError, Exchange, ProcessContext};

use super::Strategy;

static BOT_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(bot|googlebot|crawler|spider|slurp|robot|crawling)").unwrap());

pub fn is_bot_agent(user_agent: &str) -> bool {
    BOT_AGENT.is_match(user_agent)
}

pub struct BotStrategy;

impl Strategy for BotStrategy {
    fn name(&self) -> &'static str {
        "bot"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        exchange.method == Method::GET
            && is_bot_agent(exchange.user_agent())
            && !exchange.params.is_empty()
            && !exchange.params.is_remote_source()
    }

    fn create(&self) -> Box<dyn RequestProcessor> {
        Box::new(BotProcessor)
    }
}

pub struct BotProcessor;

#[async_trait]
impl RequestProcessor for BotProcessor {
    fn kind(&self) -> &'static str {
        "bot"
    }

    async fn execute(&mut self, ctx: &mut ProcessContext) -> Result<(), EngineError> {
        let exchange = &ctx.exchange;
        let location = format!(
            "{}/{}",
            exchange.context_path.trim_end_matches('/'),
            exchange.params.source()
        );
        let headers = BTreeMap::from([
            ("Location".to_string(), location),
            ("Content-Length".to_string(), "0".to_string()),
            ("Date".to_string(), http_date(Utc::now())),
        ]);
        ctx.response.commit(StatusCode::MOVED_PERMANENTLY, headers)?;
        ctx.response.complete(Bytes::new())?;
        Ok(())
    }
}
