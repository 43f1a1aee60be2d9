//! Dry-run publisher: logs the message instead of posting it.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::Publisher;
use crate::types::{BotError, PostReceipt};

const PUBLISHER_NAME: &str = "dry-run";

#[derive(Debug, Default)]
pub struct DryRunPublisher;

impl DryRunPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn start(&mut self) -> Result<(), BotError> {
        info!("Dry-run publisher active, nothing will be posted");
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<PostReceipt, BotError> {
        info!(text, "[DRY RUN] Would post forecast");
        Ok(PostReceipt {
            post_id: format!("dry-run-{}", uuid::Uuid::new_v4()),
            publisher: PUBLISHER_NAME.to_string(),
            text: text.to_string(),
            posted_at: Utc::now(),
        })
    }

    fn name(&self) -> &'static str {
        PUBLISHER_NAME
    }
}
