use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::database::{Bot, Repository};
use crate::utils::error::ApiError;

/// Ownership gate for every owner-scoped operation. A bot that does not
/// exist and a bot owned by someone else both come back as NotFound, so the
/// API never confirms foreign resources.
pub struct BotAccess {
    repository: Arc<Repository>,
}

impl BotAccess {
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }

    pub async fn require_owner(&self, user_id: Uuid, bot_id: Uuid) -> Result<Bot, ApiError> {
        let bot = self
            .repository
            .get_bot_owned(bot_id, user_id)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        match bot {
            Some(bot) => {
                debug!(user = %user_id, bot = %bot_id, "ownership verified");
                Ok(bot)
            }
            None => Err(ApiError::NotFound(format!("bot {bot_id} not found"))),
        }
    }

    /// Widget scope: resolve the single bot a validated token points at.
    pub async fn widget_bot(&self, bot_id: Uuid) -> Result<Bot, ApiError> {
        self.repository
            .get_bot_by_id(bot_id)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound(format!("bot {bot_id} not found")))
    }
}
