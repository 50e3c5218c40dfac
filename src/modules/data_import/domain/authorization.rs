/// Ownership lookups for the nodes datum are loaded into
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use chrono_tz::Tz;
use std::collections::HashSet;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationSource: Send + Sync {
    /// Ids of the nodes a user may load data for
    async fn authorized_node_ids(&self, user_id: i64) -> AppResult<HashSet<i64>>;

    /// Time zone of a node, if it has one
    async fn node_time_zone(&self, node_id: i64) -> AppResult<Option<Tz>>;
}
