//! Cache and coalescing key scheme
//!
//! Cache keys are shared by every instance through the distributed tier, so
//! the layout is part of the deployment contract.

use crate::types::HistoryType;

const COALESCE_PREFIX: &str = "sf";

pub fn balance(user_id: &str) -> String {
    format!("domain:balance:user_id:{}", user_id)
}

pub fn latest_history(user_id: &str) -> String {
    format!("domain:balance:history:user_id:{}", user_id)
}

pub fn history_summary(user_id: &str, history_type: HistoryType) -> String {
    format!(
        "domain:balance:history_summary:user_id:{}:type:{}",
        user_id, history_type
    )
}

pub fn user_by_id(id: &str) -> String {
    format!("domain:user:id:{}", id)
}

pub fn user_by_username(username: &str) -> String {
    format!("domain:user:username:{}", username)
}

/// Coalescing key for a cache key
pub fn flight(cache_key: &str) -> String {
    format!("{}:{}", COALESCE_PREFIX, cache_key)
}

pub fn top_transactions(user_id: &str) -> String {
    format!("{}:usecase:transaction:top_transactions:user_id:{}", COALESCE_PREFIX, user_id)
}

pub fn top_users(user_id: &str) -> String {
    format!("{}:usecase:transaction:top_users:user_id:{}", COALESCE_PREFIX, user_id)
}
