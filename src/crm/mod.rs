//! Accounts, contacts, leads, deals, territories and the sales pipeline.

pub mod accounts;
pub mod contacts;
pub mod deals;
pub mod leads;
pub mod pipeline;
mod references;
pub mod territories;

use axum::Router;
use std::sync::Arc;

use crate::core::shared::state::AppState;

pub(crate) use references::{
    ensure_account, ensure_contact, ensure_deal, ensure_lead, ensure_territory,
    unlink_dependents, Parent,
};

pub fn configure_crm_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(pipeline::configure())
        .merge(accounts::configure())
        .merge(contacts::configure())
        .merge(leads::configure())
        .merge(deals::configure())
        .merge(territories::configure())
}

/// Trims, drops blanks and duplicates while keeping the first spelling.
pub(crate) fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !seen.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            seen.push(tag.to_string());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(vec![
            " vip ".into(),
            "".into(),
            "VIP".into(),
            "partner".into(),
        ]);
        assert_eq!(tags, vec!["vip".to_string(), "partner".to_string()]);
    }
}
