// ABOUTME: Pure provider selection: which backends to try for a language, and in what order
// ABOUTME: Knows nothing about availability; the manager probes candidates in the returned order

use crate::providers::LanguageSupport;
use crate::types::WorkspaceType;
use std::collections::HashMap;

/// Registered provider types able to run `language`, most preferred first.
///
/// `preferred` (an explicit request or the manager default) leads when it is
/// registered and supports the language. The rest follow `priority`; types
/// missing from `priority` are never fallback targets. `language` is a
/// canonical id, or `None` when any language will do.
pub fn candidate_order(
    language: Option<&str>,
    preferred: Option<WorkspaceType>,
    priority: &[WorkspaceType],
    registered: &HashMap<WorkspaceType, LanguageSupport>,
) -> Vec<WorkspaceType> {
    let eligible = |t: &WorkspaceType| match (registered.get(t), language) {
        (Some(_), None) => true,
        (Some(support), Some(language)) => support.supports(language),
        (None, _) => false,
    };

    let mut order = Vec::with_capacity(priority.len() + 1);
    for t in preferred.iter().chain(priority.iter()) {
        if eligible(t) && !order.contains(t) {
            order.push(*t);
        }
    }
    order
}
