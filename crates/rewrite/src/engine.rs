//! First-match-wins evaluation of a request path against the rule table.

use crate::rules::{Action, Condition};
use crate::table::RuleTable;
use std::collections::HashSet;
use std::sync::Arc;

/// The request attributes rule conditions may inspect.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Lowercased header names present on the request.
    pub headers: HashSet<String>,
    /// Query parameter keys present on the request.
    pub query_params: HashSet<String>,
}

impl RequestContext {
    pub fn with_header(mut self, name: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase());
        self
    }

    pub fn with_query_param(mut self, name: &str) -> Self {
        self.query_params.insert(name.to_string());
        self
    }

    fn satisfies(&self, condition: &Condition) -> bool {
        match condition {
            Condition::Header { header } => self.headers.contains(&header.to_ascii_lowercase()),
            Condition::Query { query } => self.query_params.contains(query),
        }
    }
}

/// Routing decision handed back to the gateway adapter.
///
/// `NoMatch` is control flow, not an error: the gateway falls through to
/// normal static/document serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Rewrite(String),
    RedirectPermanent(String),
    RedirectTemporary(String),
    Proxy(String),
    NoMatch,
}

/// Evaluates request paths against the active rule snapshot.
#[derive(Clone)]
pub struct RedirectEngine {
    table: Arc<RuleTable>,
}

impl RedirectEngine {
    pub fn new(table: Arc<RuleTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<RuleTable> {
        &self.table
    }

    /// Walk the snapshot in ascending priority; the first rule whose pattern
    /// matches the path and whose condition (if any) holds decides the
    /// outcome. Later rules are never consulted once one matches, even when
    /// the action is a `Proxy` that may fail downstream.
    pub fn route(&self, path: &str, context: &RequestContext) -> Decision {
        let snapshot = self.table.snapshot();
        for compiled in snapshot.rules() {
            let Some(captures) = compiled.regex.captures(path) else {
                continue;
            };
            if let Some(condition) = &compiled.rule.condition {
                if !context.satisfies(condition) {
                    continue;
                }
            }

            let mut target = String::new();
            captures.expand(&compiled.rule.target, &mut target);
            tracing::debug!(
                path,
                priority = compiled.rule.priority,
                target = %target,
                "rule matched"
            );
            return match compiled.rule.action {
                Action::Rewrite => Decision::Rewrite(target),
                Action::RedirectPermanent => Decision::RedirectPermanent(target),
                Action::RedirectTemporary => Decision::RedirectTemporary(target),
                Action::Proxy => Decision::Proxy(target),
            };
        }
        Decision::NoMatch
    }
}
