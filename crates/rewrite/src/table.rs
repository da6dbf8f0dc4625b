//! Validated, atomically swappable snapshot of the redirect rules.
//!
//! A reload builds a complete new snapshot (compiled patterns, ascending
//! priority) before touching the active one; the swap is a single reference
//! store behind a short-lived lock, so readers see the old table in full or
//! the new table in full, never a mix. A failed load leaves the active
//! snapshot untouched.

use crate::errors::{Result, RewriteError};
use crate::rules::{Rule, RuleFile};
use parking_lot::RwLock;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// A rule with its pre-compiled, fully anchored pattern.
#[derive(Debug)]
pub struct CompiledRule {
    pub rule: Rule,
    pub regex: Regex,
}

/// Immutable view of a loaded rule table, ascending by priority.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    rules: Vec<CompiledRule>,
}

impl RuleSnapshot {
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Holder of the active snapshot; starts empty.
#[derive(Debug, Default)]
pub struct RuleTable {
    active: RwLock<Arc<RuleSnapshot>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and atomically activate a new rule set.
    pub fn load(&self, rules: Vec<Rule>) -> Result<()> {
        let snapshot = compile(rules)?;
        let count = snapshot.len();
        *self.active.write() = Arc::new(snapshot);
        tracing::info!(rules = count, "rule table activated");
        Ok(())
    }

    /// Load rules from a TOML `[[rule]]` file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: RuleFile = toml::from_str(&raw)?;
        self.load(file.rules)
    }

    /// Current active snapshot; cheap to clone and stable for the caller's
    /// whole request.
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.active.read().clone()
    }
}

fn compile(mut rules: Vec<Rule>) -> Result<RuleSnapshot> {
    rules.sort_by_key(|rule| rule.priority);

    for pair in rules.windows(2) {
        if pair[0].priority == pair[1].priority {
            return Err(RewriteError::InvalidRule {
                priority: pair[0].priority,
                reason: "duplicate priority".into(),
            });
        }
    }

    let mut compiled = Vec::with_capacity(rules.len());
    for rule in rules {
        // Anchor both ends: legacy paths match in full, substring hits do
        // not count.
        let regex =
            Regex::new(&format!("^(?:{})$", rule.pattern)).map_err(|err| {
                RewriteError::InvalidRule {
                    priority: rule.priority,
                    reason: format!("pattern does not compile: {err}"),
                }
            })?;

        let groups = regex.captures_len(); // includes group 0
        let references = template_group_refs(&rule.target).map_err(|reason| {
            RewriteError::InvalidRule {
                priority: rule.priority,
                reason,
            }
        })?;
        for reference in references {
            if reference as usize >= groups {
                return Err(RewriteError::InvalidRule {
                    priority: rule.priority,
                    reason: format!(
                        "target references capture group ${reference} but the pattern has {}",
                        groups - 1
                    ),
                });
            }
        }

        compiled.push(CompiledRule { rule, regex });
    }

    Ok(RuleSnapshot { rules: compiled })
}

/// Numbered capture-group references (`$1`, `${2}`, ...) in a target
/// template.
///
/// Expansion treats an unbraced reference as the longest run of word
/// characters after the `$`, so `$1x` names the (nonexistent) group `1x`
/// and expands to nothing. Templates like that are rejected here; the
/// braced form `${1}x` is the unambiguous spelling.
fn template_group_refs(template: &str) -> std::result::Result<Vec<u32>, String> {
    let mut refs = Vec::new();
    let mut chars = template.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        if ch != '$' {
            continue;
        }
        // `$$` is a literal dollar sign.
        if matches!(chars.peek(), Some((_, '$'))) {
            chars.next();
            continue;
        }
        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }
        let mut digits = String::new();
        while let Some((_, d)) = chars.peek().copied() {
            if d.is_ascii_digit() {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            continue;
        }
        if braced {
            if matches!(chars.peek(), Some((_, '}'))) {
                chars.next();
            } else {
                return Err(format!(
                    "braced reference ${{{digits} is not closed by '}}'"
                ));
            }
        } else if matches!(
            chars.peek(),
            Some((_, next)) if next.is_ascii_alphanumeric() || *next == '_'
        ) {
            return Err(format!(
                "reference ${digits} runs into a word character and would name a \
                 different group; write it as ${{{digits}}}"
            ));
        }
        let n = digits
            .parse::<u32>()
            .map_err(|_| format!("reference ${digits} is out of range"))?;
        refs.push(n);
    }
    Ok(refs)
}
