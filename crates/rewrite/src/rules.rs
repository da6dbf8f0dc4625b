//! Rule definitions and their declarative TOML source format.

use serde::{Deserialize, Serialize};

/// Effect of a matched rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Internal rewrite carried out by the front-end gateway.
    Rewrite,
    /// HTTP 301.
    RedirectPermanent,
    /// HTTP 302.
    RedirectTemporary,
    /// Dispatch to the resolution engine (or upstream) instead of answering
    /// with a location.
    Proxy,
}

/// Optional request predicate a rule may require besides its path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// Header of this (lowercase) name must be present.
    Header { header: String },
    /// Query parameter of this name must be present.
    Query { query: String },
}

/// One prioritized pattern → target mapping.
///
/// Lower priority is evaluated first; priorities are unique across a loaded
/// table. The target may reference the pattern's capture groups as `$1`,
/// `$2`, ... (`${1}` where adjacency is ambiguous).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub priority: u32,
    pub pattern: String,
    #[serde(default)]
    pub condition: Option<Condition>,
    pub action: Action,
    pub target: String,
}

/// Top-level shape of the TOML rule file: a `[[rule]]` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_rule_file_parses() {
        let doc = r#"
            [[rule]]
            priority = 1
            pattern = "/islandora/object/(.+)"
            action = "redirect_permanent"
            target = "/items/$1"

            [[rule]]
            priority = 2
            pattern = "/islandora/(.+)"
            action = "rewrite"
            target = "/legacy/$1"
            condition = { header = "x-legacy-client" }

            [[rule]]
            priority = 3
            pattern = "/search"
            action = "redirect_temporary"
            target = "/find"
            condition = { query = "q" }
        "#;
        let file: RuleFile = toml::from_str(doc).unwrap();
        assert_eq!(file.rules.len(), 3);
        assert_eq!(file.rules[0].action, Action::RedirectPermanent);
        assert_eq!(
            file.rules[1].condition,
            Some(Condition::Header {
                header: "x-legacy-client".into()
            })
        );
        assert_eq!(
            file.rules[2].condition,
            Some(Condition::Query { query: "q".into() })
        );
    }

    #[test]
    fn empty_rule_file_is_valid() {
        let file: RuleFile = toml::from_str("").unwrap();
        assert!(file.rules.is_empty());
    }
}
