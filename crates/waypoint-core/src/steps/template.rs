//! Message templates.
//!
//! A template is an ordinary JSON value in which any string leaf of the form
//! `${contract:NAME}`, `${module:NAME}` or `${var:NAME}` is replaced when the
//! message is sent. Contract and module placeholders resolve against the
//! deployment state; variables are only bound inside validation flows.

use std::fmt;

use serde_json::{Map, Value};

use crate::types::StoreKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placeholder {
    Contract(String),
    Module(String),
    Var(String),
}

impl Placeholder {
    /// Parse a whole string as a placeholder.
    pub fn parse(raw: &str) -> Option<Self> {
        let inner = raw.strip_prefix("${")?.strip_suffix('}')?;
        let (kind, name) = inner.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        match kind {
            "contract" => Some(Self::Contract(name.to_string())),
            "module" => Some(Self::Module(name.to_string())),
            "var" => Some(Self::Var(name.to_string())),
            _ => None,
        }
    }

    /// The store key this placeholder reads, if it reads one.
    pub fn store_key(&self) -> Option<StoreKey> {
        match self {
            Placeholder::Contract(name) => Some(StoreKey::contract(name)),
            Placeholder::Module(name) => Some(StoreKey::module(name)),
            Placeholder::Var(_) => None,
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Contract(name) => write!(f, "${{contract:{name}}}"),
            Placeholder::Module(name) => write!(f, "${{module:{name}}}"),
            Placeholder::Var(name) => write!(f, "${{var:{name}}}"),
        }
    }
}

/// Shorthand for a contract placeholder string.
pub fn contract_ref(name: &str) -> String {
    Placeholder::Contract(name.to_string()).to_string()
}

/// Shorthand for a variable placeholder string.
pub fn var_ref(name: &str) -> String {
    Placeholder::Var(name.to_string()).to_string()
}

/// Every placeholder in `template`, in document order, without duplicates.
pub fn placeholders(template: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    collect(template, &mut found);
    found
}

/// Store keys a template needs before it can be rendered.
pub fn store_keys(template: &Value) -> Vec<StoreKey> {
    placeholders(template)
        .iter()
        .filter_map(Placeholder::store_key)
        .collect()
}

fn collect(value: &Value, found: &mut Vec<Placeholder>) {
    match value {
        Value::String(s) => {
            if let Some(p) = Placeholder::parse(s)
                && !found.contains(&p)
            {
                found.push(p);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect(item, found)),
        Value::Object(map) => map.values().for_each(|item| collect(item, found)),
        _ => {}
    }
}

/// Substitute placeholders using `resolve`.
///
/// Fails with the first placeholder `resolve` cannot answer.
pub fn render<F>(template: &Value, resolve: &F) -> Result<Value, Placeholder>
where
    F: Fn(&Placeholder) -> Option<Value>,
{
    match template {
        Value::String(s) => match Placeholder::parse(s) {
            Some(p) => resolve(&p).ok_or(p),
            None => Ok(template.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| render(item, resolve))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), render(item, resolve)?);
            }
            Ok(Value::Object(out))
        }
        _ => Ok(template.clone()),
    }
}

/// Shallow-merge `overrides` into `base` when both are objects.
pub fn merge(base: Value, overrides: Option<&Value>) -> Value {
    match (base, overrides) {
        (Value::Object(mut base), Some(Value::Object(extra))) => {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
            Value::Object(base)
        }
        (base, _) => base,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_recognises_known_kinds_only() {
        assert_eq!(
            Placeholder::parse("${contract:oracle}"),
            Some(Placeholder::Contract("oracle".to_string()))
        );
        assert_eq!(Placeholder::parse("${thing:oracle}"), None);
        assert_eq!(Placeholder::parse("${contract:}"), None);
        assert_eq!(Placeholder::parse("prefix ${contract:oracle}"), None);
    }

    #[test]
    fn placeholders_are_deduplicated() {
        let msg = json!({
            "a": "${contract:oracle}",
            "b": ["${contract:oracle}", "${module:params}"],
            "c": {"d": "${var:account_id}"}
        });
        assert_eq!(placeholders(&msg).len(), 3);
        assert_eq!(
            store_keys(&msg),
            vec![StoreKey::contract("oracle"), StoreKey::module("params")]
        );
    }

    #[test]
    fn render_substitutes_nested_values() {
        let msg = json!({"config": {"oracle": "${contract:oracle}", "n": 3}});
        let out = render(&msg, &|p: &Placeholder| match p {
            Placeholder::Contract(name) if name == "oracle" => Some(json!("addr-oracle")),
            _ => None,
        })
        .unwrap();
        assert_eq!(out, json!({"config": {"oracle": "addr-oracle", "n": 3}}));
    }

    #[test]
    fn render_reports_unresolved_placeholder() {
        let msg = json!(["${contract:missing}"]);
        let err = render(&msg, &|_: &Placeholder| None).unwrap_err();
        assert_eq!(err, Placeholder::Contract("missing".to_string()));
    }

    #[test]
    fn merge_overrides_top_level_fields() {
        let merged = merge(json!({"a": 1, "b": 2}), Some(&json!({"b": 3, "c": 4})));
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
    }
}
