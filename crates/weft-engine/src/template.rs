//! `{key}` placeholder expansion against a [`StateStore`].
//!
//! Supported forms:
//! - `{key}`: replaced by the key's canonical rendering; missing key is an error
//! - `{key?}`: optional; a missing key renders as the empty string
//! - `{{key}}`: escape, renders the literal text `{key}`
//!
//! Keys may carry one scope prefix (`{app:theme}`). Braces around anything
//! that is not an identifier (JSON snippets, prose) are left untouched.

use std::sync::OnceLock;

use regex::Regex;

use weft_core::error::{Result, WeftError};
use weft_core::state::StateStore;

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_]*(?::[A-Za-z_][A-Za-z0-9_]*)?";

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(&format!(r"\{{\{{({IDENT})\}}\}}|\{{({IDENT})(\?)?\}}")).unwrap()
    })
}

/// A placeholder found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub key: String,
    pub optional: bool,
}

/// List the placeholders a template references, in order of appearance.
pub fn placeholders(template: &str) -> Vec<Placeholder> {
    placeholder_regex()
        .captures_iter(template)
        .filter_map(|caps| {
            caps.get(2).map(|key| Placeholder {
                key: key.as_str().to_string(),
                optional: caps.get(3).is_some(),
            })
        })
        .collect()
}

/// Expand every placeholder in `template` using the current store contents.
///
/// Fails with [`WeftError::MissingStateKey`] on the first required key that is
/// unset; no partially substituted text is ever returned.
pub fn resolve(template: &str, store: &StateStore) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        if let Some(escaped) = caps.get(1) {
            out.push('{');
            out.push_str(escaped.as_str());
            out.push('}');
            continue;
        }

        let Some(key) = caps.get(2) else { continue };
        match store.get(key.as_str()) {
            Some(value) => out.push_str(&value.render()),
            None if caps.get(3).is_some() => {}
            None => {
                return Err(WeftError::MissingStateKey {
                    key: key.as_str().to_string(),
                    template: template.to_string(),
                })
            }
        }
    }

    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::value::Value;

    fn store(entries: &[(&str, &str)]) -> StateStore {
        StateStore::from_entries(entries.iter().map(|(k, v)| (*k, *v)))
    }

    #[test]
    fn test_resolve_substitutes_all_keys() {
        let s = store(&[("a", "1"), ("b", "2")]);
        assert_eq!(resolve("{a} and {b}", &s).unwrap(), "1 and 2");
    }

    #[test]
    fn test_resolve_missing_key_errors() {
        let err = resolve("{missing}", &StateStore::new()).unwrap_err();
        match err {
            WeftError::MissingStateKey { key, template } => {
                assert_eq!(key, "missing");
                assert_eq!(template, "{missing}");
            }
            other => panic!("expected MissingStateKey, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_reports_first_missing_key_after_present_ones() {
        let s = store(&[("a", "1")]);
        let err = resolve("{a} {b} {c}", &s).unwrap_err();
        assert!(matches!(err, WeftError::MissingStateKey { ref key, .. } if key == "b"));
    }

    #[test]
    fn test_optional_placeholder() {
        let s = store(&[("name", "Ada")]);
        assert_eq!(resolve("Hi {name}{suffix?}!", &s).unwrap(), "Hi Ada!");
    }

    #[test]
    fn test_escape_and_non_identifiers_untouched() {
        let s = store(&[("x", "9")]);
        assert_eq!(resolve("{{x}} is {x}", &s).unwrap(), "{x} is 9");
        assert_eq!(
            resolve(r#"Reply as {"score": {x}}"#, &s).unwrap(),
            r#"Reply as {"score": 9}"#
        );
        assert_eq!(resolve("{ x }", &s).unwrap(), "{ x }");
    }

    #[test]
    fn test_structured_values_render_pretty() {
        let mut s = StateStore::new();
        s.set("data", Value::from(serde_json::json!({"k": [1, 2]})));
        let out = resolve("Data:\n{data}", &s).unwrap();
        assert!(out.starts_with("Data:\n{\n"));
        assert!(out.contains("\"k\""));
    }

    #[test]
    fn test_scoped_keys() {
        let s = store(&[("app:theme", "dark")]);
        assert_eq!(resolve("theme={app:theme}", &s).unwrap(), "theme=dark");
    }

    #[test]
    fn test_placeholders_listing() {
        let found = placeholders("{a} {{b}} {c?}");
        assert_eq!(
            found,
            vec![
                Placeholder { key: "a".into(), optional: false },
                Placeholder { key: "c".into(), optional: true },
            ]
        );
    }
}
