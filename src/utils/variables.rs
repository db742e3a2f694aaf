use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::trace;

/// Matches `${name}` placeholders; the name runs up to the first closing brace.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(.*?)\}").expect("placeholder regex must compile"));

/// Errors raised while filling a command template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VariableError {
    #[error("missing value for variable '{name}'")]
    Missing { name: String },
}

/// Scan `template` for placeholder names.
///
/// Names are returned in order of appearance; a name used twice appears twice.
pub fn variable_names(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Replace every `${name}` in `template` with `bindings[name]`.
///
/// Fails on the first placeholder without a binding. Unused bindings are ignored.
pub fn resolve(template: &str, bindings: &BTreeMap<String, String>) -> Result<String, VariableError> {
    if let Some(name) = variable_names(template)
        .into_iter()
        .find(|name| !bindings.contains_key(name))
    {
        return Err(VariableError::Missing { name });
    }

    let resolved = PLACEHOLDER.replace_all(template, |cap: &regex::Captures<'_>| {
        // presence checked above
        bindings.get(&cap[1]).cloned().unwrap_or_default()
    });
    Ok(resolved.into_owned())
}

/// Bindings with secure values replaced by `[REDACTED]`, for `Debug` output.
pub(crate) fn masked<'a>(
    bindings: &'a BTreeMap<String, String>,
    secure_names: &BTreeSet<String>,
) -> BTreeMap<&'a str, &'a str> {
    bindings
        .iter()
        .map(|(name, value)| {
            let shown = if secure_names.contains(name) {
                "[REDACTED]"
            } else {
                value.as_str()
            };
            (name.as_str(), shown)
        })
        .collect()
}

/// Masks the values of secure variables in arbitrary text.
///
/// Each occurrence of a secure value becomes `[REDACTED:<name>]`. Longer values
/// are replaced first so a secret containing another secret is masked whole.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<(String, String)>,
}

impl Redactor {
    /// Build from the run's bindings; names without a bound (non-empty) value are skipped.
    pub fn new(bindings: &BTreeMap<String, String>, secure_names: &BTreeSet<String>) -> Self {
        let mut secrets: Vec<(String, String)> = secure_names
            .iter()
            .filter_map(|name| {
                bindings
                    .get(name)
                    .filter(|value| !value.is_empty())
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        secrets.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
        trace!(target: "curly::variables", secure = secrets.len(), "Redactor built");
        Self { secrets }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (name, value) in &self.secrets {
            if out.contains(value.as_str()) {
                out = out.replace(value.as_str(), &format!("[REDACTED:{name}]"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_names_in_order_with_duplicates() {
        let names = variable_names("-F a=${x} -F b=${y} /p/${x}");
        assert_eq!(names, vec!["x", "y", "x"]);
        assert!(variable_names("/plain/path").is_empty());
    }

    #[test]
    fn test_resolve_replaces_all_occurrences() {
        let vars = bindings(&[("x", "1"), ("y", "2"), ("unused", "z")]);
        assert_eq!(resolve("${x}-${y}-${x}", &vars).unwrap(), "1-2-1");
    }

    #[test]
    fn test_resolve_reports_first_missing() {
        let vars = bindings(&[("x", "1")]);
        let err = resolve("${x}/${a}/${b}", &vars).unwrap_err();
        assert_eq!(err, VariableError::Missing { name: "a".into() });
        assert_eq!(err.to_string(), "missing value for variable 'a'");
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        let vars = bindings(&[]);
        assert_eq!(resolve("/p/${open", &vars).unwrap(), "/p/${open");
    }

    #[test]
    fn test_redactor_masks_longest_first() {
        let vars = bindings(&[("short", "abc"), ("long", "abcdef"), ("public", "abc-pub")]);
        let secure = BTreeSet::from(["short".to_string(), "long".to_string()]);
        let redactor = Redactor::new(&vars, &secure);
        assert_eq!(
            redactor.redact("abcdef and abc"),
            "[REDACTED:long] and [REDACTED:short]"
        );
    }

    #[test]
    fn test_redactor_skips_empty_and_unbound() {
        let vars = bindings(&[("empty", "")]);
        let secure = BTreeSet::from(["empty".to_string(), "ghost".to_string()]);
        let redactor = Redactor::new(&vars, &secure);
        assert!(redactor.is_empty());
        assert_eq!(redactor.redact("unchanged"), "unchanged");
    }

    #[test]
    fn test_masked_hides_only_secure_values() {
        let vars = bindings(&[("site", "/content"), ("pw", "hunter2")]);
        let secure = BTreeSet::from(["pw".to_string()]);
        let shown = masked(&vars, &secure);
        assert_eq!(shown["site"], "/content");
        assert_eq!(shown["pw"], "[REDACTED]");
    }
}
