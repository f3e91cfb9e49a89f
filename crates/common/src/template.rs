//! Named-placeholder SQL templating.
//!
//! Generated SQL text embeds `<NAME>` tokens (names are ASCII
//! alphanumerics and `_`). Operator SQL references its children through
//! tokens keyed by child operator id; the code generator substitutes inlined
//! child SQL and finally resolves every remaining token to its bare name,
//! which by the naming contract is the local input table created for that
//! child.

use std::collections::BTreeMap;

/// A SQL text template with `<NAME>` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringTemplate {
    text: String,
}

impl StringTemplate {
    /// Wraps raw template text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Raw template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Substitutes known placeholders, leaving unknown tokens untouched so
    /// the result can be rendered again with more substitutions.
    #[must_use]
    pub fn render(&self, args: &BTreeMap<String, String>) -> StringTemplate {
        StringTemplate::new(substitute(&self.text, |name| {
            args.get(name).cloned().unwrap_or_else(|| format!("<{name}>"))
        }))
    }

    /// Substitutes known placeholders and resolves every remaining token to
    /// its bare name. The output is final SQL text.
    #[must_use]
    pub fn resolve(&self, args: &BTreeMap<String, String>) -> String {
        substitute(&self.text, |name| {
            args.get(name).cloned().unwrap_or_else(|| name.to_string())
        })
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn substitute(text: &str, lookup: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail.find(|c: char| !is_token_char(c)) {
            // a non-empty token terminated by '>' is a placeholder
            Some(end) if end > 0 && tail[end..].starts_with('>') => {
                out.push_str(&lookup(&tail[..end]));
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('<');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::StringTemplate;
    use std::collections::BTreeMap;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_known_and_strips_unknown() {
        let t = StringTemplate::new("INSERT INTO <TAB> (<SQL>)");
        let out = t.resolve(&args(&[("SQL", "SELECT * FROM Op1")]));
        assert_eq!(out, "INSERT INTO TAB (SELECT * FROM Op1)");
    }

    #[test]
    fn render_keeps_unknown_tokens_for_later_passes() {
        let t = StringTemplate::new("SELECT A FROM <Op1> AS Op1");
        let kept = t.render(&args(&[]));
        assert_eq!(kept.text(), "SELECT A FROM <Op1> AS Op1");
        let out = kept.resolve(&args(&[("Op1", "(SELECT A FROM R)")]));
        assert_eq!(out, "SELECT A FROM (SELECT A FROM R) AS Op1");
    }

    #[test]
    fn comparison_operators_are_not_tokens() {
        let t = StringTemplate::new("SELECT A FROM <Op1> AS Op1 WHERE A < 5 AND B <= 7");
        let out = t.resolve(&args(&[]));
        assert_eq!(out, "SELECT A FROM Op1 AS Op1 WHERE A < 5 AND B <= 7");
    }
}
