//! Bundle assembly: the client runtime followed by one statement that
//! constructs the client from a project's configuration.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RegistryError;
use crate::error::Result;
use crate::project::ProjectStore;

/// Client runtime shipped with the registry.
pub const DEFAULT_RUNTIME: &str = include_str!("../assets/able.js");

/// Static runtime preamble shared by every generated bundle.
#[derive(Debug, Clone)]
pub struct BundleTemplate {
    preamble: Arc<str>,
}

impl BundleTemplate {
    pub fn new(preamble: impl Into<Arc<str>>) -> Self {
        Self {
            preamble: preamble.into(),
        }
    }

    /// Read the runtime once; bundles never touch the filesystem afterwards.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let preamble = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RegistryError::io(path, source))?;
        tracing::debug!(path = %path.display(), bytes = preamble.len(), "loaded bundle runtime");
        Ok(Self::new(preamble))
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn render(&self, project: &ProjectStore, subject: &Value, remote_now: i64) -> String {
        let subject = script_safe_json(subject.to_string());
        let defaults = project.defaults_json();
        let experiments = project.serialize();

        let mut out = String::with_capacity(
            self.preamble.len() + defaults.len() + subject.len() + experiments.len() + 96,
        );
        out.push_str(&self.preamble);
        out.push_str("var able = new Able({remoteNow:");
        out.push_str(&remote_now.to_string());
        out.push_str(",defaults:");
        out.push_str(defaults);
        out.push_str(",subject:");
        out.push_str(&subject);
        out.push_str(",experiments:");
        out.push_str(experiments);
        out.push_str("});");
        out
    }
}

impl Default for BundleTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME)
    }
}

/// Escape the characters that let JSON text break out of a script context.
///
/// They can only occur inside JSON strings, where `\uXXXX` is an equivalent
/// spelling, so the result parses to the same value.
pub(crate) fn script_safe_json(json: String) -> String {
    if !json.contains(['<', '>', '&', '\u{2028}', '\u{2029}']) {
        return json;
    }
    let mut out = String::with_capacity(json.len() + 16);
    for ch in json.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn project() -> ProjectStore {
        ProjectStore::new(
            "checkout",
            json!({"a": 1}).as_object().cloned().unwrap_or_default(),
            vec![json!({"id": "x"})],
        )
    }

    #[test]
    fn renders_client_statement_after_preamble() {
        let template = BundleTemplate::new("/*runtime*/\n");
        let bundle = template.render(&project(), &json!({"id": "u1"}), 1_700_000_000_000);
        assert_eq!(
            bundle,
            "/*runtime*/\nvar able = new Able({remoteNow:1700000000000,defaults:{\"a\":1},subject:{\"id\":\"u1\"},experiments:[{\"id\":\"x\"}]});"
        );
    }

    #[test]
    fn default_template_is_the_shipped_runtime() {
        let bundle = BundleTemplate::default().render(&ProjectStore::missing(), &Value::Null, 0);
        assert!(bundle.starts_with(DEFAULT_RUNTIME));
        assert!(bundle.ends_with("defaults:{},subject:null,experiments:[]});"));
    }

    #[test]
    fn subject_cannot_close_a_script_tag() {
        let bundle = BundleTemplate::new("").render(
            &ProjectStore::missing(),
            &json!({"name": "</script><script>alert(1)</script>"}),
            0,
        );
        assert!(!bundle.contains("</script>"));
        assert!(bundle.contains(r#"subject:{"name":"\u003c/script\u003e\u003cscript\u003e"#));
    }

    #[test]
    fn escaped_json_round_trips() {
        let value = json!({"s": "a<b>&c\u{2028}\u{2029}"});
        let escaped = script_safe_json(value.to_string());
        assert_eq!(serde_json::from_str::<Value>(&escaped).unwrap(), value);
        assert!(!escaped.contains('\u{2028}'));
    }

    #[test]
    fn plain_json_is_untouched() {
        assert_eq!(script_safe_json(r#"{"a":1}"#.to_string()), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn runtime_file_is_read_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runtime.js");
        std::fs::write(&path, "var Able = function () {};\n").unwrap();

        let template = BundleTemplate::from_file(&path).await.unwrap();
        assert_eq!(template.preamble(), "var Able = function () {};\n");

        let err = BundleTemplate::from_file(&tmp.path().join("missing.js"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Io { .. }));
    }
}
