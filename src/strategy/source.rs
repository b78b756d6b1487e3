//! Strategy script files and their metadata header.
//!
//! A script may start with comment lines of the form `// @key value`:
//!
//! ```text
//! // @name Martingale
//! // @version 1.0
//! // @author someone
//! ```
//!
//! The header ends at the first line that is neither blank nor a comment.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use super::StrategyMeta;

/// A strategy script read from disk, with its parsed header.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSource {
    pub meta: StrategyMeta,
    pub source: String,
}

impl ScriptSource {
    /// Read a script file. The file stem names the strategy unless the
    /// header sets `@name`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read strategy script: {}", path.display()))?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("script");
        Ok(Self::from_source(fallback, source))
    }

    pub fn from_source(fallback_name: &str, source: String) -> Self {
        let meta = parse_header(&source, fallback_name);
        Self { meta, source }
    }
}

/// Extract [`StrategyMeta`] from the leading `// @key value` lines.
pub fn parse_header(source: &str, fallback_name: &str) -> StrategyMeta {
    let mut meta = StrategyMeta {
        name: fallback_name.to_string(),
        version: None,
        author: None,
        trusted: false,
    };

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(comment) = line.strip_prefix("//") else {
            break;
        };
        let Some(tag) = comment.trim().strip_prefix('@') else {
            continue;
        };
        let (key, value) = match tag.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (tag, ""),
        };
        match key {
            "name" if !value.is_empty() => meta.name = value.to_string(),
            "version" if !value.is_empty() => meta.version = Some(value.to_string()),
            "author" if !value.is_empty() => meta.author = Some(value.to_string()),
            "trusted" => meta.trusted = value.is_empty() || value.eq_ignore_ascii_case("true"),
            other => debug!(key = other, "Ignoring unknown strategy header tag"),
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_fields() {
        let src = "// @name Martingale x2\n// @version 1.0\n//   @author  ana \n\nimport math;\n// @name ignored";
        let meta = parse_header(src, "file");
        assert_eq!(meta.name, "Martingale x2");
        assert_eq!(meta.version.as_deref(), Some("1.0"));
        assert_eq!(meta.author.as_deref(), Some("ana"));
        assert!(!meta.trusted);
    }

    #[test]
    fn test_parse_header_defaults_and_trusted_flag() {
        let meta = parse_header("fn next_bet(ctx) { return nil; }", "fallback");
        assert_eq!(meta.name, "fallback");
        assert!(meta.version.is_none());

        assert!(parse_header("// @trusted\n", "x").trusted);
        assert!(parse_header("// @trusted true\n", "x").trusted);
        assert!(!parse_header("// @trusted no\n", "x").trusted);
    }

    #[test]
    fn test_from_file_uses_stem() {
        let dir = std::env::temp_dir().join(format!("dicebot-src-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flat_bet.dbs");
        std::fs::write(&path, "fn next_bet(ctx) { return nil; }").unwrap();

        let script = ScriptSource::from_file(&path).unwrap();
        assert_eq!(script.meta.name, "flat_bet");
        assert!(script.source.contains("next_bet"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_from_file_missing() {
        let err = ScriptSource::from_file("/definitely/not/here.dbs").unwrap_err();
        assert!(err.to_string().contains("Failed to read strategy script"));
    }
}
