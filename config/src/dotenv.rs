//! Minimal `.env` parser for the project-local override layer (see
//! [`crate::load_and_apply`]): `KEY=VALUE` lines, `#` comments, optional
//! quoting. No multiline values, no variable interpolation — EchoGarden's
//! `.env` is meant for a handful of overrides (LLM endpoint, API keys), not a
//! general-purpose shell-env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// `.env` lives in `override_dir` if given, else the current working directory.
fn dotenv_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = override_dir.map(Path::to_path_buf).or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return inner.replace("\\\"", "\"");
    }
    if let Some(inner) = value.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return inner.to_string();
    }
    value.to_string()
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim().to_string();
    if key.is_empty() {
        return None;
    }
    Some((key, unquote(value.trim())))
}

fn parse_dotenv(content: &str) -> HashMap<String, String> {
    content.lines().filter_map(parse_line).collect()
}

/// Loads `.env` from `override_dir` (or the current directory). A missing
/// file is not an error — it just yields an empty map.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    match dotenv_path(override_dir) {
        Some(path) => std::fs::read_to_string(path).map(|content| parse_dotenv(&content)),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_assignments() {
        let m = parse_dotenv("FOO=bar\nBAZ=quux\n");
        assert_eq!(m.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(m.get("BAZ"), Some(&"quux".to_string()));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let m = parse_dotenv("\n# a comment\nKEY=val\n  \n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("KEY"), Some(&"val".to_string()));
    }

    #[test]
    fn double_quoted_value_is_unwrapped() {
        let m = parse_dotenv(r#"KEY="hello world""#);
        assert_eq!(m.get("KEY"), Some(&"hello world".to_string()));
    }

    #[test]
    fn single_quoted_value_is_unwrapped() {
        let m = parse_dotenv("KEY='single quoted'");
        assert_eq!(m.get("KEY"), Some(&"single quoted".to_string()));
    }

    #[test]
    fn line_missing_equals_is_ignored() {
        let m = parse_dotenv("NOT_KEY_VALUE\nKEY=val\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("KEY"), Some(&"val".to_string()));
    }

    #[test]
    fn blank_key_is_ignored() {
        let m = parse_dotenv("=value_only\nKEY=ok\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("KEY"), Some(&"ok".to_string()));
    }

    #[test]
    fn empty_content_yields_empty_map() {
        assert!(parse_dotenv("").is_empty());
    }

    #[test]
    fn bare_equals_yields_empty_value() {
        let m = parse_dotenv("KEY=\nOTHER=val\n");
        assert_eq!(m.get("KEY"), Some(&String::new()));
        assert_eq!(m.get("OTHER"), Some(&"val".to_string()));
    }

    #[test]
    fn empty_double_quoted_value() {
        let m = parse_dotenv(r#"KEY="""#);
        assert_eq!(m.get("KEY"), Some(&String::new()));
    }

    #[test]
    fn escaped_double_quote_inside_value() {
        let m = parse_dotenv(r#"KEY="say \"hi\"""#);
        assert_eq!(m.get("KEY"), Some(&"say \"hi\"".to_string()));
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "A=1\nB=2\n").unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(m.get("A"), Some(&"1".to_string()));
        assert_eq!(m.get("B"), Some(&"2".to_string()));
    }
}
