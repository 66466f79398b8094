use std::path::PathBuf;

use crate::error::CliError;

/// `~/x` -> `$HOME/x`; anything else unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn parse_env_pair(raw: &str) -> Result<(String, String), CliError> {
    let (k, v) = raw
        .split_once('=')
        .ok_or_else(|| CliError::Input(format!("invalid --env {raw:?} (expected KEY=VALUE)")))?;
    let key = k.trim();
    if key.is_empty() {
        return Err(CliError::Input(format!("invalid --env {raw:?} (empty key)")));
    }
    Ok((key.to_string(), v.to_string()))
}

pub fn parse_env_file(path: &str) -> Result<Vec<(String, String)>, CliError> {
    let content = std::fs::read_to_string(expand_home(path))
        .map_err(|e| CliError::Input(format!("failed to read env file {path}: {e}")))?;
    let mut out = Vec::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (k, v) = line.split_once('=').ok_or_else(|| {
            CliError::Input(format!(
                "invalid env line at {} (expected KEY=VALUE)",
                idx + 1
            ))
        })?;
        let key = k.trim();
        if key.is_empty() {
            return Err(CliError::Input(format!(
                "invalid env line at {} (empty key)",
                idx + 1
            )));
        }
        let value = parse_env_value(v.trim(), idx + 1)?;
        out.push((key.to_string(), value));
    }

    Ok(out)
}

fn parse_env_value(value: &str, line_no: usize) -> Result<String, CliError> {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        return unescape_env_value(&value[1..value.len() - 1], line_no);
    }
    Ok(value.to_string())
}

fn unescape_env_value(value: &str, line_no: usize) -> Result<String, CliError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(next) = chars.next() else {
            return Err(CliError::Input(format!(
                "invalid escape at line {} (trailing backslash)",
                line_no
            )));
        };
        match next {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn env_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.env");
        std::fs::write(
            &path,
            "# proxy settings\nHTTP_PROXY=http://127.0.0.1:8080\n\nTOKEN=\"a\\tb\"\nNAME='x y'\n",
        )
        .unwrap();
        let vars = parse_env_file(path.to_str().unwrap()).unwrap();
        assert_eq!(
            vars,
            vec![
                ("HTTP_PROXY".to_string(), "http://127.0.0.1:8080".to_string()),
                ("TOKEN".to_string(), "a\tb".to_string()),
                ("NAME".to_string(), "x y".to_string()),
            ]
        );
    }

    #[test]
    fn env_file_rejects_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.env");
        std::fs::write(&path, "NOEQUALS\n").unwrap();
        assert!(matches!(
            parse_env_file(path.to_str().unwrap()),
            Err(CliError::Input(_))
        ));
    }

    #[test]
    fn env_pairs() {
        assert_eq!(
            parse_env_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_env_pair("=x").is_err());
        assert!(parse_env_pair("x").is_err());
    }

    #[test]
    fn home_expansion_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(expand_home("rel/x"), PathBuf::from("rel/x"));
    }
}
