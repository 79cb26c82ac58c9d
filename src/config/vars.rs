//! Environment variable interpolation for config files.
//!
//! Supports `${VAR}` (error if unset), `${VAR:-default}` (default if unset
//! or empty), and `$$` as an escape for a literal `$`. Unbraced `$VAR` is
//! intentionally not supported; braced forms keep YAML unambiguous.

use regex::Regex;
use std::env;
use std::sync::LazyLock;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                             # literal $
        |
        \$\{
            (?P<name>[A-Za-z_][A-Za-z0-9_]*)
            (?::-(?P<default>[^}]*))?
        \}
        ",
    )
    .expect("invalid interpolation pattern")
});

/// Interpolate environment variables in `input`.
///
/// All missing variables are collected so the operator sees every problem
/// at once instead of fixing them one re-run at a time.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    let mut errors = Vec::new();

    let text = VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            if caps.get(0).map(|m| m.as_str()) == Some("$$") {
                return "$".to_string();
            }

            let name = caps.name("name").map(|m| m.as_str()).unwrap_or("");
            let default = caps.name("default").map(|m| m.as_str());

            match env::var(name) {
                Ok(value) if value.contains('\n') || value.contains('\r') => {
                    errors.push(format!(
                        "environment variable '{name}' contains newlines, which is not allowed"
                    ));
                    String::new()
                }
                Ok(value) if value.is_empty() => default.unwrap_or("").to_string(),
                Ok(value) => value,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        errors.push(format!("environment variable '{name}' is not set"));
                        String::new()
                    }
                },
            }
        })
        .to_string();

    if errors.is_empty() {
        Ok(text)
    } else {
        Err(errors)
    }
}
