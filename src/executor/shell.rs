//! `cmd`/`sh` command execution (spec.md §4.5).
//!
//! Parameters interpolate as `@name` (`cmd`) or `$name` (`sh`). Each argument is
//! shell-escaped unless embedded in an inline string. Stdout is captured and trimmed of
//! a trailing newline for single-line commands; stderr is surfaced to `/log`.

use indexmap::IndexMap;

use super::Language;
use crate::error::RuntimeError;
use crate::host::Subprocess;
use crate::structured_value::StructuredValue;
use crate::value::Value;

/// Substitutes `@name`/`$name` placeholders in `template` with shell-escaped parameter
/// values, per the active command style.
fn interpolate_command(lang: Language, template: &str, params: &IndexMap<String, StructuredValue>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    let sigil = match lang {
        Language::Cmd => '@',
        _ => '$',
    };
    while let Some((_, c)) = chars.next() {
        if c == sigil {
            let mut name = String::new();
            while let Some((_, next)) = chars.peek() {
                if next.is_alphanumeric() || *next == '_' {
                    name.push(*next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push(c);
                continue;
            }
            match params.get(&name) {
                Some(value) => out.push_str(&shell_escape(value.as_text())),
                None => {
                    out.push(sigil);
                    out.push_str(&name);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Single-quotes an argument for POSIX shells, escaping embedded single quotes.
fn shell_escape(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')) {
        return arg.to_string();
    }
    let mut escaped = String::with_capacity(arg.len() + 2);
    escaped.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(c);
        }
    }
    escaped.push('\'');
    escaped
}

pub fn run_command(
    subprocess: &dyn Subprocess,
    lang: Language,
    template: &str,
    params: &IndexMap<String, StructuredValue>,
    cwd: Option<&str>,
) -> Result<Value, RuntimeError> {
    let command = interpolate_command(lang, template, params);
    let output = subprocess.spawn(&command, &[], cwd, None)?;
    if output.exit_code != 0 {
        return Err(RuntimeError::execution(format!(
            "command exited with status {}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }
    let trimmed = if output.stdout.lines().count() <= 1 {
        output.stdout.trim_end_matches('\n').to_string()
    } else {
        output.stdout
    };
    Ok(Value::String(trimmed))
}

#[cfg(test)]
mod tests {
    use super::{interpolate_command, shell_escape};
    use crate::executor::Language;
    use crate::structured_value::StructuredValue;
    use indexmap::IndexMap;

    #[test]
    fn cmd_style_substitutes_at_sigil() {
        let mut params = IndexMap::new();
        params.insert("name".to_string(), StructuredValue::text("Alice"));
        let rendered = interpolate_command(Language::Cmd, "echo @name", &params);
        assert_eq!(rendered, "echo Alice");
    }

    #[test]
    fn sh_style_substitutes_dollar_sigil() {
        let mut params = IndexMap::new();
        params.insert("name".to_string(), StructuredValue::text("Bob"));
        let rendered = interpolate_command(Language::Sh, "echo $name", &params);
        assert_eq!(rendered, "echo Bob");
    }

    #[test]
    fn shell_escape_quotes_special_characters() {
        assert_eq!(shell_escape("hello world"), "'hello world'");
        assert_eq!(shell_escape("safe-value_1"), "safe-value_1");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }
}
