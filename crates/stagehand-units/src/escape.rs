//! Quoting for command lines and unit names.
//!
//! Each argument of an `Exec*=` line is escaped one character at a time and
//! then wrapped in double quotes:
//!
//! | Character                     | Becomes    | Arguments  |
//! |-------------------------------|------------|------------|
//! | `"`                           | `\"`       | all        |
//! | `\`                           | `\\`       | all        |
//! | `'`                           | `\'`       | all        |
//! | BEL, BS, FF, LF, CR, TAB, VT  | `\a` `\b` `\f` `\n` `\r` `\t` `\v` | all |
//! | other ASCII control           | `\xNN`     | all        |
//! | other non-printing character  | `\uNNNN` or `\UNNNNNNNN` | all |
//! | `$`                           | `$$`       | all but the first |
//!
//! A character is printing if it is a letter, mark, number, punctuation,
//! symbol or the ASCII space; controls, format characters, separators,
//! private-use and unassigned code points are not.
//!
//! The supervisor expands `$VAR` in arguments but not in the executable
//! path, so only later arguments need `$` doubled.

use std::fmt::Write as _;

use stagehand_common::error::{Result, StagehandError};
use unicode_general_category::{GeneralCategory, get_general_category};

/// Escapes a single argument at position `index` and wraps it in double quotes.
#[must_use]
pub fn exec_escape(index: usize, arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0b}' => out.push_str("\\v"),
            '$' if index > 0 => out.push_str("$$"),
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\x{:02x}", u32::from(c));
            }
            c if !is_printing(c) && u32::from(c) < 0x1_0000 => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c if !is_printing(c) => {
                let _ = write!(out, "\\U{:08x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_printing(c: char) -> bool {
    c == ' '
        || !matches!(
            get_general_category(c),
            GeneralCategory::Control
                | GeneralCategory::Format
                | GeneralCategory::Surrogate
                | GeneralCategory::PrivateUse
                | GeneralCategory::Unassigned
                | GeneralCategory::SpaceSeparator
                | GeneralCategory::LineSeparator
                | GeneralCategory::ParagraphSeparator
        )
}

/// Quotes a whole command line for an `Exec*=` directive.
///
/// # Errors
///
/// Returns a configuration error if `exec` is empty.
pub fn quote_exec<S: AsRef<str>>(exec: &[S]) -> Result<String> {
    if exec.is_empty() {
        return Err(StagehandError::config("empty exec"));
    }
    Ok(exec
        .iter()
        .enumerate()
        .map(|(i, arg)| exec_escape(i, arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" "))
}

/// Escapes a path for use as a unit instance name (`systemd-escape --path`).
///
/// Slashes become `-`, leading and repeated slashes are dropped, and any
/// byte outside `[A-Za-z0-9:_.]` (or a leading `.`) becomes `\xNN`. The
/// root path escapes to `-`.
#[must_use]
pub fn unit_path_escape(path: &str) -> String {
    let cleaned = stagehand_core::filesystem::clean(std::path::Path::new(path));
    let cleaned = cleaned.to_string_lossy();
    let trimmed = cleaned.trim_matches('/');

    let mut out = String::with_capacity(trimmed.len());
    let mut in_slashes = false;
    for (i, b) in trimmed.bytes().enumerate() {
        if b == b'/' {
            in_slashes = true;
            continue;
        }
        if in_slashes {
            out.push('-');
            in_slashes = false;
        }
        let valid = b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'.');
        if valid && !(i == 0 && b == b'.') {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "\\x{b:02x}");
        }
    }
    if out.is_empty() {
        out.push('-');
    }
    out
}
