//! Supervisor unit file model and serializer.

use std::fmt;
use std::io::Write;
use std::path::Path;

use stagehand_common::error::{Result, StagehandError};

/// Sections a unit option can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// `[Unit]`.
    Unit,
    /// `[Service]`.
    Service,
    /// `[Socket]`.
    Socket,
}

impl Section {
    /// Header name without brackets.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unit => "Unit",
            Self::Service => "Service",
            Self::Socket => "Socket",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `Key=Value` line. Repeated keys are additive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOption {
    /// Section holding the option.
    pub section: Section,
    /// Directive name.
    pub name: String,
    /// Directive value, already quoted where needed.
    pub value: String,
}

impl UnitOption {
    /// Creates an option.
    pub fn new(section: Section, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            section,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Shorthand for a `[Unit]` option.
    pub fn unit(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(Section::Unit, name, value)
    }

    /// Shorthand for a `[Service]` option.
    pub fn service(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(Section::Service, name, value)
    }

    /// Shorthand for a `[Socket]` option.
    pub fn socket(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(Section::Socket, name, value)
    }
}

/// Serializes options into unit file text.
///
/// Sections appear in order of first use; options keep their relative order
/// within a section. Sections are separated by one blank line.
#[must_use]
pub fn serialize(options: &[UnitOption]) -> String {
    let mut sections: Vec<(Section, Vec<&UnitOption>)> = Vec::new();
    for opt in options {
        match sections.iter_mut().find(|(s, _)| *s == opt.section) {
            Some((_, opts)) => opts.push(opt),
            None => sections.push((opt.section, vec![opt])),
        }
    }

    let mut out = String::new();
    for (i, (section, opts)) in sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push('[');
        out.push_str(section.as_str());
        out.push_str("]\n");
        for opt in opts {
            out.push_str(&opt.name);
            out.push('=');
            out.push_str(&opt.value);
            out.push('\n');
        }
    }
    out
}

/// Writes a unit file with mode `0644`, replacing any previous content.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created or written.
pub fn write_unit(path: &Path, options: &[UnitOption]) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| StagehandError::io(path, e))?;
    file.write_all(serialize(options).as_bytes())
        .map_err(|e| StagehandError::io(path, e))?;
    tracing::debug!(unit = %path.display(), "unit written");
    Ok(())
}

/// Returns the value of the first option matching `section` and `name`.
#[must_use]
pub fn find<'o>(options: &'o [UnitOption], section: Section, name: &str) -> Option<&'o str> {
    options
        .iter()
        .find(|o| o.section == section && o.name == name)
        .map(|o| o.value.as_str())
}
