//! Linux capability bounding sets for apps.
//!
//! Every app keeps the capabilities it retains explicitly through its
//! isolators, followed by the configured defaults. Everything else is
//! dropped from the bounding set by the supervisor.

use stagehand_common::manifest::Isolator;

/// Ordered, duplicate-free list of capability names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: Vec<String>,
}

impl CapabilitySet {
    /// Collects the capabilities retained by an app's isolators, in declaration order.
    #[must_use]
    pub fn retained_by(isolators: &[Isolator]) -> Self {
        let mut set = Self::default();
        for isolator in isolators {
            if let Isolator::CapabilitiesRetain(caps) = isolator {
                set.extend(caps.iter().map(String::as_str));
            }
        }
        set
    }

    /// Builds the app's bounding set: retained capabilities, then `defaults`.
    #[must_use]
    pub fn bounding_set<S: AsRef<str>>(isolators: &[Isolator], defaults: &[S]) -> Self {
        let mut set = Self::retained_by(isolators);
        set.extend(defaults.iter().map(AsRef::as_ref));
        set
    }

    /// Appends names not yet present, keeping first occurrences.
    pub fn extend<'s>(&mut self, names: impl IntoIterator<Item = &'s str>) {
        for name in names {
            if !self.contains(name) {
                self.caps.push(name.to_string());
            }
        }
    }

    /// Returns `true` if `name` is in the set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.caps.iter().any(|c| c == name)
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Iterates over the names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.caps.iter().map(String::as_str)
    }

    /// Space-separated form used by `CapabilityBoundingSet=`.
    #[must_use]
    pub fn to_unit_value(&self) -> String {
        self.caps.join(" ")
    }

    /// Comma-separated form used by `--capability=`.
    #[must_use]
    pub fn to_comma_list(&self) -> String {
        self.caps.join(",")
    }
}
