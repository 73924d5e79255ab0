//! Bidirectional abbreviation table used by the human view.
//!
//! The canonical files keep keys short (`nm`, `repo`, `f`); the editor view
//! shows them in full (`name`, `repository`, `forge`). A [`KeyRegistry`] is a
//! plain value passed to the codecs, so different callers can use different
//! tables side by side.
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::KeyRegistry;
//!
//! let registry = KeyRegistry::standard();
//! assert_eq!(registry.expand("nm"), "name");
//! assert_eq!(registry.collapse("repository"), "repo");
//!
//! // Unknown keys pass through unchanged.
//! assert_eq!(registry.expand("port"), "port");
//! ```

use indexmap::IndexMap;

/// Abbreviations shipped with the crate.
///
/// No full name is also an abbreviation, so expansion never chains.
const STANDARD_ENTRIES: &[(&str, &str)] = &[
    ("nm", "name"),
    ("v", "version"),
    ("au", "author"),
    ("ws", "workspace"),
    ("ed", "editors"),
    ("repo", "repository"),
    ("cont", "container"),
    ("ci", "ci_cd"),
    ("tt", "title"),
    ("ds", "description"),
    ("lb", "label"),
    ("en", "enabled"),
    ("cr", "created"),
    ("up", "updated"),
    ("ct", "count"),
    ("pt", "path"),
    ("ur", "url"),
    ("src", "source"),
    ("dst", "destination"),
    ("ow", "owner"),
    // section ids
    ("f", "forge"),
    ("stk", "stack"),
    ("sty", "style"),
    ("med", "media"),
    ("drv", "driven"),
    ("gen", "generator"),
    ("scr", "scripts"),
];

/// A bijective short-key to full-name table.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::KeyRegistry;
///
/// let registry = KeyRegistry::new().with_entry("db", "database");
/// assert_eq!(registry.expand("db"), "database");
/// assert_eq!(registry.collapse("database"), "db");
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyRegistry {
    short_to_full: IndexMap<String, String>,
    full_to_short: IndexMap<String, String>,
}

impl KeyRegistry {
    /// Creates an empty registry; every key passes through unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the standard abbreviation table.
    #[must_use]
    pub fn standard() -> Self {
        STANDARD_ENTRIES
            .iter()
            .fold(Self::new(), |registry, (short, full)| {
                registry.with_entry(*short, *full)
            })
    }

    /// Adds or overrides an entry, builder style.
    ///
    /// Any existing entry using either `short` or `full` is removed first, so
    /// the table stays a bijection.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dx_serializer::KeyRegistry;
    ///
    /// let registry = KeyRegistry::standard().with_entry("n", "name");
    /// assert_eq!(registry.collapse("name"), "n");
    /// assert_eq!(registry.expand("nm"), "nm");
    /// ```
    #[must_use]
    pub fn with_entry(mut self, short: impl Into<String>, full: impl Into<String>) -> Self {
        let short = short.into();
        let full = full.into();
        if let Some(old_full) = self.short_to_full.shift_remove(&short) {
            self.full_to_short.shift_remove(&old_full);
        }
        if let Some(old_short) = self.full_to_short.shift_remove(&full) {
            self.short_to_full.shift_remove(&old_short);
        }
        self.short_to_full.insert(short.clone(), full.clone());
        self.full_to_short.insert(full, short);
        self
    }

    /// Returns the full name for `short`, or `short` itself if unknown.
    #[must_use]
    pub fn expand<'a>(&'a self, short: &'a str) -> &'a str {
        self.short_to_full.get(short).map_or(short, String::as_str)
    }

    /// Returns the short key for `full`, or `full` itself if unknown.
    #[must_use]
    pub fn collapse<'a>(&'a self, full: &'a str) -> &'a str {
        self.full_to_short.get(full).map_or(full, String::as_str)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.short_to_full.len()
    }

    /// Returns `true` if the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.short_to_full.is_empty()
    }

    /// Iterates over `(short, full)` pairs in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.short_to_full
            .iter()
            .map(|(short, full)| (short.as_str(), full.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_inverse() {
        let registry = KeyRegistry::standard();
        assert_eq!(registry.len(), STANDARD_ENTRIES.len());
        for (short, full) in registry.entries() {
            assert_eq!(registry.collapse(registry.expand(short)), short);
            assert_eq!(registry.expand(registry.collapse(full)), full);
        }
    }

    #[test]
    fn test_standard_does_not_chain() {
        let registry = KeyRegistry::standard();
        for (_, full) in registry.entries() {
            assert_eq!(registry.expand(full), full, "{full} is also a short key");
        }
    }

    #[test]
    fn test_section_ids_present() {
        let registry = KeyRegistry::standard();
        assert_eq!(registry.expand("f"), "forge");
        assert_eq!(registry.collapse("scripts"), "scr");
    }

    #[test]
    fn test_override_keeps_bijection() {
        let registry = KeyRegistry::standard()
            .with_entry("nm", "nickname")
            .with_entry("n", "name");
        assert_eq!(registry.expand("nm"), "nickname");
        assert_eq!(registry.collapse("name"), "n");
        assert_eq!(registry.collapse("nickname"), "nm");
        for (short, full) in registry.entries() {
            assert_eq!(registry.collapse(full), short);
        }
    }

    #[test]
    fn test_empty_passes_through() {
        let registry = KeyRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.expand("nm"), "nm");
        assert_eq!(registry.collapse("name"), "name");
    }
}
