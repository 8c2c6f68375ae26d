//! Declaration syntax.
//!
//! A declaration string is a comma-separated list of clauses:
//!
//! ```text
//! builtin.HttpConnector;timeout=30, acme.Repo~1;path="lib/a.jar,lib/b.jar";command:=deploy
//! ```
//!
//! The first token of a clause is its key. A key may end in a duplicate
//! marker (`~`, optionally followed by digits) so the same name can be
//! declared more than once with different attributes. Values may be
//! quoted to contain `,` or `;`. Both `name=value` and the directive form
//! `name:=value` are accepted.

/// Property holding the plugin declarations.
pub const PLUGIN: &str = "-plugin";
/// Property holding the plugin path declarations.
pub const PLUGINPATH: &str = "-pluginpath";
/// `-plugin` value disabling plugin loading entirely.
pub const NONE: &str = "none";

/// Extra class path roots scoped to one declaration.
pub const PATH_ATTR: &str = "path";
/// Commands tolerated as missing if the plugin fails to load.
pub const COMMAND_ATTR: &str = "command";
/// Remote source of a missing plugin path file.
pub const URL_ATTR: &str = "url";
/// Hex SHA-1 digest of a plugin path file.
pub const SHA1_ATTR: &str = "sha1";
/// Hex SHA-256 digest of a plugin path file.
pub const SHA256_ATTR: &str = "sha256";

pub const DUPLICATE_MARKER: char = '~';

/// Ordered attribute list of one clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
    entries: Vec<(String, String)>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set `name`, replacing any previous value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merge(&mut self, other: Attrs) {
        for (name, value) in other.entries {
            self.insert(name, value);
        }
    }
}

impl std::fmt::Display for Attrs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Attrs::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

/// One parsed clause.
///
/// Unique per raw key (marker included), not per class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationRecord {
    raw_key: String,
    attrs: Attrs,
}

impl DeclarationRecord {
    pub fn new(raw_key: impl Into<String>, attrs: Attrs) -> Self {
        Self {
            raw_key: raw_key.into(),
            attrs,
        }
    }

    /// The key as written, duplicate marker included.
    pub fn raw_key(&self) -> &str {
        &self.raw_key
    }

    /// The key with its duplicate marker removed.
    pub fn class_name(&self) -> &str {
        remove_duplicate_marker(&self.raw_key)
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }
}

/// Parse a declaration string.
///
/// Clauses repeating an identical raw key are merged into the first
/// occurrence, later attributes winning. Several keys in one clause
/// (`a;b;x=1`) share that clause's attributes.
pub fn parse_declarations(input: &str) -> Vec<DeclarationRecord> {
    let mut records: Vec<DeclarationRecord> = Vec::new();

    for clause in split_unquoted(input, ',') {
        let mut keys = Vec::new();
        let mut attrs = Attrs::new();
        for token in split_unquoted(clause, ';') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.split_once('=') {
                Some((name, value)) => {
                    let name = name.trim().trim_end_matches(':').trim();
                    attrs.insert(name, unquote(value.trim()));
                }
                None => keys.push(unquote(token)),
            }
        }

        for key in keys {
            match records.iter_mut().find(|r| r.raw_key == key) {
                Some(existing) => {
                    tracing::debug!(key = %key, "Merging repeated declaration");
                    existing.attrs.merge(attrs.clone());
                }
                None => records.push(DeclarationRecord::new(key, attrs.clone())),
            }
        }
    }
    records
}

/// Strip a trailing duplicate marker: `a.B~`, `a.B~~` and `a.B~2` all
/// become `a.B`.
pub fn remove_duplicate_marker(key: &str) -> &str {
    match key.find(DUPLICATE_MARKER) {
        Some(at)
            if key[at..]
                .chars()
                .all(|c| c == DUPLICATE_MARKER || c.is_ascii_digit()) =>
        {
            &key[..at]
        }
        _ => key,
    }
}

/// Split a comma-separated attribute value into trimmed, non-empty items.
pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            split_unquoted(v, ',')
                .into_iter()
                .map(|item| unquote(item.trim()))
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == separator => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_and_attributes() {
        let records = parse_declarations("builtin.Http;timeout=30, acme.Repo;name = main");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].class_name(), "builtin.Http");
        assert_eq!(records[0].attrs().get("timeout"), Some("30"));
        assert_eq!(records[1].attrs().get("name"), Some("main"));
    }

    #[test]
    fn quoted_values_keep_separators() {
        let records =
            parse_declarations(r#"acme.Repo;path="lib/a.jar,lib/b.jar";command:='deploy;x'"#);
        assert_eq!(records.len(), 1);
        let attrs = records[0].attrs();
        assert_eq!(attrs.get(PATH_ATTR), Some("lib/a.jar,lib/b.jar"));
        assert_eq!(attrs.get(COMMAND_ATTR), Some("deploy;x"));
        assert_eq!(
            split_list(attrs.get(PATH_ATTR)),
            vec!["lib/a.jar".to_string(), "lib/b.jar".to_string()]
        );
    }

    #[test]
    fn duplicate_markers_keep_declarations_apart() {
        let records = parse_declarations("a.Repo~1;name=x, a.Repo~2;name=y, a.Repo~1;extra=z");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].raw_key(), "a.Repo~1");
        assert_eq!(records[0].class_name(), "a.Repo");
        assert_eq!(records[0].attrs().get("name"), Some("x"));
        assert_eq!(records[0].attrs().get("extra"), Some("z"));
        assert_eq!(records[1].attrs().get("name"), Some("y"));
    }

    #[test]
    fn removes_only_trailing_markers() {
        assert_eq!(remove_duplicate_marker("a.B"), "a.B");
        assert_eq!(remove_duplicate_marker("a.B~"), "a.B");
        assert_eq!(remove_duplicate_marker("a.B~~"), "a.B");
        assert_eq!(remove_duplicate_marker("a.B~12"), "a.B");
        assert_eq!(remove_duplicate_marker("a~b.C"), "a~b.C");
    }

    #[test]
    fn shared_attributes_for_multiple_keys() {
        let records = parse_declarations("a.One;a.Two;mode=fast");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.attrs().get("mode") == Some("fast")));
    }

    #[test]
    fn empty_input_has_no_records() {
        assert!(parse_declarations("").is_empty());
        assert!(parse_declarations(" , ,").is_empty());
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn attrs_display_round_trips_order() {
        let attrs: Attrs = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(attrs.to_string(), "b=2;a=1");
    }
}
