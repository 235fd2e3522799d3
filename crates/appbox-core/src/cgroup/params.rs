//! Cgroup parameter values and the libcgroup configuration syntax.

use std::fmt;

/// Value of one cgroup control file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// A single token, e.g. `memory.limit_in_bytes`.
    Scalar(String),
    /// `key value` lines, e.g. `memory.stat`.
    Block(Vec<(String, String)>),
}

impl ParamValue {
    /// Parses the content of a control file.
    ///
    /// Content without whitespace is a scalar. Anything else is read as
    /// `key value` lines; lines without a key are dropped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if !raw.contains(['\n', ' ']) {
            return Self::Scalar(raw.to_string());
        }
        let entries = raw
            .lines()
            .filter_map(|line| match line.find(' ') {
                Some(i) if i > 0 => Some((line[..i].to_string(), line[i + 1..].to_string())),
                _ => None,
            })
            .collect();
        Self::Block(entries)
    }

    /// Renders the value as written to a control file.
    #[must_use]
    pub fn format(&self) -> String {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::Block(entries) => entries
                .iter()
                .map(|(k, v)| format!("{k} {v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// The scalar content, or `None` for a block.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Block(_) => None,
        }
    }

    /// Looks up an entry of a block value.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&str> {
        match self {
            Self::Scalar(_) => None,
            Self::Block(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str()),
        }
    }

    pub(crate) fn to_node(&self) -> ConfigNode {
        match self {
            Self::Scalar(value) => ConfigNode::Scalar(value.clone()),
            Self::Block(entries) => ConfigNode::Block(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), ConfigNode::Scalar(v.clone())))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Subsystem a parameter belongs to: the part of its name before the
/// first dot.
#[must_use]
pub fn subsystem_of(param: &str) -> Option<&str> {
    param.split_once('.').map(|(subsystem, _)| subsystem)
}

/// Ordered tree rendered into a `cgconfig.conf` group stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConfigNode {
    Scalar(String),
    Block(Vec<(String, Self)>),
}

impl ConfigNode {
    pub(crate) fn block<const N: usize>(entries: [(&str, Self); N]) -> Self {
        Self::Block(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    pub(crate) fn scalar(value: impl ToString) -> Self {
        Self::Scalar(value.to_string())
    }

    /// Renders the node: a block is `{` followed by ` key <value>` per
    /// entry and `}`; a scalar is `= value; `.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Self::Scalar(value) => {
                out.push_str("= ");
                out.push_str(value);
                out.push_str("; ");
            }
            Self::Block(entries) => {
                out.push('{');
                for (key, value) in entries {
                    out.push(' ');
                    out.push_str(key);
                    out.push(' ');
                    value.render_into(out);
                }
                out.push('}');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_is_scalar() {
        assert_eq!(ParamValue::parse("536870912\n"), ParamValue::Scalar("536870912".into()));
    }

    #[test]
    fn key_value_lines_are_a_block() {
        let value = ParamValue::parse("cache 4096\nrss 8192\n\n");
        assert_eq!(value.entry("rss"), Some("8192"));
        assert_eq!(value.format(), "cache 4096\nrss 8192");
        assert_eq!(value.as_scalar(), None);
    }

    #[test]
    fn subsystem_is_prefix_before_first_dot() {
        assert_eq!(subsystem_of("memory.memsw.limit_in_bytes"), Some("memory"));
        assert_eq!(subsystem_of("tasks"), None);
    }

    #[test]
    fn renders_libcgroup_syntax() {
        let tree = ConfigNode::block([
            (
                "perm",
                ConfigNode::block([(
                    "task",
                    ConfigNode::block([("uid", ConfigNode::scalar(1001)), ("gid", ConfigNode::scalar(1001))]),
                )]),
            ),
            ("cpu", ConfigNode::block([("cpu.shares", ConfigNode::scalar(128))])),
            ("freezer", ConfigNode::Block(Vec::new())),
        ]);
        assert_eq!(
            tree.render(),
            "{ perm { task { uid = 1001;  gid = 1001; }} cpu { cpu.shares = 128; } freezer {}}"
        );
    }
}
