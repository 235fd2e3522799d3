//! `authorized_keys` entries for container users.

use std::fmt;

use appbox_common::constants::APP_NAME;
use appbox_common::error::{AppboxError, Result};

const KEY_TYPE_PREFIXES: &[&str] = &["ssh-", "ecdsa-", "sk-"];

/// One public key granted access to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    /// Identifier the key was registered under.
    pub id: String,
    /// Key algorithm, e.g. `ssh-ed25519`.
    pub key_type: String,
    /// Base64 key body.
    pub body: String,
}

impl AuthorizedKey {
    /// Parses a public key as pasted by a user: `type body [comment]`.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidKey`] if the type or body is malformed.
    pub fn parse(id: &str, key: &str) -> Result<Self> {
        let mut tokens = key.split_whitespace();
        let (Some(key_type), Some(body)) = (tokens.next(), tokens.next()) else {
            return Err(AppboxError::InvalidKey);
        };
        if !KEY_TYPE_PREFIXES.iter().any(|p| key_type.starts_with(p)) || !is_base64(body) {
            return Err(AppboxError::InvalidKey);
        }
        Ok(Self {
            id: id.to_string(),
            key_type: key_type.to_string(),
            body: body.to_string(),
        })
    }

    /// Parses a line written by [`AuthorizedKey::to_line`]; foreign lines
    /// yield `None`.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let type_at = tokens
            .iter()
            .position(|t| KEY_TYPE_PREFIXES.iter().any(|p| t.starts_with(p)))?;
        let body = tokens.get(type_at + 1)?;
        let id = tokens
            .get(type_at + 2)
            .and_then(|c| c.strip_prefix(APP_NAME))
            .and_then(|c| c.strip_prefix('-'))
            .unwrap_or_default();
        Some(Self {
            id: id.to_string(),
            key_type: tokens[type_at].to_string(),
            body: (*body).to_string(),
        })
    }

    /// The `authorized_keys` line forcing `shell` as the session command.
    #[must_use]
    pub fn to_line(&self, shell: &str) -> String {
        format!(
            "command=\"{shell}\",no-X11-forwarding {} {} {APP_NAME}-{}",
            self.key_type, self.body, self.id
        )
    }
}

impl fmt::Display for AuthorizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key_type, self.body)
    }
}

fn is_base64(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

/// Returns `content` with every entry for `key`'s body removed and, when
/// `replacement` is set, a fresh line appended.
pub(crate) fn rewrite(content: &str, body: &str, replacement: Option<&str>) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let matches = AuthorizedKey::from_line(line).is_some_and(|k| k.body == body);
        if !matches && !line.trim().is_empty() {
            out.push_str(line);
            out.push('\n');
        }
    }
    if let Some(line) = replacement {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGf0o2Vx alice@laptop";

    #[test]
    fn line_forces_shell_and_tags_id() {
        let key = AuthorizedKey::parse("k1", KEY).unwrap();
        assert_eq!(
            key.to_line("/bin/bash"),
            "command=\"/bin/bash\",no-X11-forwarding ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGf0o2Vx appbox-k1"
        );
        assert_eq!(AuthorizedKey::from_line(&key.to_line("/bin/bash")), Some(key));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for bad in ["", "ssh-rsa", "rsa AAAA", "ssh-rsa not*base64"] {
            assert!(matches!(AuthorizedKey::parse("k", bad), Err(AppboxError::InvalidKey)));
        }
    }

    #[test]
    fn rewrite_replaces_same_body() {
        let key = AuthorizedKey::parse("k1", KEY).unwrap();
        let other = AuthorizedKey::parse("k2", "ssh-rsa AAAAB3Nza== bob").unwrap();
        let content = format!("{}\n{}\n", key.to_line("/bin/sh"), other.to_line("/bin/sh"));

        let renamed = AuthorizedKey { id: "k3".into(), ..key.clone() };
        let next = rewrite(&content, &key.body, Some(&renamed.to_line("/bin/sh")));
        let ids: Vec<String> = next.lines().filter_map(AuthorizedKey::from_line).map(|k| k.id).collect();
        assert_eq!(ids, vec!["k2", "k3"]);

        let removed = rewrite(&next, &key.body, None);
        assert_eq!(removed.lines().count(), 1);
    }
}
