//! Device identity and name sanitization.

use serde::{Deserialize, Serialize};

/// Upper bound on a sanitized name, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Name used when sanitization leaves nothing usable.
pub const FALLBACK_NAME: &str = "device";

/// A connected device as the daemon knows it.
///
/// Two identities denote the same device when their sanitized names match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Name as reported by the resolver, or the host when resolution failed.
    pub display_name: String,
    /// Filesystem-safe form of `display_name`; names the device directory.
    pub sanitized_name: String,
    /// Connection host taken from the mount name.
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl DeviceIdentity {
    pub fn new(display_name: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        let display_name = display_name.into();
        Self {
            sanitized_name: sanitize_name(&display_name),
            display_name,
            host: host.into(),
            port,
        }
    }

    pub fn same_device(&self, other: &DeviceIdentity) -> bool {
        self.sanitized_name == other.sanitized_name
    }
}

/// Maps any string to a non-empty, bounded, filesystem-safe name.
///
/// ASCII alphanumerics and `.`, `_`, `-` are kept; everything else becomes `_`.
/// Runs of `_` collapse, and leading or trailing `_`, `.`, `-` are stripped,
/// so the result is never `.`, `..` or a hidden name.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_NAME_LEN));
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = trim_separators(&out);
    // Everything left is ASCII, so byte truncation is on a char boundary.
    let truncated = trim_separators(&trimmed[..trimmed.len().min(MAX_NAME_LEN)]);

    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated.to_string()
    }
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_simple_names() {
        assert_eq!(sanitize_name("MyPhone"), "MyPhone");
        assert_eq!(sanitize_name("pixel-7.pro_2"), "pixel-7.pro_2");
    }

    #[test]
    fn test_sanitize_replaces_and_collapses() {
        assert_eq!(sanitize_name("Galaxy S23 Ultra"), "Galaxy_S23_Ultra");
        assert_eq!(sanitize_name("a / b \\ c"), "a_b_c");
        assert_eq!(sanitize_name("Téléphone d'Anne"), "T_l_phone_d_Anne");
    }

    #[test]
    fn test_sanitize_degenerate_inputs() {
        assert_eq!(sanitize_name(""), FALLBACK_NAME);
        assert_eq!(sanitize_name("!!!///***"), FALLBACK_NAME);
        assert_eq!(sanitize_name("."), FALLBACK_NAME);
        assert_eq!(sanitize_name(".."), FALLBACK_NAME);
        assert_eq!(sanitize_name("   "), FALLBACK_NAME);
        assert_eq!(sanitize_name("..hidden"), "hidden");
    }

    #[test]
    fn test_sanitize_bounds_length() {
        let long = "x".repeat(1000);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);

        let emoji = "📱".repeat(500);
        assert_eq!(sanitize_name(&emoji), FALLBACK_NAME);

        // Truncation that lands on a separator is trimmed again.
        let edge = format!("{}_tail", "a".repeat(MAX_NAME_LEN - 1));
        let name = sanitize_name(&edge);
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(!name.ends_with('_'));
    }

    #[test]
    fn test_sanitize_is_deterministic_and_total() {
        let samples = ["", "a", "A b", "🙂", "../../etc", "x\0y", "\n\t", "名前"];
        for s in samples {
            let first = sanitize_name(s);
            assert_eq!(first, sanitize_name(s));
            assert!(!first.is_empty());
            assert!(first.len() <= MAX_NAME_LEN);
            assert!(first != "." && first != "..");
            assert!(!first.contains('/'));
            assert!(!first.contains('\0'));
        }
    }

    #[test]
    fn test_identity_compares_by_sanitized_name() {
        let a = DeviceIdentity::new("My Phone", "10.0.0.5", Some(1739));
        let b = DeviceIdentity::new("My  Phone", "10.0.0.9", None);
        let c = DeviceIdentity::new("Tablet", "10.0.0.5", Some(1739));
        assert!(a.same_device(&b));
        assert!(!a.same_device(&c));
    }
}
