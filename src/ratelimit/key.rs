//! Store keys and attempt tokens.

use uuid::Uuid;

/// The store key holding one user's attempt log.
///
/// Rendered as `{namespace}:{user_id}`, e.g. `rate_limit:recipes:42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserKey {
    /// Namespace tag shared by every user of one limiter
    pub namespace: String,
    /// Stable caller identity
    pub user_id: String,
}

impl UserKey {
    /// Key for `user_id`'s attempt log under `namespace`.
    pub fn new(namespace: &str, user_id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.namespace, self.user_id)
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// A unique member name for one recorded attempt.
///
/// The store deduplicates by member, so two attempts in the same
/// millisecond must still produce distinct tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptToken(String);

impl AttemptToken {
    /// A fresh token for an attempt at `now_ms`, unique even within one millisecond.
    pub fn new(now_ms: i64) -> Self {
        Self(format!("{}-{}", now_ms, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_key_format() {
        let key = UserKey::new("rate_limit:recipes", "user-123");
        assert_eq!(key.to_string_key(), "rate_limit:recipes:user-123");
        assert_eq!(key.to_string(), "rate_limit:recipes:user-123");
    }

    #[test]
    fn test_user_keys_are_isolated() {
        let a = UserKey::new("rate_limit:recipes", "a");
        let b = UserKey::new("rate_limit:recipes", "b");
        assert_ne!(a.to_string_key(), b.to_string_key());
    }

    #[test]
    fn test_tokens_in_same_millisecond_differ() {
        let first = AttemptToken::new(1_000);
        let second = AttemptToken::new(1_000);
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("1000-"));
    }
}
