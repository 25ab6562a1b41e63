//! Mapping between parameter store names and upper-snake-case keys.
//!
//! A parameter `{base}/database-admin-url` maps to `DATABASE_ADMIN_URL` and
//! back again given the same base path.

/// Keywords that mark a key as secret (written encrypted).
pub const SECRET_KEYWORDS: &[&str] = &["secret", "password", "url"];

/// Strip `base` from a full parameter name and convert the remainder to an
/// upper-snake-case key. Names outside `base` keep their last path segment.
pub fn to_env_name(name: &str, base: &str) -> String {
    let base = base.trim_end_matches('/');
    let relative = name
        .strip_prefix(base)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or_else(|| name.rsplit('/').next().unwrap_or(name));
    relative.replace(['-', '/'], "_").to_uppercase()
}

/// Inverse of [`to_env_name`]: `DATABASE_URL` under `base` becomes
/// `{base}/database-url`.
pub fn to_parameter_name(key: &str, base: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.to_lowercase().replace('_', "-")
    )
}

/// Whether a key must be stored as an encrypted value.
pub fn is_secret(key: &str) -> bool {
    let key = key.to_lowercase();
    SECRET_KEYWORDS.iter().any(|kw| key.contains(kw))
}
