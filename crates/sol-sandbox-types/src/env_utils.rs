//! Environment variable parsing utilities.
//!
//! All sandbox settings can be supplied as `SOL_SANDBOX_*` variables. These
//! helpers keep the parsing uniform: unset or unparsable values fall back to
//! the caller's default instead of failing startup.
//!
//! ```
//! use sol_sandbox_types::env_utils::{env_bool, env_var_or};
//!
//! let timeout_secs: u64 = env_var_or("SOL_SANDBOX_BUILD_TIMEOUT_SECS", 300);
//! let local = env_bool("SOL_SANDBOX_LOCAL");
//! # let _ = (timeout_secs, local);
//! ```

use std::str::FromStr;

/// Parse an environment variable into a type that implements `FromStr`.
///
/// Returns `None` if the variable is not set or cannot be parsed.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse an environment variable with a default value.
pub fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).unwrap_or(default)
}

/// Check if an environment variable is set to a truthy value
/// ("1", "true", "yes" or "on", case-insensitive).
pub fn env_bool(key: &str) -> bool {
    env_bool_or(key, false)
}

/// Like [`env_bool`], but returns `default` when the variable is unset.
pub fn env_bool_or(key: &str, default: bool) -> bool {
    match std::env::var(key).ok() {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Get an environment variable as a string with a default value.
/// Blank values count as unset.
pub fn env_string_or(key: &str, default: &str) -> String {
    env_string(key).unwrap_or_else(|| default.to_string())
}

/// Get a non-blank environment variable.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a whitespace-separated command line from an environment variable.
///
/// `SOL_SANDBOX_TOOLCHAIN="anchor build --skip-lint"` becomes
/// `["anchor", "build", "--skip-lint"]`.
pub fn env_command(key: &str) -> Option<Vec<String>> {
    let raw = env_string(key)?;
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_parsing() {
        std::env::set_var("SOL_TEST_U64", " 42 ");
        let val: Option<u64> = env_var("SOL_TEST_U64");
        assert_eq!(val, Some(42));

        let missing: Option<u64> = env_var("SOL_NONEXISTENT_VAR_12345");
        assert_eq!(missing, None);

        std::env::remove_var("SOL_TEST_U64");
    }

    #[test]
    fn test_env_var_or() {
        std::env::set_var("SOL_TEST_WITH_DEFAULT", "not-a-number");
        let val: u64 = env_var_or("SOL_TEST_WITH_DEFAULT", 50);
        assert_eq!(val, 50);
        std::env::remove_var("SOL_TEST_WITH_DEFAULT");
    }

    #[test]
    fn test_env_bool() {
        std::env::set_var("SOL_TEST_BOOL_YES", "YES");
        std::env::set_var("SOL_TEST_BOOL_FALSE", "false");

        assert!(env_bool("SOL_TEST_BOOL_YES"));
        assert!(!env_bool("SOL_TEST_BOOL_FALSE"));
        assert!(!env_bool("SOL_NONEXISTENT_VAR_12347"));
        assert!(env_bool_or("SOL_NONEXISTENT_VAR_12347", true));

        std::env::remove_var("SOL_TEST_BOOL_YES");
        std::env::remove_var("SOL_TEST_BOOL_FALSE");
    }

    #[test]
    fn test_env_string_blank_is_unset() {
        std::env::set_var("SOL_TEST_BLANK", "   ");
        assert_eq!(env_string_or("SOL_TEST_BLANK", "fallback"), "fallback");
        std::env::remove_var("SOL_TEST_BLANK");
    }

    #[test]
    fn test_env_command() {
        std::env::set_var("SOL_TEST_CMD", "anchor  build --skip-lint");
        assert_eq!(
            env_command("SOL_TEST_CMD"),
            Some(vec![
                "anchor".to_string(),
                "build".to_string(),
                "--skip-lint".to_string()
            ])
        );
        assert_eq!(env_command("SOL_NONEXISTENT_VAR_12349"), None);
        std::env::remove_var("SOL_TEST_CMD");
    }
}
