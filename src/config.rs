//! Environment-variable helpers for gateway configuration.
//!
//! Every knob of the gateway is environment-driven. Vendors tend to grow
//! alias variables over time, so lookups take a list of names and resolve
//! the first one that is set and non-empty.

/// Return the first non-empty value among the named environment variables.
pub fn env_first(names: &[&str]) -> Option<String> {
    for name in names {
        if let Ok(value) = std::env::var(name) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Like [`env_first`], falling back to `default` when nothing is set.
pub fn env_or(names: &[&str], default: &str) -> String {
    env_first(names).unwrap_or_else(|| default.to_string())
}

/// Parse the first non-empty variable as `u32`, falling back on unset or
/// unparsable values.
pub fn env_u32_or(names: &[&str], default: u32) -> u32 {
    env_first(names)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_vars_fall_back() {
        assert_eq!(env_or(&["AURALIS_TEST_NO_SUCH_VAR"], "fallback"), "fallback");
        assert_eq!(env_u32_or(&["AURALIS_TEST_NO_SUCH_VAR"], 22050), 22050);
    }

    #[test]
    fn first_non_empty_wins() {
        std::env::set_var("AURALIS_TEST_EMPTY", "  ");
        std::env::set_var("AURALIS_TEST_SET", "value");
        assert_eq!(
            env_first(&["AURALIS_TEST_EMPTY", "AURALIS_TEST_SET"]).as_deref(),
            Some("value")
        );
        std::env::remove_var("AURALIS_TEST_EMPTY");
        std::env::remove_var("AURALIS_TEST_SET");
    }
}
