//! Utility functions

use std::path::PathBuf;

/// Expand tilde (~) to home directory in path strings
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Default per-user data directory (`~/.geonet`)
pub fn user_data_dir() -> PathBuf {
    expand_tilde("~/.geonet")
}

/// Default SSH directory (`~/.ssh`)
pub fn ssh_dir() -> PathBuf {
    expand_tilde("~/.ssh")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        // Test with tilde
        let expanded = expand_tilde("~/test/path");
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("test/path"));

        // Test without tilde
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_user_data_dir() {
        assert!(user_data_dir().ends_with(".geonet"));
    }
}
