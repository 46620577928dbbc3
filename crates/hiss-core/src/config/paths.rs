//! Standard locations of hiss configuration files

use std::path::PathBuf;

/// File name of the main configuration
pub const CONFIG_FILENAME: &str = "convolver.yaml";

/// Get the hiss configuration directory
///
/// Returns: `<config_dir>/hiss` (e.g. `~/.config/hiss` on Linux), or
/// `./hiss` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hiss")
}

/// Get the default configuration file path
///
/// Returns: `<config_dir>/hiss/convolver.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("hiss/convolver.yaml"));
        assert!(default_config_dir().ends_with("hiss"));
    }
}
