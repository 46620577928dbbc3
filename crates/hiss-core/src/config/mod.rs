//! Configuration for hiss
//!
//! YAML configuration with the same load/save conventions everywhere:
//! a missing or unreadable file falls back to defaults with a warning,
//! saving creates parent directories.
//!
//! ```ignore
//! use hiss_core::config::{default_config_path, load_config, HissConfig};
//!
//! let config: HissConfig = load_config(&default_config_path());
//! ```

mod convolver;
mod io;
mod paths;

pub use convolver::{ConvolverConfig, HissConfig};
pub use io::{load_config, save_config, try_load_config};
pub use paths::{default_config_dir, default_config_path, CONFIG_FILENAME};
