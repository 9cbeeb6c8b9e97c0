//! Version information module

pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string for `--version`
pub fn get_version_string() -> String {
    format!("{} {}", PROJECT_NAME, VERSION)
}

pub fn get_version() -> &'static str {
    VERSION
}
