// ABOUTME: Support library for the cherryin command-line client
// ABOUTME: Opens the token store with the right password and formats token details for display

pub mod format;
pub mod session;

pub use session::{load_config, open_manager, DEFAULT_USER};
