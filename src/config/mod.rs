pub mod preferences;
pub mod settings;
pub mod themes;
