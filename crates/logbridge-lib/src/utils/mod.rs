pub mod settings;

pub use settings::{config_path, load_config, SettingsError};
