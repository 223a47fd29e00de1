// Logbridge shared library
//
// Core engines for the Logbridge MCP server:
// - models: configuration snapshots, error records, fix artifacts
// - services: log analysis, GitLab code context, AI providers,
//   fix generation, webhook notifications
// - utils: configuration file loading

pub mod models;
pub mod services;
pub mod utils;

pub use models::config::BridgeConfig;
