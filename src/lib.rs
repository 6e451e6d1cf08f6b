// OAuth2 authorization flows and the accounts manager server
pub mod auth;

// Configuration file and persisted OAuth client credentials
pub mod config;

// Secret store backends (OS keyring, encrypted files)
pub mod secrets;

// Service-to-scope registry
pub mod services;

// CLI command tree
pub mod cli;
