//! Shared fixtures for unit and handler tests.

use axum_test::TestServer;

use crate::{
    AppState, Config,
    auth::Identity,
    build_router,
    config::SecurityConfig,
    extension::{ExtensionDispatcher, MergeExtension},
};

pub const TEST_SECRET: &str = "test-secret-key-for-upmerge";

pub fn create_test_config() -> Config {
    Config {
        secret_key: Some(TEST_SECRET.to_string()),
        security: SecurityConfig {
            csrf_enabled: true,
            allowed_referers: vec!["localhost".to_string(), "mail.example.com".to_string()],
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn test_identity() -> Identity {
    Identity {
        account_id: "8f0c1a52-7d4e-4c1b-9a43-2f6f3b1d0e77".to_string(),
        name: Some("Test User".to_string()),
        source: crate::auth::session::SOURCE.to_string(),
    }
}

pub fn create_test_state() -> AppState {
    AppState::from_config(create_test_config()).expect("Failed to build test state")
}

/// Router with the merge extension registered at its configured path.
pub fn test_server_with(state: AppState) -> TestServer {
    let dispatcher = ExtensionDispatcher::new(&state.config.extension.mount);
    dispatcher
        .register(&MergeExtension::new(state))
        .expect("Failed to register merge extension");
    TestServer::new(build_router(&dispatcher)).expect("Failed to create test server")
}

pub fn test_server() -> TestServer {
    test_server_with(create_test_state())
}
