use std::sync::Arc;

use super::*;
use crate::backend::{MockBackend, new_registry};
use crate::config::BackendConfig;
use crate::error::ChatError;
use crate::models::{BackendConnection, ProviderKind};

fn mock_connection(name: &str) -> ArcBackend {
    let mut backend = MockBackend::new();
    backend.expect_name().return_const(name.to_string());
    Arc::new(backend)
}

#[test]
fn test_route_is_deterministic() {
    let mut registry = Registry::default();
    registry
        .add_connection(mock_connection("OpenAI"), &["gpt-4".to_string()])
        .unwrap();
    registry
        .add_connection(mock_connection("Ollama"), &["llama3".to_string()])
        .unwrap();

    for _ in 0..3 {
        assert_eq!(registry.route("gpt-4").unwrap().name(), "OpenAI");
        assert_eq!(registry.route("llama3").unwrap().name(), "Ollama");
    }
}

#[test]
fn test_route_unknown_model() {
    let registry = Registry::default();
    let err = registry.route("gpt-4").expect_err("expected an error");
    assert_eq!(
        err.downcast_ref::<ChatError>(),
        Some(&ChatError::ModelNotFound("gpt-4".to_string()))
    );
}

#[test]
fn test_first_claim_wins() {
    let mut registry = Registry::default();
    registry
        .add_connection(mock_connection("OpenAI"), &["shared-model".to_string()])
        .unwrap();
    registry
        .add_connection(mock_connection("OpenRouter"), &["shared-model".to_string()])
        .unwrap();

    assert_eq!(registry.route("shared-model").unwrap().name(), "OpenAI");
}

#[test]
fn test_duplicate_alias_rejected() {
    let mut registry = Registry::default();
    registry
        .add_connection(mock_connection("OpenAI"), &[])
        .unwrap();
    let err = registry
        .add_connection(mock_connection("OpenAI"), &[])
        .expect_err("expected an error");
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn test_new_registry_priority_order() {
    // configured OpenRouter first; kind priority still hands the
    // shared id to OpenAI
    let config = BackendConfig {
        timeout_secs: None,
        connections: vec![
            BackendConnection::new(ProviderKind::OpenRouter)
                .with_enabled(true)
                .add_model("shared-model"),
            BackendConnection::new(ProviderKind::OpenAI)
                .with_enabled(true)
                .add_model("shared-model")
                .add_model("gpt-4"),
        ],
    };

    let registry = new_registry(&config).expect("failed to build registry");
    assert_eq!(registry.route("shared-model").unwrap().name(), "OpenAI");
    assert_eq!(registry.route("gpt-4").unwrap().name(), "OpenAI");
}

#[test]
fn test_new_registry_skips_disabled_connections() {
    let config = BackendConfig {
        timeout_secs: None,
        connections: vec![
            BackendConnection::new(ProviderKind::OpenAI).add_model("gpt-4"),
            BackendConnection::new(ProviderKind::Ollama)
                .with_enabled(true)
                .add_model("llama3"),
        ],
    };

    let registry = new_registry(&config).expect("failed to build registry");
    assert!(registry.route("gpt-4").is_err());
    assert_eq!(registry.route("llama3").unwrap().name(), "Ollama");
}

#[test]
fn test_models_catalog() {
    let mut registry = Registry::default();
    registry
        .add_connection(
            mock_connection("OpenAI"),
            &["gpt-4".to_string(), "gpt-3.5-turbo".to_string()],
        )
        .unwrap();

    let models = registry.models();
    assert_eq!(
        models,
        vec![
            ("gpt-3.5-turbo".to_string(), "OpenAI".to_string()),
            ("gpt-4".to_string(), "OpenAI".to_string()),
        ]
    );
}
