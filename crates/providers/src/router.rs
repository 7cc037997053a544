//! Gateway selection from configuration.

use cxloop_config::{AppConfig, ProviderKind};
use cxloop_core::model::ModelGateway;
use std::sync::Arc;
use tracing::{info, warn};

use crate::openai_compat::OpenAiCompatGateway;
use crate::retry::RetryingGateway;
use crate::scripted::ScriptedGateway;

/// Build the configured gateway, wrapped in transient-error retry.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn ModelGateway> {
    let provider = &config.provider;
    let gateway: Arc<dyn ModelGateway> = match provider.kind {
        ProviderKind::Scripted => {
            info!("Using scripted gateway (offline mode)");
            return Arc::new(ScriptedGateway::demo());
        }
        ProviderKind::Openai => {
            if provider.api_key.is_none() {
                warn!(url = %provider.api_url, "No API key configured; requests are sent unauthenticated");
            }
            Arc::new(
                OpenAiCompatGateway::new(
                    "openai",
                    &provider.api_url,
                    provider.api_key.clone(),
                    &provider.model,
                )
                .with_temperature(provider.temperature)
                .with_max_tokens(provider.max_tokens)
                .with_system_prompt(&provider.system_prompt)
                .with_timeout(provider.request_timeout()),
            )
        }
    };

    info!(
        model = %provider.model,
        url = %provider.api_url,
        max_retries = provider.max_retries,
        "Model gateway configured"
    );

    if provider.max_retries == 0 {
        return gateway;
    }
    Arc::new(RetryingGateway::new(
        gateway,
        provider.max_retries,
        provider.retry_backoff(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxloop_core::model::InferenceRequest;
    use cxloop_core::turn::Turn;

    #[tokio::test]
    async fn scripted_kind_builds_offline_gateway() {
        let mut config = AppConfig::default();
        config.provider.kind = ProviderKind::Scripted;
        let gateway = build_from_config(&config);
        assert_eq!(gateway.name(), "scripted");

        let out = gateway
            .infer(InferenceRequest {
                history: vec![Turn::user("hi")],
                tools: vec![],
            })
            .await
            .unwrap();
        assert!(out.text.is_some());
    }

    #[test]
    fn openai_kind_is_named_openai() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-test".into());
        assert_eq!(build_from_config(&config).name(), "openai");

        config.provider.max_retries = 0;
        assert_eq!(build_from_config(&config).name(), "openai");
    }
}
