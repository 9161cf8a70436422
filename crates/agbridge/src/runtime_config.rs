use std::{sync::Arc, time::Duration};

use agbridge_ai::GeminiConfig;
use agbridge_cli::Cli;
use agbridge_provider::{CredentialStore, CredentialStoreConfig, OAuthConfig, OAuthFlow};
use agbridge_session::{ContextBuilder, ContextBuilderConfig, SessionDiscovery};
use anyhow::{anyhow, Result};

pub(crate) fn credential_store(cli: &Cli) -> CredentialStore {
    let mut config = match &cli.config_dir {
        Some(dir) => CredentialStoreConfig::new(dir.clone()),
        None => CredentialStoreConfig::default(),
    };
    config.key_preference = cli.key_source.into();
    CredentialStore::new(config)
}

pub(crate) fn oauth_config(cli: &Cli) -> OAuthConfig {
    let mut config = OAuthConfig::new(cli.oauth_client_id.clone().unwrap_or_default());
    config.client_secret = cli
        .oauth_client_secret
        .clone()
        .filter(|secret| !secret.trim().is_empty());
    config.callback_timeout = Duration::from_secs(cli.oauth_callback_timeout_secs);
    config
}

pub(crate) fn oauth_flow(cli: &Cli) -> Result<OAuthFlow> {
    OAuthFlow::new(oauth_config(cli), Arc::new(credential_store(cli)))
        .map_err(|error| anyhow!("failed to configure oauth: {error}"))
}

pub(crate) fn gemini_config(cli: &Cli) -> GeminiConfig {
    GeminiConfig {
        api_base: cli.api_base.clone(),
        request_timeout_ms: cli.request_timeout_ms,
        max_retries: cli.max_retries,
        ..GeminiConfig::default()
    }
}

pub(crate) fn session_discovery(cli: &Cli) -> SessionDiscovery {
    match &cli.sessions_dir {
        Some(dir) => SessionDiscovery::with_roots(vec![dir.clone()]),
        None => SessionDiscovery::new(),
    }
}

pub(crate) fn context_builder(cli: &Cli) -> ContextBuilder {
    ContextBuilder::new(ContextBuilderConfig {
        max_tokens: cli.max_context_tokens,
        ..ContextBuilderConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use agbridge_cli::Cli;
    use agbridge_provider::KeySourcePreference;

    use super::{context_builder, credential_store, gemini_config, oauth_config};

    #[test]
    fn unit_cli_flags_flow_into_library_configs() {
        let cli = Cli::try_parse_from([
            "agbridge",
            "status",
            "--config-dir",
            "/tmp/agbridge-test-config",
            "--api-base",
            "http://127.0.0.1:9/v1beta",
            "--max-retries",
            "5",
            "--max-context-tokens",
            "100",
            "--oauth-client-id",
            "client",
            "--oauth-client-secret",
            "  ",
        ])
        .expect("parse");

        let store = credential_store(&cli);
        assert_eq!(
            store.config_dir(),
            std::path::Path::new("/tmp/agbridge-test-config")
        );
        let gemini = gemini_config(&cli);
        assert_eq!(gemini.api_base, "http://127.0.0.1:9/v1beta");
        assert_eq!(gemini.max_retries, 5);
        assert_eq!(context_builder(&cli).config().max_tokens, 100);
        let oauth = oauth_config(&cli);
        assert_eq!(oauth.client_id, "client");
        assert_eq!(oauth.client_secret, None);
        assert_eq!(
            KeySourcePreference::from(cli.key_source),
            KeySourcePreference::Auto
        );
    }
}
