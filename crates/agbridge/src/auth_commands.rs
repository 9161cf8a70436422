use std::io::{BufRead, Write};

use agbridge_core::current_unix_timestamp;
use agbridge_provider::{is_valid_at, CredentialStore, OAuthCredentials, OAuthFlow};
use anyhow::{anyhow, bail, Result};

const LOGIN_HINT: &str = "run 'agbridge login'";

/// The requested account, else the active one, else the only stored one.
pub(crate) fn resolve_account(store: &CredentialStore, requested: Option<&str>) -> Result<String> {
    if let Some(account) = requested.map(str::trim).filter(|account| !account.is_empty()) {
        return Ok(account.to_string());
    }
    if let Some(active) = store.active_account() {
        return Ok(active);
    }
    let accounts = store.accounts()?;
    match accounts.as_slice() {
        [only] => Ok(only.clone()),
        [] => bail!("not signed in; {LOGIN_HINT}"),
        _ => bail!(
            "several accounts are stored ({}); pass --account",
            accounts.join(", ")
        ),
    }
}

fn read_pasted_input(authorization_url: &str) -> std::io::Result<String> {
    eprintln!("Open this URL on any machine with a browser and sign in:\n\n  {authorization_url}\n");
    eprintln!("Then paste the full redirect URL (or just the code) here and press Enter:");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

pub(crate) async fn execute_login(
    flow: &OAuthFlow,
    headless: bool,
    out: &mut impl Write,
) -> Result<()> {
    if flow.config().client_id.trim().is_empty() {
        bail!("no OAuth client id configured; set --oauth-client-id or AGBRIDGE_OAUTH_CLIENT_ID");
    }
    let result = if headless {
        flow.start_headless_auth_flow(read_pasted_input).await
    } else {
        flow.start_auth_flow(|prompt| {
            eprintln!(
                "Open this URL in a browser to sign in (waiting on {}):\n\n  {}\n",
                prompt.listening_on, prompt.url
            );
        })
        .await
    };
    match result {
        Ok(credentials) => {
            writeln!(out, "signed in as {}", credentials.email)?;
            Ok(())
        }
        Err(error) => {
            tracing::warn!(error = %error, "login failed");
            Err(anyhow!(error.user_message()))
        }
    }
}

pub(crate) async fn execute_logout(
    flow: &OAuthFlow,
    account: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let email = resolve_account(flow.store(), account)?;
    let Some(credentials) = flow.store().load(&email) else {
        flow.store().delete(&email)?;
        writeln!(out, "no readable credentials for {email}; nothing to revoke")?;
        return Ok(());
    };
    let revoked = flow
        .revoke_token(&credentials)
        .await
        .map_err(|error| anyhow!("failed to remove credentials for {email}: {error}"))?;
    if revoked {
        writeln!(out, "signed out {email}")?;
    } else {
        writeln!(
            out,
            "signed out {email} (remote revocation failed; local credentials were removed)"
        )?;
    }
    Ok(())
}

fn describe_remaining(seconds: u64) -> String {
    match seconds {
        0..=59 => format!("{seconds}s"),
        60..=3_599 => format!("{}m", seconds / 60),
        _ => format!("{}h {}m", seconds / 3_600, (seconds % 3_600) / 60),
    }
}

pub(crate) fn describe_token(credentials: &OAuthCredentials, now_unix: u64) -> String {
    if is_valid_at(credentials, now_unix) {
        return format!(
            "valid, expires in {}",
            describe_remaining(credentials.expires_unix.saturating_sub(now_unix))
        );
    }
    if credentials.refresh_token.is_some() {
        "expiring; it will be refreshed on the next send".to_string()
    } else {
        format!("expired; {LOGIN_HINT}")
    }
}

pub(crate) fn execute_status(
    store: &CredentialStore,
    account: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "config dir: {}", store.config_dir().display())?;
    match store.key_source_kind() {
        Ok(kind) => writeln!(out, "key source: {}", kind.as_str())?,
        Err(error) => writeln!(out, "key source: unavailable ({error:#})")?,
    }
    let email = match resolve_account(store, account) {
        Ok(email) => email,
        Err(error) => {
            writeln!(out, "account: {error}")?;
            return Ok(());
        }
    };
    match store.load(&email) {
        Some(credentials) => {
            writeln!(out, "account: {email}")?;
            writeln!(
                out,
                "access token: {}",
                describe_token(&credentials, current_unix_timestamp())
            )?;
        }
        None => writeln!(out, "account: {email} (no readable credentials; {LOGIN_HINT})")?,
    }
    Ok(())
}

/// Loads the account's credentials and refreshes them when they are close to
/// expiry.
pub(crate) async fn load_valid_credentials(
    flow: &OAuthFlow,
    account: Option<&str>,
) -> Result<OAuthCredentials> {
    let email = resolve_account(flow.store(), account)?;
    let credentials = flow
        .store()
        .load(&email)
        .ok_or_else(|| anyhow!("no readable credentials for {email}; {LOGIN_HINT}"))?;
    flow.ensure_valid(&credentials).await.map_err(|error| {
        tracing::warn!(error = %error, email = %email, "credential refresh failed");
        anyhow!(error.user_message())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agbridge_provider::{
        CredentialStore, KeySource, KeySourcePreference, OAuthConfig, OAuthCredentials, OAuthFlow,
    };
    use httpmock::prelude::*;
    use tempfile::TempDir;

    use super::{
        describe_token, execute_logout, execute_status, load_valid_credentials, resolve_account,
    };

    fn store_in(dir: &TempDir) -> Arc<CredentialStore> {
        let key_source =
            KeySource::new(dir.path(), KeySourcePreference::Derived).with_iterations(10);
        Arc::new(CredentialStore::with_key_source(dir.path(), key_source))
    }

    fn credentials(email: &str, expires_unix: u64, refresh: Option<&str>) -> OAuthCredentials {
        OAuthCredentials {
            access_token: "ya29.token".to_string(),
            refresh_token: refresh.map(ToString::to_string),
            expires_unix,
            email: email.to_string(),
        }
    }

    #[test]
    fn unit_resolve_account_prefers_flag_then_active_then_single() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        assert!(resolve_account(&store, None).is_err());

        store
            .store("a@example.com", &credentials("a@example.com", 10, None))
            .expect("store a");
        assert_eq!(resolve_account(&store, None).expect("single"), "a@example.com");

        store
            .store("b@example.com", &credentials("b@example.com", 10, None))
            .expect("store b");
        let error = resolve_account(&store, None).expect_err("ambiguous");
        assert!(error.to_string().contains("--account"));

        store.set_active_account("b@example.com").expect("active");
        assert_eq!(resolve_account(&store, None).expect("active"), "b@example.com");
        assert_eq!(
            resolve_account(&store, Some(" a@example.com ")).expect("flag"),
            "a@example.com"
        );
    }

    #[test]
    fn unit_token_description_covers_valid_refreshable_and_dead() {
        let now = 1_700_000_000;
        assert_eq!(
            describe_token(&credentials("x", now + 7_200, None), now),
            "valid, expires in 2h 0m"
        );
        assert!(describe_token(&credentials("x", now + 60, Some("r")), now).contains("refreshed"));
        assert!(describe_token(&credentials("x", now - 1, None), now).contains("agbridge login"));
    }

    #[test]
    fn functional_status_reports_account_and_key_source() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let expires = agbridge_core::current_unix_timestamp() + 3_600;
        store
            .store("dev@example.com", &credentials("dev@example.com", expires, None))
            .expect("store");
        store.set_active_account("dev@example.com").expect("active");

        let mut out = Vec::new();
        execute_status(&store, None, &mut out).expect("status");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("key source: machine-derived key (fallback)"));
        assert!(text.contains("account: dev@example.com"));
        assert!(text.contains("access token: valid"));
        assert!(!text.contains("ya29.token"));
    }

    #[tokio::test]
    async fn functional_logout_removes_credentials_even_if_revoke_fails() {
        let server = MockServer::start();
        let revoke = server.mock(|when, then| {
            when.method(POST).path("/revoke");
            then.status(503);
        });
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        store
            .store("dev@example.com", &credentials("dev@example.com", 10, Some("1//r")))
            .expect("store");
        store.set_active_account("dev@example.com").expect("active");
        let mut config = OAuthConfig::new("client");
        config.revoke_endpoint = server.url("/revoke");
        let flow = OAuthFlow::new(config, store.clone()).expect("flow");

        let mut out = Vec::new();
        execute_logout(&flow, None, &mut out).await.expect("logout");
        revoke.assert();
        assert!(String::from_utf8(out)
            .expect("utf8")
            .contains("remote revocation failed"));
        assert!(store.load("dev@example.com").is_none());
    }

    #[tokio::test]
    async fn regression_failed_refresh_surfaces_login_hint_only() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400).body("invalid_grant: token revoked by admin");
        });
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        store
            .store("dev@example.com", &credentials("dev@example.com", 0, Some("1//r")))
            .expect("store");
        let mut config = OAuthConfig::new("client");
        config.token_endpoint = server.url("/token");
        let flow = OAuthFlow::new(config, store).expect("flow");

        let error = load_valid_credentials(&flow, None)
            .await
            .expect_err("refresh fails");
        let message = error.to_string();
        assert_eq!(
            message,
            "authentication failed; run 'agbridge login' to sign in again"
        );
        assert!(!message.contains("invalid_grant"));
    }
}
