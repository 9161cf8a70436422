use std::fmt;

use serde::{Deserialize, Serialize};

pub const ENCRYPTION_ALGORITHM: &str = "aes-256-gcm";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Tokens for one signed-in account. Only ever persisted as ciphertext.
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_unix: u64,
    pub email: String,
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_unix", &self.expires_unix)
            .field("email", &self.email)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// On-disk shape of one encrypted credential file. Binary fields are base64.
pub struct EncryptedBlob {
    pub iv: String,
    #[serde(rename = "authTag")]
    pub auth_tag: String,
    pub data: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Which key source the credential store may use.
pub enum KeySourcePreference {
    #[default]
    Auto,
    Keychain,
    Derived,
}

impl KeySourcePreference {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Keychain => "keychain",
            Self::Derived => "derived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The key source actually in use.
pub enum KeySourceKind {
    Keychain,
    Derived,
}

impl KeySourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keychain => "platform secret store",
            Self::Derived => "machine-derived key (fallback)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EncryptedBlob, OAuthCredentials};

    #[test]
    fn unit_credentials_debug_hides_tokens() {
        let credentials = OAuthCredentials {
            access_token: "ya29.secret".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_unix: 10,
            email: "dev@example.com".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("ya29.secret"));
        assert!(!rendered.contains("1//refresh"));
        assert!(rendered.contains("dev@example.com"));
    }

    #[test]
    fn unit_blob_uses_auth_tag_field_name() {
        let blob = EncryptedBlob {
            iv: "aXY=".to_string(),
            auth_tag: "dGFn".to_string(),
            data: "ZGF0YQ==".to_string(),
            algorithm: "aes-256-gcm".to_string(),
        };
        let value = serde_json::to_value(&blob).expect("serialize");
        assert_eq!(value["authTag"], "dGFn");
        assert!(value.get("auth_tag").is_none());
    }
}
