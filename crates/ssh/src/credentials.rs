//! Credential resolution for session creation.
//!
//! Inputs arrive as a loose bundle of optional fields (explicit request
//! fields, vault entries, an identity file read late in the build). The auth
//! boundary collapses them into one tagged variant before the transport is
//! contacted.

/// Loose credential fields, merged by precedence before selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialInput {
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

impl CredentialInput {
    /// Merge `fallback` underneath `self`: fields already present win.
    #[must_use]
    pub fn or(mut self, fallback: Self) -> Self {
        self.password = self.password.or(fallback.password);
        self.private_key = self.private_key.or(fallback.private_key);
        self.passphrase = self.passphrase.or(fallback.passphrase);
        self
    }

    /// Select the authentication method. A private key wins over a password
    /// when both are present, matching the usual ssh client preference.
    #[must_use]
    pub fn into_auth_method(self) -> AuthMethod {
        match (self.private_key, self.password) {
            (Some(key), _) => AuthMethod::Key {
                key,
                passphrase: self.passphrase,
            },
            (None, Some(password)) => AuthMethod::Password(password),
            (None, None) => AuthMethod::None,
        }
    }
}

/// The selected authentication method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(String),
    Key {
        key: String,
        passphrase: Option<String>,
    },
    None,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_fields_win_over_fallback() {
        let explicit = CredentialInput {
            password: Some("explicit".into()),
            ..Default::default()
        };
        let vault = CredentialInput {
            password: Some("vault".into()),
            private_key: Some("vault-key".into()),
            passphrase: None,
        };

        let merged = explicit.or(vault);
        assert_eq!(merged.password.as_deref(), Some("explicit"));
        assert_eq!(merged.private_key.as_deref(), Some("vault-key"));
    }

    #[test]
    fn key_wins_over_password() {
        let input = CredentialInput {
            password: Some("pw".into()),
            private_key: Some("key".into()),
            passphrase: Some("kp".into()),
        };
        assert_eq!(input.into_auth_method(), AuthMethod::Key {
            key: "key".into(),
            passphrase: Some("kp".into()),
        });
    }

    #[test]
    fn password_only() {
        let input = CredentialInput {
            password: Some("pw".into()),
            ..Default::default()
        };
        assert_eq!(input.into_auth_method(), AuthMethod::Password("pw".into()));
    }

    #[test]
    fn empty_is_none() {
        assert_eq!(CredentialInput::default().into_auth_method(), AuthMethod::None);
    }
}
