//! Credential descriptors and partition-key derivation.
//!
//! A [`Credentials`] value names *which* credential a client was built with
//! (a Kubernetes secret reference, an app-installation secret, or nothing).
//! It never holds token material itself — secret resolution happens in the
//! provider layer — and is used for exactly one thing here: deriving a
//! stable partition key so that clients built with different credentials
//! can never observe each other's cached responses.

/// Descriptor for the credential an SCM client authenticates with.
///
/// Used only to derive a cache partition key via
/// [`partition_key`](Credentials::partition_key); descriptors are never
/// compared structurally anywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Credentials {
    /// Unauthenticated access.
    Anonymous,
    /// App-installation credentials stored in the named secret.
    App {
        /// Name of the secret holding the app credentials.
        secret_name: String,
    },
    /// A personal/deploy token stored under `key` in the named secret.
    Token {
        /// Name of the secret holding the token.
        secret_name: String,
        /// Key within the secret.
        key: String,
    },
}

impl Credentials {
    /// Anonymous (unauthenticated) credentials.
    pub fn anonymous() -> Self {
        Self::Anonymous
    }

    /// App-installation credentials stored in `secret_name`.
    pub fn app(secret_name: impl Into<String>) -> Self {
        Self::App {
            secret_name: secret_name.into(),
        }
    }

    /// Token credentials stored under `key` in `secret_name`.
    pub fn token(secret_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Token {
            secret_name: secret_name.into(),
            key: key.into(),
        }
    }

    /// Derive the partition key for this descriptor.
    ///
    /// Equal descriptors always yield equal keys, and the three variants
    /// can never collide: the anonymous key is fixed, app keys carry an
    /// `app` prefix, and token keys carry a `token/` prefix.
    pub fn partition_key(&self) -> String {
        match self {
            Self::Anonymous => "anonymous".to_string(),
            Self::App { secret_name } => format!("app{secret_name}"),
            Self::Token { secret_name, key } => format!("token/{secret_name}/{key}"),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::Anonymous
    }
}
