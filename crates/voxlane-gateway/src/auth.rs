//! Token verification for privileged session commands.

use voxlane_core::config::GatewayAuthConfig;
use voxlane_core::error::{Result, VoxlaneError};

/// Message returned to clients whose command fails verification.
pub const UNAUTHORIZED: &str = "Unauthorized, please log in first";

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthMode {
    None,
    Token(String),
}

/// Checks the token carried by `chat` and `audio` commands.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    mode: AuthMode,
}

impl TokenVerifier {
    /// Accept every command.
    pub fn open() -> Self {
        Self {
            mode: AuthMode::None,
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Token(token.into()),
        }
    }

    pub fn from_config(config: &GatewayAuthConfig) -> Result<Self> {
        match config.effective_mode() {
            "none" => Ok(Self::open()),
            "token" => config
                .resolve_token()
                .map(Self::with_token)
                .ok_or_else(|| VoxlaneError::Config("Token auth enabled but no token configured".into())),
            other => Err(VoxlaneError::Config(format!("Unknown auth mode: {other}"))),
        }
    }

    pub fn mode(&self) -> &str {
        match self.mode {
            AuthMode::None => "none",
            AuthMode::Token(_) => "token",
        }
    }

    pub fn verify(&self, provided: Option<&str>) -> Result<()> {
        match &self.mode {
            AuthMode::None => Ok(()),
            AuthMode::Token(expected) => match provided {
                Some(token) if !token.is_empty() && constant_time_eq(token, expected) => Ok(()),
                _ => Err(VoxlaneError::Auth(UNAUTHORIZED.into())),
            },
        }
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(mode: &str, token: Option<&str>) -> GatewayAuthConfig {
        GatewayAuthConfig {
            mode: Some(mode.to_string()),
            token: token.map(|s| s.to_string()),
            token_env: None,
        }
    }

    #[test]
    fn test_mode_none_accepts_anything() {
        let verifier = TokenVerifier::from_config(&auth("none", None)).unwrap();
        assert!(verifier.verify(None).is_ok());
        assert!(verifier.verify(Some("whatever")).is_ok());
        assert_eq!(verifier.mode(), "none");
    }

    #[test]
    fn test_token_mode() {
        let verifier = TokenVerifier::from_config(&auth("token", Some("secret"))).unwrap();
        assert!(verifier.verify(Some("secret")).is_ok());
        assert!(matches!(verifier.verify(Some("wrong!")), Err(VoxlaneError::Auth(_))));
        assert!(verifier.verify(Some("")).is_err());
        assert!(verifier.verify(None).is_err());
    }

    #[test]
    fn test_token_mode_without_token_is_config_error() {
        let err = TokenVerifier::from_config(&auth("token", None)).unwrap_err();
        assert!(matches!(err, VoxlaneError::Config(_)));
    }

    #[test]
    fn test_unknown_mode() {
        assert!(TokenVerifier::from_config(&auth("password", Some("x"))).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(constant_time_eq("", ""));
    }
}
