// service/identity_provider.rs
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{models::usermodel::AuthenticatedUser, utils::token};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentityError {
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a bearer token to the caller's id and role.
#[async_trait]
pub trait IdentityProvider: std::fmt::Debug + Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, IdentityError>;
}

#[derive(Clone)]
pub struct JwtIdentityProvider {
    secret: Vec<u8>,
}

impl std::fmt::Debug for JwtIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityProvider").finish_non_exhaustive()
    }
}

impl JwtIdentityProvider {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, IdentityError> {
        let claims = token::decode_token(token, &self.secret).map_err(|_| IdentityError::InvalidToken)?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| IdentityError::InvalidToken)?;

        Ok(AuthenticatedUser { id, role: claims.role })
    }
}
