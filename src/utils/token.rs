use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::usermodel::UserRole;

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub role: UserRole,
    pub iat: usize,
    pub exp: usize,
}

pub fn create_token(
    user_id: &str,
    role: UserRole,
    secret: &[u8],
    expires_in_minutes: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    if user_id.is_empty() {
        return Err(ErrorKind::InvalidSubject.into());
    }

    let now = Utc::now();
    let iat = now.timestamp() as usize;
    let exp = (now + Duration::minutes(expires_in_minutes)).timestamp() as usize;
    let claims = TokenClaims {
        sub: user_id.to_string(),
        role,
        iat,
        exp,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

pub fn decode_token<T: Into<String>>(
    token: T,
    secret: &[u8],
) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
    let decoded = decode::<TokenClaims>(
        &token.into(),
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )?;

    Ok(decoded.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_keeps_role() {
        let token = create_token("8c1b2f5e-0000-4000-8000-000000000001", UserRole::Employer, b"secret", 60).unwrap();
        let claims = decode_token(token, b"secret").unwrap();
        assert_eq!(claims.sub, "8c1b2f5e-0000-4000-8000-000000000001");
        assert_eq!(claims.role, UserRole::Employer);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token("user", UserRole::Employee, b"secret", 60).unwrap();
        assert!(decode_token(token, b"other").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create_token("user", UserRole::Employee, b"secret", -10).unwrap();
        assert!(decode_token(token, b"secret").is_err());
    }

    #[test]
    fn empty_subject_is_refused() {
        assert!(create_token("", UserRole::Admin, b"secret", 60).is_err());
    }
}
