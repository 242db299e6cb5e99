use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorMessage, HttpError};

/// Claims issued by the identity provider. Only `sub` matters to us.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

pub fn create_token(
    user_id: &str,
    secret: &[u8],
    audience: &str,
    expires_in_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    if user_id.is_empty() {
        return Err(jsonwebtoken::errors::ErrorKind::InvalidSubject.into());
    }

    let now = Utc::now();
    let claims = TokenClaims {
        sub: user_id.to_string(),
        aud: audience.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::seconds(expires_in_seconds)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

pub fn decode_token<T: Into<String>>(
    token: T,
    secret: &[u8],
    audience: &str,
) -> Result<String, HttpError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);

    let decoded = decode::<TokenClaims>(&token.into(), &DecodingKey::from_secret(secret), &validation);

    match decoded {
        Ok(token) => Ok(token.claims.sub),
        Err(_) => Err(HttpError::unauthorized(ErrorMessage::InvalidToken.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_subject() {
        let token = create_token("user-1", b"secret", "authenticated", 60).unwrap();
        let sub = decode_token(token, b"secret", "authenticated").unwrap();
        assert_eq!(sub, "user-1");
    }

    #[test]
    fn test_wrong_secret_or_audience_rejected() {
        let token = create_token("user-1", b"secret", "authenticated", 60).unwrap();
        assert!(decode_token(token.clone(), b"other", "authenticated").is_err());
        assert!(decode_token(token, b"secret", "service_role").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = create_token("user-1", b"secret", "authenticated", -3600).unwrap();
        assert!(decode_token(token, b"secret", "authenticated").is_err());
    }
}
