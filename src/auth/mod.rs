use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an access token. `tenant_id` scopes every request made with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(sub: String, tenant_id: Option<String>, groups: Vec<String>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub,
            tenant_id,
            email: None,
            name: None,
            groups,
            exp,
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug)]
pub enum JwtError {
    TokenGeneration(String),
    InvalidToken(String),
    InvalidSecret,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::TokenGeneration(msg) => write!(f, "JWT generation error: {}", msg),
            JwtError::InvalidToken(msg) => write!(f, "Invalid JWT token: {}", msg),
            JwtError::InvalidSecret => write!(f, "Invalid JWT secret"),
        }
    }
}

impl std::error::Error for JwtError {}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_tenant_claim() {
        let claims = Claims::new("user-1".into(), Some("alpha".into()), vec!["admin".into()], 1);
        let token = generate_jwt(&claims, "secret").unwrap();

        let decoded = decode_jwt(&token, "secret").unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.tenant_id.as_deref(), Some("alpha"));
        assert_eq!(decoded.groups, vec!["admin".to_string()]);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let claims = Claims::new("user-1".into(), Some("alpha".into()), vec![], 1);
        let token = generate_jwt(&claims, "secret").unwrap();
        assert!(matches!(decode_jwt(&token, "other"), Err(JwtError::InvalidToken(_))));
    }

    #[test]
    fn refuses_empty_secret() {
        let claims = Claims::new("user-1".into(), None, vec![], 1);
        assert!(matches!(generate_jwt(&claims, ""), Err(JwtError::InvalidSecret)));
    }
}
