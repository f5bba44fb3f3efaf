use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use avalab_db::Database;
use avalab_types::api::Claims;
use avalab_types::models::ProfileRef;

use crate::error::AuthError;

pub const TOKEN_TTL_DAYS: i64 = 30;

/// Issue a token bound to the profile's internal id, so it survives renames.
pub fn issue_token(secret: &str, user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Resolve a bearer token to the profile currently behind it.
///
/// Blocking: touches the database.
pub fn resolve_identity(db: &Database, secret: &str, token: &str) -> Result<ProfileRef, AuthError> {
    let claims = decode_token(secret, token)?;
    match db.profile(claims.sub) {
        Ok(profile) => Ok(profile.to_ref()),
        Err(avalab_db::Error::NotFound(_)) => Err(AuthError::UnknownProfile),
        Err(e) => Err(AuthError::Storage(e)),
    }
}
