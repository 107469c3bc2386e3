//! `LiveKit` access tokens for callers joining a media room

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use jsonwebtoken::{EncodingKey, Header, encode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::config::LiveKitConfig;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub room_name: String,
    pub participant_name: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub url: String,
}

/// Room permissions carried in the `video` claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveKitClaims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub video: VideoGrant,
}

/// Sign a room-join token for one participant
///
/// # Errors
///
/// Returns error if `LiveKit` credentials are missing or signing fails
pub fn issue_token(config: &LiveKitConfig, room: &str, participant: &str) -> Result<String> {
    let (Some(api_key), Some(api_secret)) = (&config.api_key, &config.api_secret) else {
        return Err(Error::Config("LiveKit credentials not configured".to_string()));
    };

    let now = chrono::Utc::now().timestamp();
    let ttl = i64::try_from(config.token_ttl.as_secs()).unwrap_or(i64::MAX);
    let claims = LiveKitClaims {
        iss: api_key.clone(),
        sub: participant.to_string(),
        name: participant.to_string(),
        nbf: now,
        exp: now.saturating_add(ttl),
        jti: uuid::Uuid::new_v4().to_string(),
        video: VideoGrant {
            room_join: true,
            room: room.to_string(),
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
        },
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(api_secret.expose_secret().as_bytes()),
    )
    .map_err(|e| Error::Token(e.to_string()))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", post(create_token)).with_state(state)
}

async fn create_token(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<TokenRequest>,
) -> std::result::Result<Json<TokenResponse>, ApiError> {
    if request.room_name.trim().is_empty() || request.participant_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "room_name and participant_name are required",
        ));
    }
    if !state.livekit.is_configured() {
        return Err(ApiError::NotConfigured("LiveKit credentials not configured"));
    }

    let token = issue_token(&state.livekit, &request.room_name, &request.participant_name)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(room = %request.room_name, participant = %request.participant_name, "issued LiveKit token");

    Ok(Json(TokenResponse {
        token,
        url: state.livekit.url.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use secrecy::SecretString;

    use super::*;

    fn configured() -> LiveKitConfig {
        LiveKitConfig {
            api_key: Some("devkey".to_string()),
            api_secret: Some(SecretString::from("secret".to_string())),
            ..LiveKitConfig::default()
        }
    }

    #[test]
    fn token_carries_room_grant() {
        let token = tokio_test::assert_ok!(issue_token(&configured(), "sala-1", "caller"));

        let data = decode::<LiveKitClaims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();
        let claims = data.claims;

        assert_eq!(claims.iss, "devkey");
        assert_eq!(claims.sub, "caller");
        assert_eq!(claims.video.room, "sala-1");
        assert!(claims.video.room_join && claims.video.can_publish_data);
        assert_eq!(claims.exp - claims.nbf, 6 * 60 * 60);
    }

    #[test]
    fn video_grant_uses_camel_case() {
        let token = issue_token(&configured(), "r", "p").unwrap();
        let data = decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();

        assert_eq!(data.claims["video"]["roomJoin"], true);
        assert_eq!(data.claims["video"]["canPublishData"], true);
    }

    #[test]
    fn unconfigured_is_error() {
        assert!(matches!(
            issue_token(&LiveKitConfig::default(), "r", "p"),
            Err(Error::Config(_))
        ));
    }
}
