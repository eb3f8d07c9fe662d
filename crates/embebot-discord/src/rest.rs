//! Outbound Discord REST calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use embebot_core::ids::{ApplicationId, ChannelId, GuildId, InteractionId, MessageId};
use embebot_core::model::{message_flags, InteractionResponse, Message};
use embebot_core::RestError;

use crate::commands::CommandDefinition;

pub const API_BASE: &str = "https://discord.com/api/v10";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait DiscordApi: Send + Sync {
    async fn get_message(&self, channel: &ChannelId, message: &MessageId) -> Result<Message, RestError>;

    /// Post `content` as a reply to `reply_to`, mentioning nobody.
    async fn send_reply(
        &self,
        channel: &ChannelId,
        reply_to: &MessageId,
        guild: Option<&GuildId>,
        content: &str,
    ) -> Result<Message, RestError>;

    async fn edit_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        content: &str,
    ) -> Result<Message, RestError>;

    async fn suppress_embeds(&self, channel: &ChannelId, message: &MessageId) -> Result<(), RestError>;

    async fn respond_to_interaction(
        &self,
        id: &InteractionId,
        token: &str,
        response: &InteractionResponse,
    ) -> Result<(), RestError>;

    /// Replace the application's global command set.
    async fn register_commands(
        &self,
        application: &ApplicationId,
        commands: &[CommandDefinition],
    ) -> Result<(), RestError>;
}

pub struct DiscordRest {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl DiscordRest {
    pub fn new(token: SecretString) -> Result<Self, RestError> {
        Self::with_base_url(token, API_BASE)
    }

    pub fn with_base_url(token: SecretString, base_url: impl Into<String>) -> Result<Self, RestError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RestError::NetworkError(format!("build client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("authorization", format!("Bot {}", self.token.expose_secret()))
            .header("content-type", "application/json")
    }

    async fn execute(&self, req: RequestBuilder) -> Result<reqwest::Response, RestError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RestError::NetworkError(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        let body = resp.text().await.unwrap_or_default();
        match RestError::from_status(status.as_u16(), body) {
            RestError::RateLimited { .. } => Err(RestError::RateLimited { retry_after }),
            other => Err(other),
        }
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RestError> {
        self.execute(req)
            .await?
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))
    }

    async fn send_body<B: Serialize + ?Sized>(&self, req: RequestBuilder, body: &B) -> Result<(), RestError> {
        self.execute(req.json(body)).await.map(|_| ())
    }
}

#[async_trait]
impl DiscordApi for DiscordRest {
    #[instrument(skip(self), fields(channel_id = %channel, message_id = %message))]
    async fn get_message(&self, channel: &ChannelId, message: &MessageId) -> Result<Message, RestError> {
        self.json(self.request(Method::GET, &format!("/channels/{channel}/messages/{message}")))
            .await
    }

    #[instrument(skip(self, content), fields(channel_id = %channel, reply_to = %reply_to))]
    async fn send_reply(
        &self,
        channel: &ChannelId,
        reply_to: &MessageId,
        guild: Option<&GuildId>,
        content: &str,
    ) -> Result<Message, RestError> {
        let body = json!({
            "content": content,
            "allowed_mentions": {"parse": []},
            "message_reference": {
                "message_id": reply_to,
                "channel_id": channel,
                "guild_id": guild,
            },
        });
        self.json(
            self.request(Method::POST, &format!("/channels/{channel}/messages"))
                .json(&body),
        )
        .await
    }

    #[instrument(skip(self, content), fields(channel_id = %channel, message_id = %message))]
    async fn edit_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        content: &str,
    ) -> Result<Message, RestError> {
        self.json(
            self.request(Method::PATCH, &format!("/channels/{channel}/messages/{message}"))
                .json(&json!({ "content": content })),
        )
        .await
    }

    #[instrument(skip(self), fields(channel_id = %channel, message_id = %message))]
    async fn suppress_embeds(&self, channel: &ChannelId, message: &MessageId) -> Result<(), RestError> {
        self.send_body(
            self.request(Method::PATCH, &format!("/channels/{channel}/messages/{message}")),
            &json!({ "flags": message_flags::SUPPRESS_EMBEDS }),
        )
        .await
    }

    #[instrument(skip(self, token, response), fields(interaction_id = %id, kind = response.kind))]
    async fn respond_to_interaction(
        &self,
        id: &InteractionId,
        token: &str,
        response: &InteractionResponse,
    ) -> Result<(), RestError> {
        self.send_body(
            self.request(Method::POST, &format!("/interactions/{id}/{token}/callback")),
            response,
        )
        .await
    }

    #[instrument(skip(self, commands), fields(application_id = %application, count = commands.len()))]
    async fn register_commands(
        &self,
        application: &ApplicationId,
        commands: &[CommandDefinition],
    ) -> Result<(), RestError> {
        self.send_body(
            self.request(Method::PUT, &format!("/applications/{application}/commands")),
            commands,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::Value;

    #[derive(Clone, Default)]
    struct Recorded {
        bodies: Arc<Mutex<Vec<(String, Value)>>>,
        auth: Arc<Mutex<Vec<String>>>,
    }

    async fn get_message(
        State(rec): State<Recorded>,
        headers: HeaderMap,
        Path((channel, message)): Path<(String, String)>,
    ) -> impl IntoResponse {
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            rec.auth.lock().push(auth.to_string());
        }
        if message == "missing" {
            return (StatusCode::NOT_FOUND, Json(json!({"message": "Unknown Message"})));
        }
        if message == "busy" {
            return (StatusCode::TOO_MANY_REQUESTS, Json(json!({"retry_after": 1.5})));
        }
        (
            StatusCode::OK,
            Json(json!({
                "id": message,
                "channel_id": channel,
                "author": {"id": "u", "username": "u"},
                "embeds": [],
                "flags": 4
            })),
        )
    }

    async fn patch_message(
        State(rec): State<Recorded>,
        Path((channel, message)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        rec.bodies
            .lock()
            .push((format!("PATCH {channel}/{message}"), body.clone()));
        Json(json!({
            "id": message,
            "channel_id": channel,
            "author": {"id": "u", "username": "u"},
            "flags": body.get("flags").cloned().unwrap_or(json!(0))
        }))
    }

    async fn post_message(
        State(rec): State<Recorded>,
        Path(channel): Path<String>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        rec.bodies.lock().push((format!("POST {channel}"), body));
        Json(json!({
            "id": "reply",
            "channel_id": channel,
            "author": {"id": "bot", "username": "embebot", "bot": true}
        }))
    }

    async fn callback(
        State(rec): State<Recorded>,
        Path((id, token)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        rec.bodies.lock().push((format!("CALLBACK {id}/{token}"), body));
        StatusCode::NO_CONTENT
    }

    async fn put_commands(
        State(rec): State<Recorded>,
        Path(app): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        rec.bodies.lock().push((format!("PUT {app}"), body));
        StatusCode::OK
    }

    async fn fake_discord() -> (DiscordRest, Recorded) {
        let rec = Recorded::default();
        let app = Router::new()
            .route(
                "/channels/{channel}/messages/{message}",
                get(get_message).patch(patch_message),
            )
            .route("/channels/{channel}/messages", post(post_message))
            .route("/interactions/{id}/{token}/callback", post(callback))
            .route("/applications/{app}/commands", put(put_commands))
            .with_state(rec.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let rest = DiscordRest::with_base_url(SecretString::from("bot-token"), format!("http://{addr}"))
            .unwrap();
        (rest, rec)
    }

    fn ids() -> (ChannelId, MessageId) {
        (ChannelId::from_raw("c1"), MessageId::from_raw("m1"))
    }

    #[tokio::test]
    async fn get_message_sends_bot_auth() {
        let (rest, rec) = fake_discord().await;
        let (channel, message) = ids();
        let msg = rest.get_message(&channel, &message).await.unwrap();
        assert!(msg.embeds_suppressed());
        assert_eq!(rec.auth.lock().as_slice(), ["Bot bot-token"]);
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let (rest, _) = fake_discord().await;
        let channel = ChannelId::from_raw("c1");

        let err = rest
            .get_message(&channel, &MessageId::from_raw("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::NotFound(_)));

        let err = rest
            .get_message(&channel, &MessageId::from_raw("busy"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn suppress_patches_flag() {
        let (rest, rec) = fake_discord().await;
        let (channel, message) = ids();
        rest.suppress_embeds(&channel, &message).await.unwrap();
        let bodies = rec.bodies.lock();
        assert_eq!(bodies[0].0, "PATCH c1/m1");
        assert_eq!(bodies[0].1, json!({"flags": 4}));
    }

    #[tokio::test]
    async fn edit_patches_content() {
        let (rest, rec) = fake_discord().await;
        let (channel, message) = ids();
        rest.edit_message(&channel, &message, "updated").await.unwrap();
        assert_eq!(rec.bodies.lock()[0].1, json!({"content": "updated"}));
    }

    #[tokio::test]
    async fn reply_references_original_without_mentions() {
        let (rest, rec) = fake_discord().await;
        let (channel, message) = ids();
        let guild = GuildId::from_raw("g1");
        rest.send_reply(&channel, &message, Some(&guild), "[⠀](https://vxtwitter.com/a/status/1)")
            .await
            .unwrap();

        let bodies = rec.bodies.lock();
        let body = &bodies[0].1;
        assert_eq!(body["allowed_mentions"], json!({"parse": []}));
        assert_eq!(body["message_reference"]["message_id"], "m1");
        assert_eq!(body["message_reference"]["guild_id"], "g1");
    }

    #[tokio::test]
    async fn interaction_callback_and_command_registration() {
        let (rest, rec) = fake_discord().await;
        rest.respond_to_interaction(
            &InteractionId::from_raw("i1"),
            "tok",
            &InteractionResponse::pong(),
        )
        .await
        .unwrap();
        rest.register_commands(
            &ApplicationId::from_raw("app"),
            &crate::commands::definitions(),
        )
        .await
        .unwrap();

        let bodies = rec.bodies.lock();
        assert_eq!(bodies[0].0, "CALLBACK i1/tok");
        assert_eq!(bodies[0].1, json!({"type": 1}));
        assert_eq!(bodies[1].0, "PUT app");
        assert!(bodies[1].1.as_array().unwrap().len() >= 4);
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let rest = DiscordRest::with_base_url(SecretString::from("t"), format!("http://{addr}")).unwrap();
        let (channel, message) = ids();
        let err = rest.suppress_embeds(&channel, &message).await.unwrap_err();
        assert!(matches!(err, RestError::NetworkError(_)));
    }
}
