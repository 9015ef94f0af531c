// REST transport for the PayPhone server.
//
// Thin request/response plumbing: serde DTOs on the wire, core models out.
// The only logic here is error mapping and a bounded retry on the send path.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;

use super::{TransportClient, TransportError};
use crate::models::{Conversation, DeliveryStatus, LastMessage, Message, Participant};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_ATTEMPTS: usize = 2;

pub struct HttpTransport {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

/// Result of a successful login: the bearer token plus the profile the
/// session is created from.
pub struct AuthenticatedUser {
    pub token: String,
    pub user: Participant,
}

#[derive(Deserialize)]
struct UserDto {
    id: String,
    name: String,
    avatar: Option<String>,
    #[serde(default)]
    is_online: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl From<UserDto> for Participant {
    fn from(dto: UserDto) -> Self {
        Participant {
            id: dto.id,
            name: dto.name,
            avatar: dto.avatar,
            is_online: dto.is_online,
            last_seen: dto.last_seen,
        }
    }
}

#[derive(Deserialize)]
struct LastMessageDto {
    text: String,
    sender_id: String,
    timestamp: DateTime<Utc>,
    status: DeliveryStatus,
}

#[derive(Deserialize)]
struct ChatDto {
    id: String,
    last_message: Option<LastMessageDto>,
    #[serde(default)]
    is_pinned: bool,
    created_at: DateTime<Utc>,
    participant_details: Option<Vec<UserDto>>,
}

impl ChatDto {
    /// One-to-one chats carry exactly one peer in `participant_details`;
    /// anything else cannot be rendered and is skipped by the caller.
    fn into_conversation(self) -> Option<Conversation> {
        let participant = self.participant_details?.into_iter().next()?.into();
        Some(Conversation {
            id: self.id,
            participant,
            last_message: self.last_message.map(|m| LastMessage {
                text: m.text,
                sender_id: m.sender_id,
                sent_at: m.timestamp,
                status: m.status,
            }),
            is_pinned: self.is_pinned,
            created_at: self.created_at,
            unread_count: 0,
        })
    }
}

#[derive(Deserialize)]
struct MessageDto {
    id: String,
    chat_id: String,
    sender_id: String,
    text: String,
    timestamp: DateTime<Utc>,
    status: DeliveryStatus,
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        Message {
            id: dto.id,
            conversation_id: dto.chat_id,
            sender_id: dto.sender_id,
            text: dto.text,
            sent_at: dto.timestamp,
            status: dto.status,
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    detail: String,
}

#[derive(Deserialize)]
struct LoginDto {
    token: String,
    user: UserDto,
}

#[derive(Deserialize)]
struct PinDto {
    message: String,
}

/// Map a response to `T`, translating API rejections into `TransportError`.
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized);
    }
    let detail = match response.json::<ApiErrorBody>().await {
        Ok(body) => body.detail,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    Err(TransportError::Api {
        status: status.as_u16(),
        detail,
    })
}

fn api_base(server: &str) -> String {
    format!("{}/api", server.trim_end_matches('/'))
}

impl HttpTransport {
    pub fn new(server: &str, token: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(HttpTransport {
            client,
            api_base: api_base(server),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&self.token)
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.put(self.url(path)).bearer_auth(&self.token)
    }

    fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.delete(self.url(path)).bearer_auth(&self.token)
    }

    /// Authenticate with an email address or a phone number. Stands alone
    /// because there is no token yet.
    pub async fn login(
        server: &str,
        identifier: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let body = if identifier.contains('@') {
            json!({ "email": identifier, "password": password })
        } else {
            json!({ "phone": identifier, "password": password })
        };
        let response = client
            .post(format!("{}/auth/login", api_base(server)))
            .json(&body)
            .send()
            .await?;
        let login: LoginDto = read_json(response).await?;
        info!("Logged in as {}", login.user.name);
        Ok(AuthenticatedUser {
            token: login.token,
            user: login.user.into(),
        })
    }

    /// Tell the server the session ended. Failures only get logged; the
    /// local session is cleared regardless.
    pub async fn logout(&self) {
        match self.post("/auth/logout").send().await {
            Ok(response) if response.status().is_success() => debug!("Logged out"),
            Ok(response) => warn!("Logout rejected with status {}", response.status()),
            Err(e) => warn!("Logout request failed: {}", e),
        }
    }
}

#[async_trait]
impl TransportClient for HttpTransport {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        let response = self.get("/chats").send().await?;
        let chats: Vec<ChatDto> = read_json(response).await?;
        let mut conversations = Vec::with_capacity(chats.len());
        for chat in chats {
            let id = chat.id.clone();
            match chat.into_conversation() {
                Some(conversation) => conversations.push(conversation),
                None => warn!("Skipping conversation {} without participant details", id),
            }
        }
        Ok(conversations)
    }

    async fn create_conversation(&self, peer_id: &str) -> Result<Conversation, TransportError> {
        let response = self
            .post("/chats")
            .json(&json!({ "participants": [peer_id], "type": "private" }))
            .send()
            .await?;
        let chat: ChatDto = read_json(response).await?;
        chat.into_conversation().ok_or(TransportError::Api {
            status: 500,
            detail: "created conversation has no participant".to_string(),
        })
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), TransportError> {
        let response = self
            .delete(&format!("/chats/{}", conversation_id))
            .send()
            .await?;
        read_json::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn pin_conversation(&self, conversation_id: &str) -> Result<bool, TransportError> {
        let response = self
            .put(&format!("/chats/{}/pin", conversation_id))
            .send()
            .await?;
        // The server answers with a confirmation phrase, not the new state.
        let body: PinDto = read_json(response).await?;
        Ok(!body.message.contains("unpinned"))
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, TransportError> {
        let response = self
            .get(&format!("/chats/{}/messages", conversation_id))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        let messages: Vec<MessageDto> = read_json(response).await?;
        Ok(messages.into_iter().map(Message::from).collect())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<Message, TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .post(&format!("/chats/{}/messages", conversation_id))
                .json(&json!({ "text": text, "message_type": "text" }))
                .send()
                .await;
            match result {
                Ok(response) => return Ok(read_json::<MessageDto>(response).await?.into()),
                Err(e) => {
                    warn!("Send attempt {} failed: {}", attempt, e);
                    if attempt >= SEND_ATTEMPTS {
                        return Err(TransportError::Network(e));
                    }
                    // Backoff with jitter before the next attempt.
                    let backoff = 500 * 2u64.pow(attempt as u32) + rand::random::<u64>() % 500;
                    debug!("Retrying send in {}ms", backoff);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    async fn report_status(
        &self,
        message_id: &str,
        status: DeliveryStatus,
    ) -> Result<(), TransportError> {
        let response = self
            .put(&format!("/chats/messages/{}/status", message_id))
            .json(&json!({ "status": status }))
            .send()
            .await?;
        read_json::<MessageDto>(response).await?;
        Ok(())
    }

    async fn fetch_users(&self) -> Result<Vec<Participant>, TransportError> {
        let response = self.get("/users").send().await?;
        let users: Vec<UserDto> = read_json(response).await?;
        Ok(users.into_iter().map(Participant::from).collect())
    }
}
