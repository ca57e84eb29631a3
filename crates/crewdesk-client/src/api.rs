use async_trait::async_trait;
use reqwest::Response;
use serde_json::json;

use crewdesk_types::api::{
    DeletedMessage, ErrorBody, PostMessageRequest, PostMessageResponse, UnreadTotalResponse,
};
use crewdesk_types::models::{ChatMessage, MessageId, RoomId, RoomSummary, UnreadCount, WorkspaceId};

use crate::error::{ClientError, Result};

/// The durable half of the chat core as seen from a client.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Chronological page; `offset` counts back from the newest message.
    async fn list_messages(&self, room_id: RoomId, limit: u32, offset: u32) -> Result<Vec<ChatMessage>>;

    async fn post_message(&self, req: &PostMessageRequest) -> Result<PostMessageResponse>;

    async fn edit_message(&self, message_id: MessageId, content: &str) -> Result<ChatMessage>;

    async fn delete_message(&self, message_id: MessageId) -> Result<DeletedMessage>;

    async fn mark_read(&self, room_id: RoomId) -> Result<()>;

    async fn unread_total(&self) -> Result<i64>;

    async fn unread_by_room(&self) -> Result<Vec<UnreadCount>>;

    async fn list_rooms(&self, workspace_id: Option<WorkspaceId>) -> Result<Vec<RoomSummary>>;
}

/// `ChatApi` over the server's REST routes.
pub struct HttpChatApi {
    base: String,
    token: String,
    http: reqwest::Client,
}

impl HttpChatApi {
    /// `base` is the server origin, e.g. `http://localhost:3000`.
    pub fn new(base: &str, token: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Realtime endpoint for the same server.
    pub fn gateway_url(&self) -> String {
        let ws_base = self
            .base
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{ws_base}/gateway")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Turn a non-2xx response into the matching `ClientError`.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::from_status(status.as_u16(), message))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_messages(&self, room_id: RoomId, limit: u32, offset: u32) -> Result<Vec<ChatMessage>> {
        let resp = self
            .http
            .get(self.url("/messages"))
            .bearer_auth(&self.token)
            .query(&[("roomId", room_id.to_string()), ("limit", limit.to_string()), ("offset", offset.to_string())])
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn post_message(&self, req: &PostMessageRequest) -> Result<PostMessageResponse> {
        let resp = self
            .http
            .post(self.url("/messages"))
            .bearer_auth(&self.token)
            .json(req)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn edit_message(&self, message_id: MessageId, content: &str) -> Result<ChatMessage> {
        let resp = self
            .http
            .put(self.url("/messages"))
            .bearer_auth(&self.token)
            .json(&json!({ "id": message_id, "content": content }))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<DeletedMessage> {
        let resp = self
            .http
            .delete(self.url("/messages"))
            .bearer_auth(&self.token)
            .query(&[("id", message_id)])
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn mark_read(&self, room_id: RoomId) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/chat/read"))
            .bearer_auth(&self.token)
            .json(&json!({ "roomId": room_id }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn unread_total(&self) -> Result<i64> {
        let resp = self
            .http
            .get(self.url("/chat/unread-count"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: UnreadTotalResponse = check(resp).await?.json().await?;
        Ok(body.total)
    }

    async fn unread_by_room(&self) -> Result<Vec<UnreadCount>> {
        let resp = self
            .http
            .get(self.url("/chat/unread"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn list_rooms(&self, workspace_id: Option<WorkspaceId>) -> Result<Vec<RoomSummary>> {
        let mut req = self.http.get(self.url("/rooms")).bearer_auth(&self.token);
        if let Some(id) = workspace_id {
            req = req.query(&[("workspaceId", id)]);
        }
        Ok(check(req.send().await?).await?.json().await?)
    }
}
