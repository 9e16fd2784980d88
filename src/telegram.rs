//! # Telegram transport
//!
//! Minimal Bot API client for long polling: `getUpdates`, `sendMessage` and
//! `answerCallbackQuery`. Replies are plain text; no keyboards or markup.
//!
//! [`run_bot`] polls forever (until Ctrl-C) and spawns one task per update, so
//! several messages can be in flight at once against the same
//! [`ConversationHandler`].

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::conversation::{ConversationHandler, Inbound, Input};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// Where to reply, and what to hand to the conversation handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub chat_id: i64,
    pub callback_id: Option<String>,
    pub inbound: Inbound,
}

impl Update {
    /// `None` for update kinds the bot does not handle.
    pub fn route(self) -> Option<Routed> {
        if let Some(message) = self.message {
            let user_id = message.from.as_ref().map_or(message.chat.id, |u| u.id);
            let input = match message.text {
                Some(text) => Input::Text(text),
                None => Input::NonText,
            };
            return Some(Routed {
                chat_id: message.chat.id,
                callback_id: None,
                inbound: Inbound { user_id, input },
            });
        }

        let query = self.callback_query?;
        let chat_id = query.message.as_ref().map_or(query.from.id, |m| m.chat.id);
        Some(Routed {
            chat_id,
            callback_id: Some(query.id),
            inbound: Inbound {
                user_id: query.from.id,
                input: Input::Callback(query.data.unwrap_or_default()),
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let url = format!("{}/bot{}/{}", self.api_base, self.token, method);
        let response: ApiResponse = self.client.post(&url).json(&body).send().await?.json().await?;
        if !response.ok {
            return Err(Error::Telegram(format!(
                "{method}: {}",
                response.description.unwrap_or_else(|| "request failed".into())
            )));
        }
        Ok(serde_json::from_value(response.result)?)
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call::<Value>("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<()> {
        self.call::<Value>("answerCallbackQuery", json!({ "callback_query_id": callback_id }))
            .await?;
        Ok(())
    }
}

/// Fetch one batch of updates and spawn a task per routable update.
///
/// Returns the next offset and the spawned tasks.
pub async fn poll_once(
    telegram: &Arc<TelegramClient>,
    handler: &Arc<ConversationHandler>,
    offset: i64,
    timeout_secs: u64,
) -> Result<(i64, Vec<JoinHandle<()>>)> {
    let updates = telegram.get_updates(offset, timeout_secs).await?;
    let mut next_offset = offset;
    let mut tasks = Vec::with_capacity(updates.len());

    for update in updates {
        next_offset = next_offset.max(update.update_id + 1);
        let Some(routed) = update.route() else {
            continue;
        };
        debug!("Update for chat {} from user {}", routed.chat_id, routed.inbound.user_id);

        let telegram = Arc::clone(telegram);
        let handler = Arc::clone(handler);
        tasks.push(tokio::spawn(async move {
            let user_id = routed.inbound.user_id;
            let reply = handler.handle(routed.inbound).await;
            if let Err(e) = telegram.send_message(routed.chat_id, &reply).await {
                error!("Replying to user {user_id} failed: {e}");
            }
            if let Some(callback_id) = routed.callback_id {
                if let Err(e) = telegram.answer_callback_query(&callback_id).await {
                    error!("Answering callback for user {user_id} failed: {e}");
                }
            }
        }));
    }

    Ok((next_offset, tasks))
}

/// Long-poll until Ctrl-C.
pub async fn run_bot(telegram: Arc<TelegramClient>, handler: Arc<ConversationHandler>, timeout_secs: u64) {
    info!("Starting bot...");
    let mut offset = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Bot stopped by user");
                return;
            }
            polled = poll_once(&telegram, &handler, offset, timeout_secs) => {
                match polled {
                    Ok((next, _tasks)) => offset = next,
                    Err(e) => {
                        error!("Polling failed: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Dependencies;
    use httpmock::prelude::*;

    fn parse(v: Value) -> Update {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_route_text_message() {
        let update = parse(json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": { "id": 42, "is_bot": false, "first_name": "A" },
                "chat": { "id": 4242, "type": "private" },
                "text": "/help"
            }
        }));
        let routed = update.route().unwrap();
        assert_eq!(routed.chat_id, 4242);
        assert_eq!(routed.inbound, Inbound::text(42, "/help"));
        assert_eq!(routed.callback_id, None);
    }

    #[test]
    fn test_route_sticker_is_non_text() {
        let update = parse(json!({
            "update_id": 11,
            "message": { "message_id": 2, "from": { "id": 5 }, "chat": { "id": 5 }, "sticker": {} }
        }));
        assert_eq!(update.route().unwrap().inbound.input, Input::NonText);
    }

    #[test]
    fn test_route_callback_query() {
        let update = parse(json!({
            "update_id": 12,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 7 },
                "data": "stats",
                "message": { "message_id": 3, "chat": { "id": 70 } }
            }
        }));
        let routed = update.route().unwrap();
        assert_eq!(routed.chat_id, 70);
        assert_eq!(routed.callback_id.as_deref(), Some("cb-1"));
        assert_eq!(routed.inbound.input, Input::Callback("stats".into()));
    }

    #[test]
    fn test_route_ignores_other_updates() {
        assert!(parse(json!({ "update_id": 13, "edited_message": {} })).route().is_none());
    }

    #[tokio::test]
    async fn test_get_updates_error_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/getUpdates");
                then.status(200)
                    .json_body(json!({ "ok": false, "description": "Unauthorized" }));
            })
            .await;

        let client = TelegramClient::new(&server.base_url(), "TOKEN");
        let err = client.get_updates(0, 0).await.unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[tokio::test]
    async fn test_poll_once_replies_and_advances_offset() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/getUpdates");
                then.status(200).json_body(json!({
                    "ok": true,
                    "result": [
                        { "update_id": 100, "message": {
                            "message_id": 1, "from": { "id": 1 }, "chat": { "id": 1 }, "text": "/help" } },
                        { "update_id": 101, "edited_message": {} },
                        { "update_id": 102, "callback_query": {
                            "id": "cb", "from": { "id": 2 }, "data": "menu" } }
                    ]
                }));
            })
            .await;
        let send = server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/sendMessage");
                then.status(200).json_body(json!({ "ok": true, "result": { "message_id": 9 } }));
            })
            .await;
        let answer = server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/answerCallbackQuery");
                then.status(200).json_body(json!({ "ok": true, "result": true }));
            })
            .await;

        let telegram = Arc::new(TelegramClient::new(&server.base_url(), "TOKEN"));
        let handler = Arc::new(ConversationHandler::new(Dependencies::default(), 5));

        let (offset, tasks) = poll_once(&telegram, &handler, 0, 0).await.unwrap();
        assert_eq!(offset, 103);
        assert_eq!(tasks.len(), 2);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(send.hits_async().await, 2);
        answer.assert_async().await;
    }
}
