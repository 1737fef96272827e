use crate::core::errors::NetworkError;
use crate::core::kernel::{ApiRequest, RestClient};
use crate::core::types::{ChatRequest, ChatResponse};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Endpoint that queues a chat request
pub const CHAT_ENDPOINT: &str = "chat";

/// Chat request endpoint, correlated with the live session
pub struct ChatApi<R: RestClient> {
    rest: R,
}

impl<R: RestClient> ChatApi<R> {
    pub fn new(rest: R) -> Self {
        Self { rest }
    }

    pub fn rest(&self) -> &R {
        &self.rest
    }

    /// Queue a chat request. An empty `session_id` is filled from the
    /// connection's session when one is known.
    #[instrument(skip(self, request, cancel), fields(character_id = %request.character_id))]
    pub async fn send_chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, NetworkError> {
        let api_request = ApiRequest::post(CHAT_ENDPOINT)
            .with_json(request)?
            .requiring_session()
            .with_cancellation(cancel.clone());

        let response: ChatResponse = self.rest.send(api_request).await?;
        info!(
            success = response.success,
            session_id = %response.session_id,
            "Chat request accepted"
        );
        Ok(response)
    }

    /// Build and queue a chat request from its parts
    pub async fn send_message(
        &self,
        message: &str,
        character_id: &str,
        user_id: &str,
        actor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, NetworkError> {
        let mut request = ChatRequest::new(
            message.to_string(),
            character_id.to_string(),
            user_id.to_string(),
        );
        if let Some(actor) = actor {
            request = request.with_actor(actor.to_string());
        }
        self.send_chat(&request, cancel).await
    }
}
