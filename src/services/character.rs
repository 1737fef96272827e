use crate::core::errors::NetworkError;
use crate::core::kernel::{ApiRequest, RestClient};
use crate::core::types::{CharacterInfo, CreateCharacterRequest, UpdateCharacterRequest};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub const CHARACTER_ENDPOINT: &str = "character";

/// Character management endpoints
pub struct CharacterApi<R: RestClient> {
    rest: R,
}

impl<R: RestClient> CharacterApi<R> {
    pub fn new(rest: R) -> Self {
        Self { rest }
    }

    pub fn rest(&self) -> &R {
        &self.rest
    }

    fn item_endpoint(character_id: &str) -> String {
        format!("{}/{}", CHARACTER_ENDPOINT, character_id)
    }

    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<CharacterInfo>, NetworkError> {
        self.rest
            .send(ApiRequest::get(CHARACTER_ENDPOINT).with_cancellation(cancel.clone()))
            .await
    }

    pub async fn get(
        &self,
        character_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CharacterInfo, NetworkError> {
        self.rest
            .send(
                ApiRequest::get(&Self::item_endpoint(character_id))
                    .with_cancellation(cancel.clone()),
            )
            .await
    }

    #[instrument(skip(self, request, cancel), fields(name = %request.name))]
    pub async fn create(
        &self,
        request: &CreateCharacterRequest,
        cancel: &CancellationToken,
    ) -> Result<CharacterInfo, NetworkError> {
        let created: CharacterInfo = self
            .rest
            .send(
                ApiRequest::post(CHARACTER_ENDPOINT)
                    .with_json(request)?
                    .with_cancellation(cancel.clone()),
            )
            .await?;
        info!(id = %created.id, "Character created");
        Ok(created)
    }

    #[instrument(skip(self, request, cancel))]
    pub async fn update(
        &self,
        character_id: &str,
        request: &UpdateCharacterRequest,
        cancel: &CancellationToken,
    ) -> Result<CharacterInfo, NetworkError> {
        self.rest
            .send(
                ApiRequest::put(&Self::item_endpoint(character_id))
                    .with_json(request)?
                    .with_cancellation(cancel.clone()),
            )
            .await
    }

    /// Delete a character. Whatever the server returns in the body is ignored.
    #[instrument(skip(self, cancel))]
    pub async fn delete(&self, character_id: &str, cancel: &CancellationToken) -> Result<(), NetworkError> {
        self.rest
            .send_value(
                ApiRequest::delete(&Self::item_endpoint(character_id))
                    .with_cancellation(cancel.clone()),
            )
            .await?;
        info!("Character deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_endpoint() {
        assert_eq!(
            CharacterApi::<crate::core::kernel::RetryingClient>::item_endpoint("c1"),
            "character/c1"
        );
    }

    #[test]
    fn test_update_body_only_carries_set_fields() {
        let request = UpdateCharacterRequest {
            role: Some("guide".to_string()),
            is_active: Some(false),
            ..UpdateCharacterRequest::default()
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, serde_json::json!({"role": "guide", "isActive": false}));
    }
}
