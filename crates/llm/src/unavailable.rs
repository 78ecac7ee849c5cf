use super::image::{GeneratedImage, ImageProvider, ImageRequest};
use super::provider::{
    BoxFuture, LlmProvider, MissingApiKeySnafu, ProviderResult, ProviderStreamHandle,
    StreamRequest,
};

/// Stand-in used when the app keeps serving without a credential.
///
/// Every call fails with `MissingApiKey`, which callers surface per turn.
#[derive(Debug, Clone)]
pub struct UnavailableProvider {
    provider_id: String,
}

impl UnavailableProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
        }
    }
}

impl LlmProvider for UnavailableProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    fn name(&self) -> &str {
        "Unavailable"
    }

    fn stream_chat(&self, _request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        MissingApiKeySnafu {
            stage: "unavailable-stream-chat",
            provider_id: self.provider_id.clone(),
        }
        .fail()
    }
}

impl ImageProvider for UnavailableProvider {
    fn generate_image<'a>(
        &'a self,
        _request: ImageRequest,
    ) -> BoxFuture<'a, ProviderResult<GeneratedImage>> {
        Box::pin(async move {
            MissingApiKeySnafu {
                stage: "unavailable-generate-image",
                provider_id: self.provider_id.clone(),
            }
            .fail()
        })
    }
}
