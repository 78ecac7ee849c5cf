use std::sync::Arc;

mod image;
mod model;
mod provider;
mod rig_adapter;
mod unavailable;

pub use image::{GeneratedImage, ImageProvider, ImageQuality, ImageRequest, ImageSize};
pub use model::{DEFAULT_IMAGE_MODEL, DEFAULT_OPENAI_MODEL, Model, default_openai_models};
pub use provider::{
    BoxFuture, ContentBlock, LlmProvider, MessageContent, ProviderConfig, ProviderError,
    ProviderEventStream, ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker,
    Role, StreamEvent, StreamRequest, make_event_stream,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};
pub use unavailable::UnavailableProvider;

/// Chat and image capabilities backed by one provider.
#[derive(Clone)]
pub struct ProviderPair {
    pub chat: Arc<dyn LlmProvider>,
    pub images: Arc<dyn ImageProvider>,
}

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<ProviderPair> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            let adapter = Arc::new(RigProviderAdapter::new(config)?);
            Ok(ProviderPair {
                chat: adapter.clone(),
                images: adapter,
            })
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

/// Provider pair that fails every call; used when serving without a credential.
pub fn unavailable_provider(provider_id: impl Into<String>) -> ProviderPair {
    let provider = Arc::new(UnavailableProvider::new(provider_id));
    ProviderPair {
        chat: provider.clone(),
        images: provider,
    }
}
