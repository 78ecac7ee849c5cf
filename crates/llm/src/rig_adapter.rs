use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use rig::OneOrMany;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::http_client::{self, HttpClientExt};
use rig::message::{ImageMediaType, UserContent};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::image::{GeneratedImage, ImageProvider, ImageRequest};
use super::provider::{
    BoxFuture, CompletionsFailedSnafu, ContentBlock, DecodeImagePayloadSnafu,
    EmptyImagePayloadSnafu, EmptyMessageSetSnafu, EncodeImageRequestSnafu, HttpClientSnafu,
    ImagePayloadParseSnafu, ImageStatusSnafu, LlmProvider, MessageContent, MissingApiKeySnafu,
    ProviderConfig, ProviderError, ProviderMessage, ProviderResult, ProviderStreamHandle,
    ProviderWorker, Role, StreamEvent, StreamRequest, WriteArtifactSnafu, make_event_stream,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

/// Body of `POST /images/generations`.
#[derive(Debug, Serialize)]
struct ImageGenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    size: String,
    quality: &'static str,
    n: u32,
    response_format: &'static str,
}

impl<'a> ImageGenerationBody<'a> {
    fn from_request(request: &'a ImageRequest) -> Self {
        Self {
            model: &request.model_id,
            prompt: &request.prompt,
            size: request.size.to_string(),
            quality: request.quality.as_str(),
            n: request.count,
            response_format: "b64_json",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageGenerationPayload {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

pub struct RigProviderAdapter {
    config: ProviderConfig,
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        match (message.role, &message.content) {
            (Role::System, _) => None,
            (Role::User, MessageContent::Text(text)) => Some(RigMessage::user(text.clone())),
            (Role::User, MessageContent::Blocks(blocks)) => {
                let content = blocks.iter().map(Self::to_user_content).collect::<Vec<_>>();
                OneOrMany::many(content)
                    .ok()
                    .map(|content| RigMessage::User { content })
            }
            // Assistant turns are always text on the wire.
            (Role::Assistant, content) => Some(RigMessage::assistant(content.text())),
        }
    }

    fn to_user_content(block: &ContentBlock) -> UserContent {
        match block {
            ContentBlock::Text(text) => UserContent::text(text.clone()),
            ContentBlock::Image(url) => match split_data_url(url) {
                Some((mime, payload)) => {
                    UserContent::image_base64(payload, media_type_for_mime(mime), None)
                }
                None => UserContent::image_url(url.clone(), None, None),
            },
        }
    }

    fn merged_preamble(request: &StreamRequest) -> Option<String> {
        let mut preamble_parts = Vec::new();

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            preamble_parts.push(preamble.clone());
        }

        // Rig exposes a single preamble field, so system-role messages are folded into it.
        for message in &request.messages {
            if matches!(message.role, Role::System) {
                let text = message.content.text();
                if !text.trim().is_empty() {
                    preamble_parts.push(text);
                }
            }
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    async fn open_stream(
        config: &ProviderConfig,
        request: &StreamRequest,
    ) -> ProviderResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(request.model_id.clone());

        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        if messages.is_empty() {
            tracing::warn!(
                model_id = %request.model_id,
                total_message_count = request.messages.len(),
                "cannot open stream because no user/assistant messages remain after filtering"
            );
            return EmptyMessageSetSnafu {
                stage: "open-stream-filter-messages",
                model_id: request.model_id.clone(),
            }
            .fail();
        }

        let Some(prompt) = messages.pop() else {
            return EmptyMessageSetSnafu {
                stage: "open-stream-pop-prompt",
                model_id: request.model_id.clone(),
            }
            .fail();
        };
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(request) {
            builder = builder.preamble(preamble);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(event_tx: &mpsc::UnboundedSender<StreamEvent>, error: ProviderError) {
        let _ = event_tx.send(StreamEvent::Error(error.to_string()));
    }

    fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<StreamEvent>
    where
        R: Clone + Unpin,
    {
        let event = match item {
            StreamedAssistantContent::Text(text) => StreamEvent::Delta(text.text),
            StreamedAssistantContent::Reasoning(reasoning) => {
                let text = reasoning.reasoning.join("");
                if text.is_empty() {
                    return None;
                }
                StreamEvent::ReasoningDelta(text)
            }
            StreamedAssistantContent::ReasoningDelta { reasoning, .. } => {
                if reasoning.is_empty() {
                    return None;
                }
                StreamEvent::ReasoningDelta(reasoning)
            }
            StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => return None,
        };

        Some(event)
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut stream = match Self::open_stream(&config, &request).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    provider_id = %config.provider_id,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                Self::emit_error_event(&event_tx, error);
                return;
            }
        };

        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!(model_id = %request.model_id, "provider stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(event) = Self::map_stream_item(item)
                                && event_tx.send(event).is_err()
                            {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                model_id = %request.model_id,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            let _ = event_tx.send(StreamEvent::Done);
        }
    }

    async fn generate(&self, request: ImageRequest) -> ProviderResult<GeneratedImage> {
        let client = Self::build_client(&self.config)?;
        let body = serde_json::to_vec(&ImageGenerationBody::from_request(&request)).context(
            EncodeImageRequestSnafu {
                stage: "encode-image-request",
            },
        )?;

        tracing::info!(
            model_id = %request.model_id,
            size = %request.size,
            quality = request.quality.as_str(),
            count = request.count,
            "requesting image generation"
        );

        let http_request = client
            .post("/images/generations")
            .context(HttpClientSnafu {
                stage: "build-image-request",
            })?
            .header("Content-Type", "application/json")
            .body(body)
            .map_err(|source| ProviderError::BuildHttpRequestBody {
                stage: "build-image-request-body",
                message: source.to_string(),
            })?;

        let response = client.send(http_request).await.context(HttpClientSnafu {
            stage: "send-image-request",
        })?;
        let status = response.status();
        let payload = http_client::text(response).await.context(HttpClientSnafu {
            stage: "read-image-response",
        })?;

        if !status.is_success() {
            return ImageStatusSnafu {
                stage: "image-http-status",
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        let payload: ImageGenerationPayload =
            serde_json::from_str(&payload).context(ImagePayloadParseSnafu {
                stage: "parse-image-response",
            })?;

        match payload.data.into_iter().next() {
            Some(ImageDatum {
                b64_json: Some(encoded),
                ..
            }) if !encoded.is_empty() => {
                let bytes = BASE64
                    .decode(encoded.as_bytes())
                    .context(DecodeImagePayloadSnafu {
                        stage: "decode-image-payload",
                    })?;
                let path = self.write_artifact(&bytes).await?;
                Ok(GeneratedImage {
                    url: file_url(&path),
                })
            }
            Some(ImageDatum { url: Some(url), .. }) if !url.is_empty() => {
                Ok(GeneratedImage { url })
            }
            _ => EmptyImagePayloadSnafu {
                stage: "read-image-response",
                model_id: request.model_id.clone(),
            }
            .fail(),
        }
    }

    async fn write_artifact(&self, bytes: &[u8]) -> ProviderResult<std::path::PathBuf> {
        let directory = &self.config.artifact_dir;
        tokio::fs::create_dir_all(directory)
            .await
            .context(WriteArtifactSnafu {
                stage: "create-artifact-directory",
                path: directory.clone(),
            })?;

        let path = directory.join(format!("{}.png", Uuid::new_v4()));
        tokio::fs::write(&path, bytes)
            .await
            .context(WriteArtifactSnafu {
                stage: "write-artifact-file",
                path: path.clone(),
            })?;

        let path = tokio::fs::canonicalize(&path)
            .await
            .context(WriteArtifactSnafu {
                stage: "canonicalize-artifact-path",
                path: path.clone(),
            })?;

        tracing::info!(path = %path.display(), size_bytes = bytes.len(), "saved generated image");
        Ok(path)
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                model_id: request.model_id.clone(),
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

impl ImageProvider for RigProviderAdapter {
    fn generate_image<'a>(
        &'a self,
        request: ImageRequest,
    ) -> BoxFuture<'a, ProviderResult<GeneratedImage>> {
        Box::pin(self.generate(request))
    }
}

/// Splits `data:<mime>;base64,<payload>` into mime and payload.
fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, payload))
}

fn media_type_for_mime(mime: &str) -> Option<ImageMediaType> {
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => Some(ImageMediaType::PNG),
        "image/jpeg" | "image/jpg" => Some(ImageMediaType::JPEG),
        "image/gif" => Some(ImageMediaType::GIF),
        "image/webp" => Some(ImageMediaType::WEBP),
        _ => None,
    }
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
