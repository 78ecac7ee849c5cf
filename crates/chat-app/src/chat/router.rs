use std::sync::Arc;
use std::time::Duration;

use parley_llm::{
    DEFAULT_IMAGE_MODEL, ImageProvider, ImageRequest, LlmProvider, ProviderError,
    ProviderEventStream, ProviderStreamHandle, StreamEvent, StreamRequest,
};
use snafu::{ResultExt, Snafu};

use super::message::Message;
use super::routing::RoutingDecision;
use super::session::SessionState;

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);

/// Receives everything a turn wants shown to the user.
pub trait TurnRenderer {
    /// Progress notice such as "Generating image...".
    fn status(&mut self, text: &str);
    /// One streamed piece of the assistant reply.
    fn fragment(&mut self, text: &str);
    /// A generated image is ready at `url`.
    fn image(&mut self, url: &str);
    /// The turn failed; `notice` is display-only.
    fn failure(&mut self, notice: &str);
    /// The assistant message has been recorded.
    fn finish(&mut self) {}
}

/// Failure of one external generation call. Ends the turn, never the session.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GenerationError {
    #[snafu(display("failed to generate image: {source}"))]
    ImageRequest {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to start chat completion: {source}"))]
    ChatRequest {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("chat completion failed: {message}"))]
    ChatStream {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("chat completion ended before the reply was complete"))]
    StreamClosed { stage: &'static str },
    #[snafu(display("{branch} request timed out after {}s", timeout.as_secs_f32()))]
    TimedOut {
        stage: &'static str,
        branch: &'static str,
        timeout: Duration,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterOptions {
    pub image_model: String,
    pub system_prompt: Option<String>,
    /// Upper bound for one external call, covering the whole chat stream.
    pub turn_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            system_prompt: None,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }
}

/// Routes each user input to image generation or chat completion and records
/// the reply in the session transcript.
pub struct ConversationRouter {
    chat: Arc<dyn LlmProvider>,
    images: Arc<dyn ImageProvider>,
    options: RouterOptions,
}

impl ConversationRouter {
    pub fn new(
        chat: Arc<dyn LlmProvider>,
        images: Arc<dyn ImageProvider>,
        options: RouterOptions,
    ) -> Self {
        Self {
            chat,
            images,
            options,
        }
    }

    /// Runs one turn.
    ///
    /// The user message is appended first and stays in the transcript whatever
    /// happens next. On success exactly one assistant message is appended and
    /// returned; on failure the renderer gets a notice and nothing else is
    /// appended.
    pub async fn handle_input(
        &self,
        session: &mut SessionState,
        user_input: &str,
        renderer: &mut dyn TurnRenderer,
    ) -> Result<Message, GenerationError> {
        session.push_user_input(user_input);

        let decision = RoutingDecision::for_input(user_input);
        tracing::info!(
            route = decision.as_str(),
            transcript_len = session.transcript().len(),
            "routing user input"
        );

        let outcome = match decision {
            RoutingDecision::Image => self.generate_image(user_input, renderer).await,
            RoutingDecision::Chat => self.complete_chat(session, renderer).await,
        };

        match outcome {
            Ok(message) => {
                session.push_assistant(message.clone());
                renderer.finish();
                Ok(message)
            }
            Err(error) => {
                tracing::warn!(
                    route = decision.as_str(),
                    error = %error,
                    "turn failed; no assistant message recorded"
                );
                renderer.failure(&error.to_string());
                Err(error)
            }
        }
    }

    async fn generate_image(
        &self,
        prompt: &str,
        renderer: &mut dyn TurnRenderer,
    ) -> Result<Message, GenerationError> {
        renderer.status("Generating image...");

        let request = ImageRequest::new(self.options.image_model.clone(), prompt);
        let timeout = self.options.turn_timeout;
        let image = tokio::time::timeout(timeout, self.images.generate_image(request))
            .await
            .map_err(|_| GenerationError::TimedOut {
                stage: "image-timeout",
                branch: "image",
                timeout,
            })?
            .context(ImageRequestSnafu {
                stage: "generate-image",
            })?;

        renderer.image(&image.url);
        Ok(Message::image_reply(&image.url))
    }

    async fn complete_chat(
        &self,
        session: &SessionState,
        renderer: &mut dyn TurnRenderer,
    ) -> Result<Message, GenerationError> {
        let mut request = StreamRequest::new(
            session.chat_model(),
            session.transcript().to_provider_messages(),
        );
        if let Some(system_prompt) = &self.options.system_prompt {
            request = request.with_preamble(system_prompt.clone());
        }

        let ProviderStreamHandle { mut stream, worker } =
            self.chat.stream_chat(request).context(ChatRequestSnafu {
                stage: "open-chat-stream",
            })?;
        // The worker finishes on its own once it has sent a terminal event or
        // seen the cancel signal, so the join handle is not awaited.
        let _worker = tokio::spawn(worker);

        let timeout = self.options.turn_timeout;
        match tokio::time::timeout(timeout, collect_fragments(&mut stream, renderer)).await {
            Ok(text) => Ok(Message::assistant(text?)),
            Err(_) => {
                stream.cancel();
                TimedOutSnafu {
                    stage: "chat-timeout",
                    branch: "chat",
                    timeout,
                }
                .fail()
            }
        }
    }
}

/// Drains the stream in order, rendering each fragment, and returns the full
/// reply once the provider signals completion.
async fn collect_fragments(
    stream: &mut ProviderEventStream,
    renderer: &mut dyn TurnRenderer,
) -> Result<String, GenerationError> {
    let mut text = String::new();

    while let Some(event) = stream.recv().await {
        match event {
            StreamEvent::Delta(fragment) => {
                renderer.fragment(&fragment);
                text.push_str(&fragment);
            }
            StreamEvent::ReasoningDelta(reasoning) => {
                tracing::trace!(chars = reasoning.len(), "skipping reasoning fragment");
            }
            StreamEvent::Done => return Ok(text),
            StreamEvent::Error(message) => {
                return ChatStreamSnafu {
                    stage: "chat-stream-event",
                    message,
                }
                .fail();
            }
        }
    }

    StreamClosedSnafu {
        stage: "chat-stream-closed",
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::mpsc::UnboundedSender;

    use parley_llm::{
        BoxFuture, ContentBlock, GeneratedImage, ImageQuality, ImageSize, MessageContent,
        ProviderMessage, ProviderResult, ProviderWorker, Role as ProviderRole,
        UnavailableProvider, make_event_stream,
    };

    use super::*;
    use crate::chat::message::Role;
    use crate::chat::session::ImageAttachment;

    #[derive(Clone)]
    enum ChatScript {
        Reply(Vec<&'static str>),
        FailAfter(Vec<&'static str>, &'static str),
        CloseAfter(Vec<&'static str>),
        Hang,
    }

    struct ScriptedChat {
        script: ChatScript,
        requests: Mutex<Vec<StreamRequest>>,
        cancelled: Arc<AtomicBool>,
    }

    impl ScriptedChat {
        fn new(script: ChatScript) -> Arc<Self> {
            Arc::new(Self {
                script,
                requests: Mutex::new(Vec::new()),
                cancelled: Arc::new(AtomicBool::new(false)),
            })
        }

        fn requests(&self) -> Vec<StreamRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// Waits briefly for the worker to observe a cancel signal.
        async fn saw_cancel(&self) -> bool {
            for _ in 0..100 {
                if self.cancelled.load(Ordering::SeqCst) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            false
        }
    }

    impl LlmProvider for ScriptedChat {
        fn id(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted"
        }

        fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
            self.requests.lock().unwrap().push(request);

            let (event_tx, stream, cancel_rx) = make_event_stream();
            let script = self.script.clone();
            let cancelled = self.cancelled.clone();
            let worker: ProviderWorker = Box::pin(async move {
                match script {
                    ChatScript::Reply(fragments) => {
                        send_fragments(&event_tx, fragments);
                        let _ = event_tx.send(StreamEvent::Done);
                    }
                    ChatScript::FailAfter(fragments, message) => {
                        send_fragments(&event_tx, fragments);
                        let _ = event_tx.send(StreamEvent::Error(message.to_string()));
                    }
                    ChatScript::CloseAfter(fragments) => send_fragments(&event_tx, fragments),
                    ChatScript::Hang => {
                        let _keep_open = event_tx;
                        if cancel_rx.await.is_ok() {
                            cancelled.store(true, Ordering::SeqCst);
                        }
                    }
                }
            });

            Ok(ProviderStreamHandle { stream, worker })
        }
    }

    fn send_fragments(event_tx: &UnboundedSender<StreamEvent>, fragments: Vec<&'static str>) {
        for fragment in fragments {
            let _ = event_tx.send(StreamEvent::Delta(fragment.to_string()));
        }
    }

    struct ScriptedImages {
        url: Option<&'static str>,
        requests: Mutex<Vec<ImageRequest>>,
    }

    impl ScriptedImages {
        fn succeeding(url: &'static str) -> Arc<Self> {
            Arc::new(Self {
                url: Some(url),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                url: None,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ImageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ImageProvider for ScriptedImages {
        fn generate_image<'a>(
            &'a self,
            request: ImageRequest,
        ) -> BoxFuture<'a, ProviderResult<GeneratedImage>> {
            let model_id = request.model_id.clone();
            self.requests.lock().unwrap().push(request);
            Box::pin(async move {
                match self.url {
                    Some(url) => Ok(GeneratedImage {
                        url: url.to_string(),
                    }),
                    None => Err(ProviderError::EmptyImagePayload {
                        stage: "scripted",
                        model_id,
                    }),
                }
            })
        }
    }

    /// Image provider whose requests never complete.
    struct StalledImages;

    impl ImageProvider for StalledImages {
        fn generate_image<'a>(
            &'a self,
            _request: ImageRequest,
        ) -> BoxFuture<'a, ProviderResult<GeneratedImage>> {
            Box::pin(std::future::pending())
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        statuses: Vec<String>,
        fragments: Vec<String>,
        images: Vec<String>,
        failures: Vec<String>,
        finished: usize,
    }

    impl TurnRenderer for RecordingRenderer {
        fn status(&mut self, text: &str) {
            self.statuses.push(text.to_string());
        }

        fn fragment(&mut self, text: &str) {
            self.fragments.push(text.to_string());
        }

        fn image(&mut self, url: &str) {
            self.images.push(url.to_string());
        }

        fn failure(&mut self, notice: &str) {
            self.failures.push(notice.to_string());
        }

        fn finish(&mut self) {
            self.finished += 1;
        }
    }

    fn router(chat: Arc<ScriptedChat>, images: Arc<ScriptedImages>) -> ConversationRouter {
        ConversationRouter::new(chat, images, RouterOptions::default())
    }

    #[tokio::test]
    async fn draw_request_goes_to_image_generation_with_fixed_parameters() {
        let chat = ScriptedChat::new(ChatScript::Reply(vec!["unused"]));
        let images = ScriptedImages::succeeding("https://images.example/cat.png");
        let router = router(chat.clone(), images.clone());
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        let reply = router
            .handle_input(&mut session, "draw a cat", &mut renderer)
            .await
            .unwrap();

        let requests = images.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "draw a cat");
        assert_eq!(requests[0].model_id, DEFAULT_IMAGE_MODEL);
        assert_eq!(requests[0].size, ImageSize::SQUARE_1024);
        assert_eq!(requests[0].size.to_string(), "1024x1024");
        assert_eq!(requests[0].quality, ImageQuality::Standard);
        assert_eq!(requests[0].count, 1);
        assert!(chat.requests().is_empty());

        assert_eq!(reply, Message::image_reply("https://images.example/cat.png"));
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript().messages()[0], Message::user("draw a cat"));
        assert_eq!(session.transcript().last(), Some(&reply));
        assert_eq!(renderer.statuses, vec!["Generating image..."]);
        assert_eq!(renderer.images, vec!["https://images.example/cat.png"]);
        assert_eq!(renderer.finished, 1);
    }

    #[tokio::test]
    async fn question_goes_to_chat_with_full_transcript() {
        let chat = ScriptedChat::new(ChatScript::Reply(vec!["Paris", " is", " the capital."]));
        let images = ScriptedImages::succeeding("unused");
        let router = router(chat.clone(), images.clone());
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        router
            .handle_input(&mut session, "Hi there", &mut renderer)
            .await
            .unwrap();
        let reply = router
            .handle_input(&mut session, "What is the capital of France?", &mut renderer)
            .await
            .unwrap();

        assert!(images.requests().is_empty());
        let requests = chat.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].model_id, "gpt-4o");
        assert_eq!(
            requests[1].messages,
            vec![
                ProviderMessage::new(ProviderRole::User, "Hi there"),
                ProviderMessage::new(ProviderRole::Assistant, "Paris is the capital."),
                ProviderMessage::new(ProviderRole::User, "What is the capital of France?"),
            ]
        );

        assert_eq!(reply, Message::assistant("Paris is the capital."));
        assert_eq!(session.transcript().len(), 4);
        assert_eq!(renderer.fragments.len(), 6);
        assert_eq!(renderer.fragments[3..].concat(), "Paris is the capital.");
    }

    #[tokio::test]
    async fn image_failure_leaves_only_the_user_message() {
        let chat = ScriptedChat::new(ChatScript::Reply(vec!["unused"]));
        let router = router(chat, ScriptedImages::failing());
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        let error = router
            .handle_input(&mut session, "Create an image of a fox", &mut renderer)
            .await
            .unwrap_err();

        assert!(matches!(error, GenerationError::ImageRequest { .. }));
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(
            session.transcript().last(),
            Some(&Message::user("Create an image of a fox"))
        );
        assert_eq!(renderer.failures.len(), 1);
        assert!(renderer.failures[0].starts_with("failed to generate image:"));
        assert_eq!(renderer.finished, 0);
    }

    #[tokio::test]
    async fn chat_error_event_records_no_assistant_message() {
        let chat = ScriptedChat::new(ChatScript::FailAfter(vec!["Par"], "rate limited"));
        let router = router(chat, ScriptedImages::succeeding("unused"));
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        let error = router
            .handle_input(&mut session, "What is the capital of France?", &mut renderer)
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "chat completion failed: rate limited");
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(renderer.fragments, vec!["Par"]);
        assert_eq!(renderer.failures, vec!["chat completion failed: rate limited"]);
    }

    #[tokio::test]
    async fn stream_closing_without_done_is_a_failure() {
        let chat = ScriptedChat::new(ChatScript::CloseAfter(vec!["half"]));
        let router = router(chat, ScriptedImages::succeeding("unused"));
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        let error = router
            .handle_input(&mut session, "tell me a story", &mut renderer)
            .await
            .unwrap_err();

        assert!(matches!(error, GenerationError::StreamClosed { .. }));
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test]
    async fn hung_stream_times_out_and_is_cancelled() {
        let chat = ScriptedChat::new(ChatScript::Hang);
        let router = ConversationRouter::new(
            chat.clone(),
            ScriptedImages::succeeding("unused"),
            RouterOptions {
                turn_timeout: Duration::from_millis(20),
                ..RouterOptions::default()
            },
        );
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        let error = router
            .handle_input(&mut session, "hello?", &mut renderer)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            GenerationError::TimedOut { branch: "chat", .. }
        ));
        assert_eq!(session.transcript().len(), 1);
        assert!(chat.saw_cancel().await);
    }

    #[tokio::test]
    async fn stalled_image_request_times_out() {
        let chat = ScriptedChat::new(ChatScript::Reply(vec!["unused"]));
        let router = ConversationRouter::new(
            chat.clone(),
            Arc::new(StalledImages),
            RouterOptions {
                turn_timeout: Duration::from_millis(20),
                ..RouterOptions::default()
            },
        );
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        let error = router
            .handle_input(&mut session, "draw a lighthouse", &mut renderer)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            GenerationError::TimedOut { branch: "image", .. }
        ));
        assert_eq!(
            session.transcript().messages(),
            &[Message::user("draw a lighthouse")]
        );
        assert_eq!(renderer.statuses, vec!["Generating image..."]);
        assert_eq!(renderer.failures, vec!["image request timed out after 0.02s"]);
        assert!(renderer.images.is_empty());
        assert!(chat.requests().is_empty());
    }

    #[tokio::test]
    async fn failures_do_not_end_the_session() {
        let unavailable = Arc::new(UnavailableProvider::new("openai"));
        let router = ConversationRouter::new(
            unavailable.clone(),
            unavailable,
            RouterOptions::default(),
        );
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        let chat_error = router
            .handle_input(&mut session, "hello", &mut renderer)
            .await
            .unwrap_err();
        let image_error = router
            .handle_input(&mut session, "visualize a storm", &mut renderer)
            .await
            .unwrap_err();

        assert!(matches!(chat_error, GenerationError::ChatRequest { .. }));
        assert!(matches!(image_error, GenerationError::ImageRequest { .. }));
        assert_eq!(session.transcript().len(), 2);
        assert!(
            session
                .transcript()
                .messages()
                .iter()
                .all(|message| message.role == Role::User)
        );
        assert_eq!(renderer.failures.len(), 2);
    }

    #[tokio::test]
    async fn uploaded_image_rides_along_with_chat_request() {
        let chat = ScriptedChat::new(ChatScript::Reply(vec!["A tabby cat."]));
        let router = router(chat.clone(), ScriptedImages::succeeding("unused"));
        let mut session = SessionState::new("gpt-4o");
        session.attach_image(ImageAttachment {
            file_name: "cat.jpg".to_string(),
            media_type: "image/jpeg",
            data_url: "data:image/jpeg;base64,/9j/AAAA".to_string(),
        });
        let mut renderer = RecordingRenderer::default();

        router
            .handle_input(&mut session, "What is in this photo?", &mut renderer)
            .await
            .unwrap();

        let requests = chat.requests();
        assert_eq!(
            requests[0].messages[0].content,
            MessageContent::Blocks(vec![
                ContentBlock::Text("What is in this photo?".to_string()),
                ContentBlock::Image("data:image/jpeg;base64,/9j/AAAA".to_string()),
            ])
        );
        assert!(session.pending_image().is_none());
    }

    #[tokio::test]
    async fn system_prompt_is_sent_as_preamble_but_not_recorded() {
        let chat = ScriptedChat::new(ChatScript::Reply(vec!["ok"]));
        let router = ConversationRouter::new(
            chat.clone(),
            ScriptedImages::succeeding("unused"),
            RouterOptions {
                system_prompt: Some("Answer in one sentence.".to_string()),
                ..RouterOptions::default()
            },
        );
        let mut session = SessionState::new("gpt-4o");
        let mut renderer = RecordingRenderer::default();

        router
            .handle_input(&mut session, "why is the sky blue", &mut renderer)
            .await
            .unwrap();

        assert_eq!(
            chat.requests()[0].preamble.as_deref(),
            Some("Answer in one sentence.")
        );
        assert_eq!(session.transcript().len(), 2);
    }
}
