use std::io::Write;

use parley_llm::{
    ProviderError, ProviderPair, create_provider, default_openai_models, unavailable_provider,
};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::chat::{ConversationRouter, SessionState};
use crate::settings::{AppSettings, ConfigurationError};
use crate::terminal::{Command, HELP_TEXT, TerminalRenderer, parse_command};
use crate::upload::load_image_attachment;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("configuration error on `{stage}`: {source}"))]
    Configuration {
        stage: &'static str,
        source: ConfigurationError,
    },
    #[snafu(display("failed to create provider on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// Whether the input loop keeps going after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// Resolves the credential and builds the provider pair for `settings`.
///
/// With `warn_and_continue` and no credential, the returned pair fails every
/// request instead of refusing to start.
pub fn build_providers(
    settings: &AppSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ProviderPair, AppError> {
    let credential = settings
        .require_credential(lookup)
        .context(ConfigurationSnafu {
            stage: "require-credential",
        })?;

    match credential {
        Some(api_key) => create_provider(settings.to_provider_config(&api_key)).context(
            ProviderSnafu {
                stage: "create-provider",
            },
        ),
        None => Ok(unavailable_provider(settings.provider_id.clone())),
    }
}

/// Terminal chat host: owns the settings, the router and the live session.
pub struct ChatApp {
    settings: AppSettings,
    router: ConversationRouter,
    session: SessionState,
}

impl ChatApp {
    pub fn new(settings: AppSettings, providers: ProviderPair) -> Self {
        let router =
            ConversationRouter::new(providers.chat, providers.images, settings.router_options());
        let session = SessionState::new(settings.chat_model.clone());
        Self {
            settings,
            router,
            session,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Reads lines until end of input or `/quit`.
    pub async fn run<R, W>(&mut self, input: R, output: W) -> Result<(), AppError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut renderer = TerminalRenderer::new(output);
        renderer.notice(&format!(
            "parley: chatting with {} (type /help for commands)",
            self.session.chat_model()
        ));

        let mut lines = input.lines();
        loop {
            renderer.input_prompt();
            let Some(line) = lines.next_line().await.context(ReadInputSnafu {
                stage: "read-line",
            })?
            else {
                renderer.notice("");
                break;
            };

            if self.handle_line(&line, &mut renderer).await == LoopControl::Exit {
                break;
            }
        }

        tracing::info!(
            transcript_len = self.session.transcript().len(),
            "session ended"
        );
        Ok(())
    }

    pub async fn handle_line<W: Write>(
        &mut self,
        line: &str,
        renderer: &mut TerminalRenderer<W>,
    ) -> LoopControl {
        match parse_command(line) {
            Command::Empty => {}
            Command::Prompt(text) => {
                // Failures were already shown by the renderer and logged by the router.
                if let Err(error) = self
                    .router
                    .handle_input(&mut self.session, &text, renderer)
                    .await
                {
                    tracing::debug!(error = %error, "turn ended without a reply");
                }
            }
            Command::Upload(path) => {
                match load_image_attachment(&path, self.settings.support_image_upload).await {
                    Ok(attachment) => {
                        renderer.notice(&format!(
                            "attached {} ({}); it will be sent with your next message",
                            attachment.file_name, attachment.media_type
                        ));
                        self.session.attach_image(attachment);
                    }
                    Err(error) => renderer.notice(&format!("error: {error}")),
                }
            }
            Command::Model(None) => {
                let current = self.session.chat_model();
                let mut listing = format!("current model: {current}\nknown models:");
                for model in default_openai_models() {
                    let marker = if model.id == current { '*' } else { ' ' };
                    listing.push_str(&format!("\n {marker} {}", model.name));
                    if let Some(description) = &model.description {
                        listing.push_str(&format!(" - {description}"));
                    }
                }
                renderer.notice(&listing);
            }
            Command::Model(Some(model_id)) => {
                tracing::info!(model_id = %model_id, "switching chat model");
                self.session.set_chat_model(model_id);
                renderer.notice(&format!("chat model set to {}", self.session.chat_model()));
            }
            Command::History => {
                if self.session.transcript().is_empty() {
                    renderer.notice("(no messages yet)");
                }
                for message in self.session.transcript().messages() {
                    renderer.message(message);
                }
            }
            Command::New => {
                self.session = SessionState::new(self.settings.chat_model.clone());
                renderer.notice("started a new session");
            }
            Command::Help => renderer.notice(HELP_TEXT),
            Command::Quit => return LoopControl::Exit,
            Command::Unknown(name) => {
                renderer.notice(&format!(
                    "error: unknown command or missing argument: /{name} (type /help)"
                ));
            }
        }

        LoopControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_llm::{
        ImageProvider, LlmProvider, ProviderResult, ProviderStreamHandle, ProviderWorker,
        StreamEvent, StreamRequest, UnavailableProvider, make_event_stream,
    };

    use super::*;
    use crate::chat::{Message, Role};
    use crate::settings::OnMissingCredential;

    /// Replies with the last user message's text, split in two fragments.
    struct EchoChat;

    impl LlmProvider for EchoChat {
        fn id(&self) -> &str {
            "echo"
        }

        fn name(&self) -> &str {
            "Echo"
        }

        fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
            let last = request
                .messages
                .last()
                .map(|message| message.content.text())
                .unwrap_or_default();
            let (event_tx, stream, _cancel_rx) = make_event_stream();
            let worker: ProviderWorker = Box::pin(async move {
                let _ = event_tx.send(StreamEvent::Delta("echo: ".to_string()));
                let _ = event_tx.send(StreamEvent::Delta(last));
                let _ = event_tx.send(StreamEvent::Done);
            });
            Ok(ProviderStreamHandle { stream, worker })
        }
    }

    fn echo_app(settings: AppSettings) -> ChatApp {
        let images: Arc<dyn ImageProvider> = Arc::new(UnavailableProvider::new("openai"));
        ChatApp::new(
            settings,
            ProviderPair {
                chat: Arc::new(EchoChat),
                images,
            },
        )
    }

    async fn run_script(app: &mut ChatApp, script: &str) -> String {
        let mut output = Vec::new();
        app.run(script.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test]
    async fn prompts_stream_replies_and_quit_stops_reading() {
        let mut app = echo_app(AppSettings::default());
        let output = run_script(&mut app, "hello\n/quit\nnever read\n").await;

        assert!(output.contains("assistant> echo: hello\n"));
        assert_eq!(app.session().transcript().len(), 2);
        assert_eq!(
            app.session().transcript().last(),
            Some(&Message::assistant("echo: hello"))
        );
    }

    #[tokio::test]
    async fn image_failure_is_shown_and_session_continues() {
        let mut app = echo_app(AppSettings::default());
        let output = run_script(&mut app, "draw a cat\nstill there?\n").await;

        assert!(output.contains("assistant> Generating image...\n"));
        assert!(output.contains("error: failed to generate image: missing API key"));
        assert!(output.contains("assistant> echo: still there?\n"));
        let roles = app
            .session()
            .transcript()
            .messages()
            .iter()
            .map(|message| message.role)
            .collect::<Vec<_>>();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn upload_respects_the_settings_flag() {
        let mut app = echo_app(AppSettings {
            support_image_upload: false,
            ..AppSettings::default()
        });
        let output = run_script(&mut app, "/upload cat.png\n").await;

        assert!(output.contains("error: image upload is disabled"));
        assert!(app.session().pending_image().is_none());
    }

    #[tokio::test]
    async fn uploaded_image_is_attached_to_next_prompt() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("cat.png");
        std::fs::write(&path, b"png").unwrap();

        let mut app = echo_app(AppSettings::default());
        let script = format!("/upload {}\nwhat is this?\n", path.display());
        let output = run_script(&mut app, &script).await;

        assert!(output.contains("attached cat.png (image/png)"));
        assert_eq!(
            app.session().transcript().messages()[0],
            Message::user_with_image("what is this?", "data:image/png;base64,cG5n")
        );
    }

    #[tokio::test]
    async fn new_session_discards_transcript_and_model_choice() {
        let mut app = echo_app(AppSettings::default());
        run_script(&mut app, "/model gpt-4o-mini\nhello\n/new\n").await;

        assert!(app.session().transcript().is_empty());
        assert_eq!(app.session().chat_model(), "gpt-4o");
    }

    #[tokio::test]
    async fn model_switch_applies_to_following_turns() {
        let mut app = echo_app(AppSettings::default());
        let output = run_script(&mut app, "/model o3\n/model\n").await;

        assert!(output.contains("chat model set to o3"));
        assert!(output.contains("current model: o3"));
    }

    #[tokio::test]
    async fn model_listing_shows_catalog_descriptions() {
        let mut app = echo_app(AppSettings::default());
        let output = run_script(&mut app, "/model\n").await;

        assert!(output.contains("current model: gpt-4o\n"));
        assert!(output.contains(" * gpt-4o - High quality general model"));
        assert!(output.contains("   gpt-4o-mini - Balanced cost/performance"));
    }

    #[test]
    fn missing_credential_halts_provider_construction() {
        let result = build_providers(&AppSettings::default(), |_| None);
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[tokio::test]
    async fn warn_policy_serves_with_failing_provider() {
        let settings = AppSettings {
            on_missing_credential: OnMissingCredential::WarnAndContinue,
            ..AppSettings::default()
        };
        let providers = build_providers(&settings, |_| None).unwrap();
        assert_eq!(providers.chat.name(), "Unavailable");

        let mut app = ChatApp::new(settings, providers);
        let output = run_script(&mut app, "hello\n").await;
        assert!(output.contains("error: failed to start chat completion: missing API key"));
        assert_eq!(app.session().transcript().len(), 1);
    }

    #[test]
    fn credential_from_environment_builds_openai_provider() {
        let providers = build_providers(&AppSettings::default(), |_| {
            Some("sk-test".to_string())
        })
        .unwrap();
        assert_eq!(providers.chat.id(), "openai");
    }
}
