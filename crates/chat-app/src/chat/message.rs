use parley_llm::{ContentBlock, MessageContent, ProviderMessage, Role as ProviderRole};

/// Chat speaker role. Transcripts never carry system turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One piece of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text { text: String },
    /// Remote URL, `file://` URL or embedded `data:` URL.
    Image { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Multimodal(Vec<Block>),
}

/// Core immutable message model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
        }
    }

    /// User turn carrying text followed by one image.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Multimodal(vec![
                Block::Text { text: text.into() },
                Block::Image {
                    url: image_url.into(),
                },
            ]),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
        }
    }

    /// Assistant reply that links a generated image.
    pub fn image_reply(image_url: &str) -> Self {
        Self::assistant(format!(
            "Here is your image:\n\n![Generated Image]({image_url})"
        ))
    }

    fn to_provider_message(&self) -> ProviderMessage {
        let role = match self.role {
            Role::User => ProviderRole::User,
            Role::Assistant => ProviderRole::Assistant,
        };

        match &self.content {
            Content::Text(text) => ProviderMessage::new(role, text.clone()),
            Content::Multimodal(blocks) => ProviderMessage::with_blocks(
                role,
                blocks
                    .iter()
                    .map(|block| match block {
                        Block::Text { text } => ContentBlock::Text(text.clone()),
                        Block::Image { url } => ContentBlock::Image(url.clone()),
                    })
                    .collect(),
            ),
        }
    }

    /// Plain text view used for display; images render as their URL.
    pub fn display_text(&self) -> String {
        match &self.content {
            Content::Text(text) => text.clone(),
            Content::Multimodal(blocks) => blocks
                .iter()
                .map(|block| match block {
                    Block::Text { text } => text.clone(),
                    Block::Image { url } => format!("[image: {}]", abbreviate_url(url)),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Ordered, append-only conversation history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Role/content pairs in chronological order, multimodal blocks unchanged.
    pub fn to_provider_messages(&self) -> Vec<ProviderMessage> {
        self.messages
            .iter()
            .map(Message::to_provider_message)
            .collect()
    }
}

// Embedded data URLs are long; only show the media type.
fn abbreviate_url(url: &str) -> &str {
    if let Some(rest) = url.strip_prefix("data:") {
        return rest.split(';').next().unwrap_or("data");
    }
    url
}
