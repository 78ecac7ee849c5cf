use super::message::{Message, Transcript};

/// Image uploaded by the user, waiting to ride along with the next prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub file_name: String,
    pub media_type: &'static str,
    pub data_url: String,
}

/// Everything one chat session owns. Created empty when the session starts and
/// dropped when it ends; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    transcript: Transcript,
    chat_model: String,
    pending_image: Option<ImageAttachment>,
}

impl SessionState {
    pub fn new(chat_model: impl Into<String>) -> Self {
        Self {
            transcript: Transcript::new(),
            chat_model: chat_model.into(),
            pending_image: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn set_chat_model(&mut self, model_id: impl Into<String>) {
        self.chat_model = model_id.into();
    }

    pub fn pending_image(&self) -> Option<&ImageAttachment> {
        self.pending_image.as_ref()
    }

    /// Replaces any earlier pending attachment.
    pub fn attach_image(&mut self, attachment: ImageAttachment) {
        self.pending_image = Some(attachment);
    }

    /// Records the user turn, folding in a pending attachment if one exists.
    pub(crate) fn push_user_input(&mut self, user_input: &str) -> &Message {
        let message = match self.pending_image.take() {
            Some(attachment) => Message::user_with_image(user_input, attachment.data_url),
            None => Message::user(user_input),
        };
        self.transcript.push(message);
        &self.transcript.messages()[self.transcript.len() - 1]
    }

    pub(crate) fn push_assistant(&mut self, message: Message) {
        self.transcript.push(message);
    }
}
