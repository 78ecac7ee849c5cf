/// Domain entities: messages and the append-only transcript.
pub mod message;
/// Keyword routing between image generation and chat.
pub mod routing;
pub mod router;
pub mod session;

pub use message::{Block, Content, Message, Role, Transcript};
pub use router::{
    ConversationRouter, DEFAULT_TURN_TIMEOUT, GenerationError, RouterOptions, TurnRenderer,
};
pub use routing::{IMAGE_KEYWORDS, RoutingDecision};
pub use session::{ImageAttachment, SessionState};
