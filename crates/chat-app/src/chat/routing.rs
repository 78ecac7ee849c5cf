/// Phrases that send a prompt to image generation instead of chat.
pub const IMAGE_KEYWORDS: [&str; 6] = [
    "generate an image",
    "draw",
    "create an image",
    "image of",
    "picture of",
    "visualize",
];

/// Which generation capability handles one user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingDecision {
    Image,
    Chat,
}

impl RoutingDecision {
    /// `Image` iff the lowercased input contains any keyword as a substring.
    ///
    /// Matching is plain substring search, so "withdraw" routes to
    /// images just like "draw".
    pub fn for_input(input: &str) -> Self {
        let lowered = input.to_lowercase();
        if IMAGE_KEYWORDS
            .iter()
            .any(|keyword| lowered.contains(keyword))
        {
            Self::Image
        } else {
            Self::Chat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Chat => "chat",
        }
    }
}
