use std::fmt;

use super::provider::{BoxFuture, ProviderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const SQUARE_1024: Self = Self {
        width: 1024,
        height: 1024,
    };
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageQuality {
    #[default]
    Standard,
}

impl ImageQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub model_id: String,
    pub prompt: String,
    pub size: ImageSize,
    pub quality: ImageQuality,
    pub count: u32,
}

impl ImageRequest {
    /// One standard-quality 1024x1024 image.
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            size: ImageSize::SQUARE_1024,
            quality: ImageQuality::Standard,
            count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// Where the image can be viewed: a remote URL or a `file://` URL.
    pub url: String,
}

pub trait ImageProvider: Send + Sync {
    fn generate_image<'a>(
        &'a self,
        request: ImageRequest,
    ) -> BoxFuture<'a, ProviderResult<GeneratedImage>>;
}
