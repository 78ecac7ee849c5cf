use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use snafu::{ResultExt, Snafu, ensure};

use crate::chat::ImageAttachment;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UploadError {
    #[snafu(display("image upload is disabled"))]
    UploadDisabled { stage: &'static str },
    #[snafu(display("unsupported image type for {path:?}; use png, jpg, jpeg, gif or webp"))]
    UnsupportedFormat { stage: &'static str, path: PathBuf },
    #[snafu(display("failed to read image at {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub fn to_data_url(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{media_type};base64,{}", BASE64.encode(bytes))
}

/// Reads an image file and encodes it as an attachment for the next prompt.
pub async fn load_image_attachment(
    path: &Path,
    enabled: bool,
) -> Result<ImageAttachment, UploadError> {
    ensure!(
        enabled,
        UploadDisabledSnafu {
            stage: "check-upload-enabled"
        }
    );

    let Some(media_type) = mime_for_path(path) else {
        return UnsupportedFormatSnafu {
            stage: "detect-media-type",
            path: path.to_path_buf(),
        }
        .fail();
    };

    let bytes = tokio::fs::read(path).await.context(ReadFileSnafu {
        stage: "read-upload",
        path: path.to_path_buf(),
    })?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    tracing::info!(
        file_name = %file_name,
        media_type,
        size_bytes = bytes.len(),
        "attached image for next prompt"
    );

    Ok(ImageAttachment {
        file_name,
        media_type,
        data_url: to_data_url(media_type, &bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_follows_extension_case_insensitively() {
        assert_eq!(mime_for_path(Path::new("cat.PNG")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("a/b/photo.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("photo.jpg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("no_extension")), None);
    }

    #[test]
    fn data_url_is_base64_encoded() {
        assert_eq!(to_data_url("image/png", b"png"), "data:image/png;base64,cG5n");
    }

    #[tokio::test]
    async fn uploaded_file_becomes_data_url_attachment() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("pixel.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let attachment = load_image_attachment(&path, true).await.unwrap();
        assert_eq!(attachment.file_name, "pixel.png");
        assert_eq!(attachment.media_type, "image/png");
        assert_eq!(attachment.data_url, "data:image/png;base64,iVBORw==");
    }

    #[tokio::test]
    async fn disabled_upload_is_rejected_before_reading() {
        let error = load_image_attachment(Path::new("does-not-exist.png"), false)
            .await
            .unwrap_err();
        assert!(matches!(error, UploadError::UploadDisabled { .. }));
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let error = load_image_attachment(Path::new("document.pdf"), true)
            .await
            .unwrap_err();
        assert!(matches!(error, UploadError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn missing_file_reports_read_error() {
        let directory = tempfile::tempdir().unwrap();
        let error = load_image_attachment(&directory.path().join("gone.png"), true)
            .await
            .unwrap_err();
        assert!(matches!(error, UploadError::ReadFile { .. }));
    }
}
