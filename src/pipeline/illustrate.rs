//! Illustration: one generated image per story page.
//!
//! Illustration is best-effort. Every failure mode (no endpoint configured,
//! HTTP error, undecodable payload, timeout) is an [`IllustrationError`],
//! which the driver absorbs into an empty `image_path` on the page.
//!
//! Pages are illustrated one at a time; the image service is assumed to run
//! a single model instance.

use crate::config::ForgeConfig;
use crate::error::IllustrationError;
use crate::prompts::{compose_image_prompt, IMAGE_NEGATIVE_PROMPT};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Collaborator that renders a prompt into an image file.
#[async_trait]
pub trait Illustrator: Send + Sync {
    async fn illustrate(&self, prompt: &str) -> Result<PathBuf, IllustrationError>;
}

/// Illustrate stage for one page: compose the prompt and bound the call.
pub async fn illustrate_page(
    illustrator: &dyn Illustrator,
    theme: &str,
    age_group: &str,
    page_prompt: &str,
    limit: Duration,
) -> Result<PathBuf, IllustrationError> {
    let prompt = compose_image_prompt(theme, age_group, page_prompt);
    match tokio::time::timeout(limit, illustrator.illustrate(&prompt)).await {
        Ok(result) => result,
        Err(_) => Err(IllustrationError::Timeout { limit }),
    }
}

// ── HTTP txt2img implementation ──────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    steps: u32,
    cfg_scale: f32,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// [`Illustrator`] that calls an Automatic1111-compatible `txt2img` endpoint.
///
/// The first returned image is decoded and written as PNG to
/// `images_dir/{uuid}.png`. Without an endpoint every call fails with
/// [`IllustrationError::NotConfigured`].
#[derive(Debug, Clone)]
pub struct HttpIllustrator {
    client: reqwest::Client,
    endpoint: Option<String>,
    images_dir: PathBuf,
    steps: u32,
    size: u32,
}

impl HttpIllustrator {
    pub fn from_config(config: &ForgeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.image_endpoint.clone(),
            images_dir: config.images_dir.clone(),
            steps: config.image_steps,
            size: config.image_size,
        }
    }

    async fn request(&self, endpoint: &str, prompt: &str) -> Result<Vec<u8>, IllustrationError> {
        let body = Txt2ImgRequest {
            prompt,
            negative_prompt: IMAGE_NEGATIVE_PROMPT,
            steps: self.steps,
            // turbo models are trained without classifier-free guidance
            cfg_scale: 0.0,
            width: self.size,
            height: self.size,
        };

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| IllustrationError::Failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IllustrationError::Failed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: Txt2ImgResponse = response
            .json()
            .await
            .map_err(|e| IllustrationError::Failed(format!("bad response body: {e}")))?;
        let first = payload
            .images
            .into_iter()
            .next()
            .ok_or_else(|| IllustrationError::Failed("response contained no images".into()))?;
        decode_image_payload(&first)
    }
}

/// Decode a base64 image, tolerating a `data:image/...;base64,` prefix.
pub fn decode_image_payload(b64: &str) -> Result<Vec<u8>, IllustrationError> {
    let data = match b64.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => b64,
    };
    STANDARD
        .decode(data.trim())
        .map_err(|e| IllustrationError::Failed(format!("invalid base64 image: {e}")))
}

/// Re-encode arbitrary image bytes as PNG at `path`.
fn save_png(bytes: &[u8], path: &Path) -> Result<(), IllustrationError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| IllustrationError::Failed(format!("undecodable image: {e}")))?;
    img.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| IllustrationError::Failed(format!("cannot write '{}': {e}", path.display())))
}

#[async_trait]
impl Illustrator for HttpIllustrator {
    async fn illustrate(&self, prompt: &str) -> Result<PathBuf, IllustrationError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(IllustrationError::NotConfigured)?;
        let bytes = self.request(endpoint, prompt).await?;

        let path = self
            .images_dir
            .join(format!("{}.png", uuid::Uuid::new_v4()));
        let target = path.clone();
        tokio::task::spawn_blocking(move || save_png(&bytes, &target))
            .await
            .map_err(|e| IllustrationError::Failed(format!("image task panicked: {e}")))??;

        debug!(path = %path.display(), "Illustration saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    struct Stalled;

    #[async_trait]
    impl Illustrator for Stalled {
        async fn illustrate(&self, _prompt: &str) -> Result<PathBuf, IllustrationError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(PathBuf::from("never.png"))
        }
    }

    struct Echo;

    #[async_trait]
    impl Illustrator for Echo {
        async fn illustrate(&self, prompt: &str) -> Result<PathBuf, IllustrationError> {
            Ok(PathBuf::from(prompt))
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([10, 200, 30])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn unconfigured_endpoint_is_not_configured() {
        let config = ForgeConfig::default();
        let err = HttpIllustrator::from_config(&config)
            .illustrate("a cat")
            .await
            .unwrap_err();
        assert!(matches!(err, IllustrationError::NotConfigured));
    }

    #[tokio::test]
    async fn stalled_illustrator_times_out() {
        let err = illustrate_page(&Stalled, "t", "6-8", "p", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, IllustrationError::Timeout { .. }));
    }

    #[tokio::test]
    async fn page_prompt_is_composed() {
        let path = illustrate_page(&Echo, "Courage", "3-5", "a lion", Duration::from_secs(1))
            .await
            .unwrap();
        let prompt = path.to_string_lossy().to_string();
        assert!(prompt.starts_with("children's book illustration, simple shapes"));
        assert!(prompt.contains("Courage, a lion"));
    }

    #[test]
    fn decode_accepts_data_uri() {
        let raw = png_bytes();
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(&raw));
        assert_eq!(decode_image_payload(&uri).unwrap(), raw);
        assert!(decode_image_payload("not base64!!").is_err());
    }

    #[test]
    fn save_png_reencodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        save_png(&png_bytes(), &path).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), 4);
        assert!(save_png(b"garbage", &dir.path().join("bad.png")).is_err());
    }
}
