//! Configuration for the book pipeline and its collaborators.
//!
//! All behaviour is controlled through [`ForgeConfig`], built via its
//! [`ForgeConfigBuilder`]. One struct shared (cheaply cloned) by the manager,
//! every driver, and the HTTP layer.

use crate::error::BookError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for book generation.
///
/// # Example
/// ```rust
/// use storyforge::ForgeConfig;
///
/// let config = ForgeConfig::builder()
///     .data_dir("/tmp/storyforge")
///     .temperature(0.7)
///     .collaborator_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert!(config.output_dir.ends_with("books"));
/// ```
#[derive(Clone)]
pub struct ForgeConfig {
    /// Where uploaded source documents are stored while a job runs. Default: `data/uploads`.
    pub upload_dir: PathBuf,

    /// Where assembled books are written. Default: `data/books`.
    pub output_dir: PathBuf,

    /// Where generated illustrations are written. Default: `data/images`.
    pub images_dir: PathBuf,

    /// Where per-job manifests are written. Default: `data/manifests`.
    pub manifest_dir: PathBuf,

    /// Maximum characters of extracted text handed to the story model. Default: 2000.
    ///
    /// Small instruction models have short context windows; the prompt
    /// template plus 2 000 characters of source stays well inside 2k tokens.
    pub source_char_limit: usize,

    /// Maximum pages per book. Range: 1–10. Default: 10.
    pub max_pages: usize,

    /// Interval between progress snapshots on the event stream. Default: 1000 ms.
    pub poll_interval_ms: u64,

    /// Upper bound on any single collaborator call. Default: 600 000 ms.
    ///
    /// Extraction, drafting and assembly fail the job when they exceed it;
    /// an illustration that exceeds it leaves its page without an image.
    pub collaborator_timeout_ms: u64,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the story model. Default: 0.7.
    ///
    /// Stories want some creativity, unlike transcription.
    pub temperature: f32,

    /// Maximum tokens the story model may generate. Default: 1024.
    pub max_tokens: usize,

    /// txt2img endpoint (Automatic1111-compatible). None disables illustration.
    pub image_endpoint: Option<String>,

    /// Diffusion steps per image. Default: 1 (turbo models).
    pub image_steps: u32,

    /// Square image edge in pixels. Default: 512.
    pub image_size: u32,

    /// Keep uploaded sources after the job finishes. Default: false.
    pub keep_sources: bool,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        let root = Path::new("data");
        ForgeConfig {
            upload_dir: root.join("uploads"),
            output_dir: root.join("books"),
            images_dir: root.join("images"),
            manifest_dir: root.join("manifests"),
            source_char_limit: 2000,
            max_pages: 10,
            poll_interval_ms: 1000,
            collaborator_timeout_ms: 600_000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.7,
            max_tokens: 1024,
            image_endpoint: None,
            image_steps: 1,
            image_size: 512,
            keep_sources: false,
        }
    }
}

impl fmt::Debug for ForgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForgeConfig")
            .field("upload_dir", &self.upload_dir)
            .field("output_dir", &self.output_dir)
            .field("images_dir", &self.images_dir)
            .field("manifest_dir", &self.manifest_dir)
            .field("source_char_limit", &self.source_char_limit)
            .field("max_pages", &self.max_pages)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("collaborator_timeout_ms", &self.collaborator_timeout_ms)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("image_endpoint", &self.image_endpoint)
            .field("keep_sources", &self.keep_sources)
            .finish()
    }
}

impl ForgeConfig {
    /// Create a new builder for `ForgeConfig`.
    pub fn builder() -> ForgeConfigBuilder {
        ForgeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults with every data directory rooted at `root`.
    pub fn with_data_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            upload_dir: root.join("uploads"),
            output_dir: root.join("books"),
            images_dir: root.join("images"),
            manifest_dir: root.join("manifests"),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Conventional path of a job's assembled book.
    pub fn book_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(format!("book_{job_id}.pdf"))
    }

    /// Create every data directory that does not exist yet.
    pub async fn ensure_dirs(&self) -> Result<(), BookError> {
        for dir in [
            &self.upload_dir,
            &self.output_dir,
            &self.images_dir,
            &self.manifest_dir,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| BookError::io(dir.clone(), e))?;
        }
        Ok(())
    }
}

/// Builder for [`ForgeConfig`].
#[derive(Debug)]
pub struct ForgeConfigBuilder {
    config: ForgeConfig,
}

impl ForgeConfigBuilder {
    /// Derive all four data directories from one root.
    pub fn data_dir(mut self, root: impl AsRef<Path>) -> Self {
        let dirs = ForgeConfig::with_data_dir(root);
        self.config.upload_dir = dirs.upload_dir;
        self.config.output_dir = dirs.output_dir;
        self.config.images_dir = dirs.images_dir;
        self.config.manifest_dir = dirs.manifest_dir;
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.images_dir = dir.into();
        self
    }

    pub fn manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.manifest_dir = dir.into();
        self
    }

    pub fn source_char_limit(mut self, n: usize) -> Self {
        self.config.source_char_limit = n.max(1);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.clamp(1, crate::pipeline::parse::MAX_PAGES);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(1);
        self
    }

    pub fn collaborator_timeout_ms(mut self, ms: u64) -> Self {
        self.config.collaborator_timeout_ms = ms;
        self
    }

    pub fn collaborator_timeout_secs(self, secs: u64) -> Self {
        self.collaborator_timeout_ms(secs.saturating_mul(1000))
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn image_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.image_endpoint = Some(url.into());
        self
    }

    pub fn image_steps(mut self, steps: u32) -> Self {
        self.config.image_steps = steps.max(1);
        self
    }

    pub fn image_size(mut self, px: u32) -> Self {
        self.config.image_size = px.clamp(64, 2048);
        self
    }

    pub fn keep_sources(mut self, v: bool) -> Self {
        self.config.keep_sources = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ForgeConfig, BookError> {
        let c = &self.config;
        if c.collaborator_timeout_ms == 0 {
            return Err(BookError::InvalidConfig(
                "Collaborator timeout must be ≥ 1ms".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(BookError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if let Some(ref url) = c.image_endpoint {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(BookError::InvalidConfig(format!(
                    "image endpoint must be an HTTP(S) URL, got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}
