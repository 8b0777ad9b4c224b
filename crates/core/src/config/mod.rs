use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MIN_CHAPTERS: u32 = 1;
pub const MAX_CHAPTERS: u32 = 15;

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

fn default_genre() -> String {
    "Sci-Fi".to_string()
}

fn default_audience() -> String {
    "Adult".to_string()
}

fn default_language() -> String {
    "English".to_string()
}

fn default_style() -> String {
    "Descriptive".to_string()
}

fn default_tone() -> String {
    "Suspenseful".to_string()
}

fn default_pov() -> String {
    "Third Person Limited".to_string()
}

fn default_chapter_count() -> u32 {
    5
}

fn default_include_images() -> bool {
    true
}

fn default_image_style() -> String {
    "Cinematic".to_string()
}

fn default_interface_format() -> String {
    "gemini".to_string()
}

fn default_temperature() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_timeout() -> u64 {
    120
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_inference_base_url() -> String {
    "https://api-inference.huggingface.co".to_string()
}

fn default_stock_search_url() -> String {
    "https://lexica.art/api/v1/search".to_string()
}

fn default_placeholder_url() -> String {
    "https://placehold.co/1024x600/0a0a0a/333?text=Asset+Processing".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything the user picks in the wizard before a run starts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub image_api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_audience")]
    pub target_audience: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_pov")]
    pub pov: String,
    #[serde(default = "default_chapter_count")]
    pub chapter_count: u32,
    #[serde(default = "default_include_images")]
    pub include_images: bool,
    #[serde(default = "default_image_style")]
    pub image_style: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            image_api_key: String::new(),
            model: default_model(),
            image_model: default_image_model(),
            title: String::new(),
            genre: default_genre(),
            topic: String::new(),
            target_audience: default_audience(),
            language: default_language(),
            style: default_style(),
            tone: default_tone(),
            pov: default_pov(),
            chapter_count: default_chapter_count(),
            include_images: default_include_images(),
            image_style: default_image_style(),
        }
    }
}

impl GenerationConfig {
    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn image_credential(&self) -> Option<&str> {
        let key = self.image_api_key.trim();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Requested chapter count clamped to the supported range.
    pub fn requested_chapters(&self) -> u32 {
        self.chapter_count.clamp(MIN_CHAPTERS, MAX_CHAPTERS)
    }

    pub fn normalized(mut self) -> Self {
        self.chapter_count = self.requested_chapters();
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TextProviderConfig {
    #[serde(default = "default_interface_format")]
    pub interface_format: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for TextProviderConfig {
    fn default() -> Self {
        Self {
            interface_format: default_interface_format(),
            base_url: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageProviderConfig {
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    #[serde(default = "default_inference_base_url")]
    pub inference_base_url: String,
    #[serde(default = "default_stock_search_url")]
    pub stock_search_url: String,
    #[serde(default = "default_placeholder_url")]
    pub placeholder_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for ImageProviderConfig {
    fn default() -> Self {
        Self {
            gemini_base_url: default_gemini_base_url(),
            inference_base_url: default_inference_base_url(),
            stock_search_url: default_stock_search_url(),
            placeholder_url: default_placeholder_url(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub text_provider: TextProviderConfig,
    #[serde(default)]
    pub image_provider: ImageProviderConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut config: Config = serde_json::from_str(input)?;
        config.generation = config.generation.normalized();
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        Config::from_path(path.as_ref())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn reload(&mut self) -> Result<(), ConfigError> {
        if self.path.exists() {
            self.config = Config::from_path(&self.path)?;
        } else {
            self.config = Config::default();
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }
}
