use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::config::PromptConfig;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

pub const AUTHOR_SYSTEM_PROMPT: &str = "author_system";
pub const OUTLINE_PROMPT: &str = "outline";
pub const CHAPTER_PROMPT: &str = "chapter";
pub const IMAGE_PROMPT_PROMPT: &str = "image_prompt";
pub const IMAGE_FALLBACK_PROMPT: &str = "image_fallback";

pub type PromptArguments = HashMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

impl PromptSource {
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::BuiltIn)
    }
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    template: String,
    placeholders: BTreeSet<String>,
    description: Option<String>,
    source: PromptSource,
}

impl PromptTemplate {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(|s| s.as_str())
    }

    /// Every placeholder must be supplied; extra arguments are ignored.
    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        if let Some(missing) = self
            .placeholders
            .iter()
            .find(|name| !arguments.contains_key(*name))
        {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
            });
        }

        let mut output = String::with_capacity(self.template.len());
        let mut last = 0;
        for caps in token_regex().captures_iter(&self.template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            output.push_str(&self.template[last..whole.start()]);
            match caps.get(1) {
                Some(name) => {
                    if let Some(value) = arguments.get(name.as_str()) {
                        output.push_str(value);
                    }
                }
                None => output.push_str(&whole.as_str()[..1]),
            }
            last = whole.end();
        }
        output.push_str(&self.template[last..]);

        Ok(output)
    }

    pub fn render_with<I, K, V>(&self, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: PromptArguments = arguments
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.render(&map)
    }

    fn from_raw(key: String, raw: RawPrompt, source: PromptSource) -> Self {
        let placeholders = token_regex()
            .captures_iter(&raw.template)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect();

        Self {
            key,
            template: raw.template,
            placeholders,
            description: raw.description,
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::from_prompt_config(&PromptConfig::default())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_directories(config.custom_directories.clone())
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        let dirs = directories
            .iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();
        Self::with_directories(dirs)
    }

    pub fn reload(&mut self) -> Result<(), PromptError> {
        self.prompts = Self::build_prompts(&self.directories)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(|k| k.as_str())
    }

    /// Raw template text, for prompts that take no arguments.
    pub fn text(&self, key: &str) -> Result<&str, PromptError> {
        self.get(key)
            .map(PromptTemplate::template)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))
    }

    pub fn format(&self, key: &str, args: &PromptArguments) -> Result<String, PromptError> {
        let template = self
            .get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?;
        template.render(args)
    }

    pub fn format_with<I, K, V>(&self, key: &str, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let template = self
            .get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?;
        template.render_with(arguments)
    }

    fn with_directories(directories: Vec<PathBuf>) -> Result<Self, PromptError> {
        let mut registry = Self {
            prompts: BTreeMap::new(),
            directories,
        };
        registry.reload()?;
        Ok(registry)
    }

    fn build_prompts(
        directories: &[PathBuf],
    ) -> Result<BTreeMap<String, PromptTemplate>, PromptError> {
        let document: PromptDocument =
            toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::ParseBuiltIn)?;
        let mut prompts = BTreeMap::new();
        insert_document(&mut prompts, document, PromptSource::BuiltIn);

        for dir in directories {
            for path in prompt_files(dir)? {
                let document = read_prompt_file(&path)?;
                insert_document(&mut prompts, document, PromptSource::File(path));
            }
        }

        Ok(prompts)
    }
}

fn insert_document(
    prompts: &mut BTreeMap<String, PromptTemplate>,
    document: PromptDocument,
    source: PromptSource,
) {
    for (key, raw) in document.prompts {
        let template = PromptTemplate::from_raw(key.clone(), raw, source.clone());
        prompts.insert(key, template);
    }
}

/// Prompt files of a directory in name order; a missing directory contributes nothing.
fn prompt_files(dir: &Path) -> Result<Vec<PathBuf>, PromptError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let io_error = |source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "toml" | "yaml" | "yml"))
            .unwrap_or(false);
        if supported && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_prompt_file(path: &Path) -> Result<PromptDocument, PromptError> {
    let contents = fs::read_to_string(path).map_err(|source| PromptError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    if is_toml {
        toml::from_str(&contents).map_err(|source| PromptError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    #[serde(alias = "text")]
    template: String,
    #[serde(default)]
    description: Option<String>,
}

fn token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}")
            .expect("invalid prompt token regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn built_in_prompts_are_available() {
        let registry = PromptRegistry::new().expect("registry");
        for key in [
            AUTHOR_SYSTEM_PROMPT,
            OUTLINE_PROMPT,
            CHAPTER_PROMPT,
            IMAGE_PROMPT_PROMPT,
            IMAGE_FALLBACK_PROMPT,
        ] {
            let template = registry.get(key).expect("built-in prompt");
            assert!(template.source().is_builtin());
        }
    }

    #[test]
    fn renders_fallback_image_prompt() {
        let registry = PromptRegistry::new().expect("registry");
        let output = registry
            .format_with(
                IMAGE_FALLBACK_PROMPT,
                [
                    ("image_style", "Gothic"),
                    ("genre", "Horror"),
                    ("chapter_title", "The Lantern"),
                ],
            )
            .expect("rendered");
        assert!(output.starts_with("Gothic style, Horror concept art, The Lantern,"));
    }

    #[test]
    fn missing_argument_fails() {
        let registry = PromptRegistry::new().expect("registry");
        let template = registry.get(IMAGE_PROMPT_PROMPT).expect("available");
        let args = PromptArguments::from([("image_style".into(), "Anime".into())]);
        let error = template.render(&args).expect_err("missing args");
        match error {
            PromptError::MissingArgument { argument, .. } => {
                assert_eq!(argument, "chapter_title");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn doubled_braces_render_literally() {
        let template = PromptTemplate::from_raw(
            "json".into(),
            RawPrompt {
                template: "{{\"title\": \"{ title }\"}}".into(),
                description: None,
            },
            PromptSource::BuiltIn,
        );
        let output = template.render_with([("title", "Dawn")]).unwrap();
        assert_eq!(output, "{\"title\": \"Dawn\"}");
    }

    #[test]
    fn custom_directory_overrides() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("custom.toml"),
            "[prompts.author_system]\ntemplate = \"Write like a pulp novelist.\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("extra.yaml"),
            "prompts:\n  outline:\n    template: \"Titles for {title}\"\n",
        )
        .unwrap();

        let registry = PromptRegistry::with_custom_directories(&[dir.path()]).unwrap();
        assert_eq!(
            registry.text(AUTHOR_SYSTEM_PROMPT).unwrap(),
            "Write like a pulp novelist."
        );
        let outline = registry
            .format_with(OUTLINE_PROMPT, [("title", "Dawn")])
            .unwrap();
        assert_eq!(outline, "Titles for Dawn");
    }

    #[test]
    fn reload_reflects_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[prompts.outline]\ntemplate = \"first {title}\"\n").unwrap();

        let mut registry = PromptRegistry::with_custom_directories(&[dir.path()]).unwrap();
        let first = registry
            .format_with(OUTLINE_PROMPT, [("title", "A")])
            .unwrap();
        assert_eq!(first, "first A");

        fs::write(&path, "[prompts.outline]\ntemplate = \"second {title}\"\n").unwrap();
        registry.reload().unwrap();
        let second = registry
            .format_with(OUTLINE_PROMPT, [("title", "B")])
            .unwrap();
        assert_eq!(second, "second B");
    }
}
