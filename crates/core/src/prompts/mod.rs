use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

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

impl fmt::Display for PromptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn => f.write_str("built-in prompts"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One row of the stage table: an optional instructional preamble plus a task
/// template with `{placeholder}` slots.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    system: Option<String>,
    template: String,
    segments: Vec<TemplateSegment>,
    required: BTreeSet<String>,
    source: PromptSource,
}

impl PromptTemplate {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        if let Some(missing) = self
            .required
            .iter()
            .find(|name| !arguments.contains_key(*name))
        {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
                origin: self.source.clone(),
            });
        }

        let mut output = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => output.push_str(text),
                TemplateSegment::Placeholder(name) => {
                    if let Some(value) = arguments.get(name) {
                        output.push_str(value);
                    }
                }
            }
        }

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

    fn from_raw(key: String, raw: RawPrompt, source: PromptSource) -> Result<Self, PromptError> {
        let (segments, placeholders) = parse_template(&raw.template);

        let required = if raw.required.is_empty() {
            placeholders
        } else {
            let mut set = BTreeSet::new();
            for argument in raw.required {
                let argument = argument.trim().to_string();
                if !placeholders.contains(&argument) {
                    return Err(PromptError::InvalidRequired { key, argument });
                }
                set.insert(argument);
            }
            set
        };

        let system = raw
            .system
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        Ok(Self {
            key,
            system,
            template: raw.template,
            segments,
            required,
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}` from {origin}")]
    MissingArgument {
        key: String,
        argument: String,
        origin: PromptSource,
    },
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
    #[error(
        "required key `{argument}` declared for prompt `{key}` but no matching placeholder was found"
    )]
    InvalidRequired { key: String, argument: String },
}

/// Stage name to template table. Built-in entries load first; files from the
/// custom directories override them by key, in directory then file-name order.
#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::with_directories(Vec::new())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_directories(config.custom_directories.clone())
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        Self::with_directories(
            directories
                .iter()
                .map(|p| p.as_ref().to_path_buf())
                .collect(),
        )
    }

    fn with_directories(directories: Vec<PathBuf>) -> Result<Self, PromptError> {
        let mut registry = Self {
            prompts: BTreeMap::new(),
            directories,
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn reload(&mut self) -> Result<(), PromptError> {
        let mut prompts = BTreeMap::new();
        for template in parse_toml_document(BUILT_IN_PROMPTS, PromptSource::BuiltIn)? {
            prompts.insert(template.key().to_string(), template);
        }
        for dir in &self.directories {
            load_directory(dir, &mut prompts)?;
        }
        self.prompts = prompts;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn template(&self, key: &str) -> Result<&PromptTemplate, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))
    }
}

fn load_directory(
    dir: &Path,
    prompts: &mut BTreeMap<String, PromptTemplate>,
) -> Result<(), PromptError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PromptError::Io { path, source }
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        if entry.file_type().map_err(io_error(&path))?.is_file() {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        let templates = match ext.to_ascii_lowercase().as_str() {
            "toml" => {
                let contents = fs::read_to_string(&path).map_err(io_error(&path))?;
                parse_toml_document(&contents, PromptSource::File(path.clone())).map_err(
                    |err| match err {
                        PromptError::ParseBuiltIn(source) => PromptError::ParseToml {
                            path: path.clone(),
                            source,
                        },
                        other => other,
                    },
                )?
            }
            "yaml" | "yml" => {
                let contents = fs::read_to_string(&path).map_err(io_error(&path))?;
                let document: PromptDocument =
                    serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
                        path: path.clone(),
                        source,
                    })?;
                document_templates(document, PromptSource::File(path.clone()))?
            }
            _ => continue,
        };

        for template in templates {
            prompts.insert(template.key().to_string(), template);
        }
    }

    Ok(())
}

fn parse_toml_document(
    source: &str,
    origin: PromptSource,
) -> Result<Vec<PromptTemplate>, PromptError> {
    let document: PromptDocument = toml::from_str(source).map_err(PromptError::ParseBuiltIn)?;
    document_templates(document, origin)
}

fn document_templates(
    document: PromptDocument,
    origin: PromptSource,
) -> Result<Vec<PromptTemplate>, PromptError> {
    document
        .prompts
        .into_iter()
        .map(|(key, raw)| PromptTemplate::from_raw(key, raw, origin.clone()))
        .collect()
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
    #[serde(default, alias = "preamble")]
    system: Option<String>,
    #[serde(default)]
    required: Vec<String>,
}

#[derive(Clone, Debug)]
enum TemplateSegment {
    Literal(String),
    Placeholder(String),
}

fn parse_template(template: &str) -> (Vec<TemplateSegment>, BTreeSet<String>) {
    let mut segments = Vec::new();
    let mut placeholders = BTreeSet::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    name.push(next);
                }

                let trimmed = name.trim();
                if !closed {
                    literal.push('{');
                    literal.push_str(&name);
                } else if trimmed.is_empty() {
                    literal.push_str("{}");
                } else {
                    if !literal.is_empty() {
                        segments.push(TemplateSegment::Literal(std::mem::take(&mut literal)));
                    }
                    placeholders.insert(trimmed.to_string());
                    segments.push(TemplateSegment::Placeholder(trimmed.to_string()));
                }
            }
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        segments.push(TemplateSegment::Literal(literal));
    }

    (segments, placeholders)
}
