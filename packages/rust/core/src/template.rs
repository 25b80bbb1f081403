//! Prompt templates with `${name}` placeholders.
//!
//! Each template id has a fixed set of required variables and a set of
//! optional ones. Rendering is a pure function of the template text and the
//! variable map; anything unresolved is a [`QuizError::MissingVariable`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use quizforge_shared::{QuizError, Result, TemplatesConfig};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Variables supplied to [`Templates::render`].
pub type Variables = HashMap<&'static str, String>;

/// The prompts the pipeline renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    Generate,
    Validate,
    Chat,
}

impl TemplateId {
    pub const ALL: [TemplateId; 3] = [TemplateId::Generate, TemplateId::Validate, TemplateId::Chat];

    pub fn name(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::Chat => "chat",
        }
    }

    /// File name looked up in an override directory.
    pub fn file_name(self) -> String {
        format!("{}.tmpl", self.name())
    }

    pub fn required(self) -> &'static [&'static str] {
        match self {
            Self::Generate => &[
                "token",
                "iteration",
                "question_index",
                "count",
                "model",
                "theme",
                "recent_clause",
                "corpus",
                "style_clause",
                "option_clause",
            ],
            Self::Validate => &[
                "context_section",
                "question",
                "options",
                "provided_answer_text",
                "explanation",
            ],
            Self::Chat => &["context_section", "history", "question"],
        }
    }

    pub fn optional(self) -> &'static [&'static str] {
        match self {
            Self::Generate => &["retry_nonce"],
            Self::Validate | Self::Chat => &[],
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            Self::Generate => include_str!("../templates/generate.tmpl"),
            Self::Validate => include_str!("../templates/validate.tmpl"),
            Self::Chat => include_str!("../templates/chat.tmpl"),
        }
    }
}

/// Loaded template texts, one per [`TemplateId`].
#[derive(Debug, Clone)]
pub struct Templates {
    generate: String,
    validate: String,
    chat: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Templates {
    /// Templates compiled into the binary.
    pub fn builtin() -> Self {
        Self {
            generate: TemplateId::Generate.builtin().to_string(),
            validate: TemplateId::Validate.builtin().to_string(),
            chat: TemplateId::Chat.builtin().to_string(),
        }
    }

    /// Built-in templates, with any file in `templates.dir` taking precedence.
    pub fn from_config(config: &TemplatesConfig) -> Result<Self> {
        match &config.dir {
            Some(dir) => Self::load_dir(Path::new(dir)),
            None => Ok(Self::builtin()),
        }
    }

    /// Override built-ins with `<id>.tmpl` files found in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut templates = Self::builtin();
        for id in TemplateId::ALL {
            let path = dir.join(id.file_name());
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| QuizError::io(&path, e))?;
            debug!(template = id.name(), path = %path.display(), "loaded template override");
            templates.set(id, text);
        }
        Ok(templates)
    }

    /// Replace one template text.
    pub fn set(&mut self, id: TemplateId, text: impl Into<String>) {
        let slot = match id {
            TemplateId::Generate => &mut self.generate,
            TemplateId::Validate => &mut self.validate,
            TemplateId::Chat => &mut self.chat,
        };
        *slot = text.into();
    }

    pub fn text(&self, id: TemplateId) -> &str {
        match id {
            TemplateId::Generate => &self.generate,
            TemplateId::Validate => &self.validate,
            TemplateId::Chat => &self.chat,
        }
    }

    /// Render template `id` with `vars`.
    pub fn render(&self, id: TemplateId, vars: &Variables) -> Result<String> {
        render_text(id, self.text(id), vars)
    }
}

/// Substitute `${name}` placeholders in `text`, checked against the variable
/// sets of `id`.
pub fn render_text(id: TemplateId, text: &str, vars: &Variables) -> Result<String> {
    let missing = |variable: &str| QuizError::MissingVariable {
        template: id.name().to_string(),
        variable: variable.to_string(),
    };

    if let Some(name) = id.required().iter().find(|name| !vars.contains_key(**name)) {
        return Err(missing(*name));
    }

    let referenced: BTreeSet<&str> = PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if let Some(name) = referenced
        .into_iter()
        .find(|name| !vars.contains_key(*name) && !id.optional().iter().any(|o| o == name))
    {
        return Err(missing(name));
    }

    let rendered = PLACEHOLDER_RE.replace_all(text, |caps: &Captures<'_>| {
        vars.get(&caps[1]).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}
