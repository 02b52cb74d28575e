//! File-backed prompt templates.
//!
//! Each template is a Markdown file `<dir>/<name>.md`. Placeholders are
//! written `{variable}`; literal braces are doubled (`{{`, `}}`). A template
//! is read once and served from memory afterwards.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use pipeline::{PromptTemplates, TemplateError, TemplateName, TemplateVars};
use tracing::debug;

/// Loads prompt templates from a directory.
#[derive(Debug)]
pub struct FilePromptLoader {
    dir: PathBuf,
    cache: Mutex<HashMap<TemplateName, Arc<str>>>,
}

impl FilePromptLoader {
    /// Creates a loader rooted at `dir`. Nothing is read until first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The template directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the raw text of a template, reading it on first use.
    pub fn load(&self, name: &TemplateName) -> Result<Arc<str>, TemplateError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(text) = cache.get(name) {
            return Ok(Arc::clone(text));
        }

        let path = self.dir.join(format!("{name}.md"));
        let text: Arc<str> = match std::fs::read_to_string(&path) {
            Ok(text) => text.into(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TemplateError::NotFound {
                    name: name.to_string(),
                    path: path.display().to_string(),
                })
            }
            Err(source) => {
                return Err(TemplateError::Unreadable {
                    name: name.to_string(),
                    source,
                })
            }
        };
        debug!(template = %name, path = %path.display(), chars = text.len(), "Loaded prompt template");
        cache.insert(name.clone(), Arc::clone(&text));
        Ok(text)
    }
}

impl PromptTemplates for FilePromptLoader {
    fn render(&self, name: &TemplateName, vars: &TemplateVars) -> Result<String, TemplateError> {
        let template = self.load(name)?;
        substitute(name, &template, vars)
    }
}

/// Replaces every `{variable}` in `template` with its value from `vars`.
///
/// `{{` and `}}` produce literal braces. A placeholder without a value, an
/// unclosed `{` and a lone `}` are errors.
pub fn substitute(
    name: &TemplateName,
    template: &str,
    vars: &TemplateVars,
) -> Result<String, TemplateError> {
    let malformed = |message: String| TemplateError::Malformed {
        name: name.to_string(),
        message,
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|&(_, n)| n) == Some('{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut variable = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, '{')) => {
                            return Err(malformed(format!("nested '{{' in placeholder at byte {at}")))
                        }
                        Some((_, ch)) => variable.push(ch),
                        None => return Err(malformed(format!("unclosed '{{' at byte {at}"))),
                    }
                }
                if variable.is_empty() {
                    return Err(malformed(format!("empty placeholder at byte {at}")));
                }
                let value = vars.get(&variable).ok_or_else(|| TemplateError::MissingVariable {
                    name: name.to_string(),
                    variable: variable.clone(),
                })?;
                out.push_str(value);
            }
            '}' if chars.peek().map(|&(_, n)| n) == Some('}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(malformed(format!("single '}}' at byte {at}"))),
            other => out.push(other),
        }
    }
    Ok(out)
}
