//! Workflow template directory
//!
//! Templates are YAML files, one per file, loaded at startup. A file
//! that fails to parse or validate is logged and skipped so one broken
//! template never takes the orchestrator down. The map is read-mostly
//! after load; `reload` swaps it wholesale.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{info, warn};

use conductor_core::Template;

/// Error type for template loading
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Directory could not be read
    #[error("template directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory template catalogue backed by a directory of YAML files
pub struct TemplateStore {
    dir: PathBuf,
    templates: RwLock<HashMap<String, Template>>,
}

impl TemplateStore {
    /// Load every `.yaml`/`.yml` file in the directory
    ///
    /// A missing directory yields an empty store with a warning; the
    /// orchestrator still serves inline and generated workflows.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let store = Self {
            dir: dir.as_ref().to_path_buf(),
            templates: RwLock::new(HashMap::new()),
        };
        let count = store.reload()?;
        info!(dir = %store.dir.display(), count, "templates loaded");
        Ok(store)
    }

    /// Re-read the directory, replacing the whole catalogue
    pub fn reload(&self) -> Result<usize, TemplateError> {
        if !self.dir.exists() {
            warn!(dir = %self.dir.display(), "template directory missing, starting empty");
            self.templates.write().clear();
            return Ok(0);
        }

        let mut loaded = HashMap::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            match load_template(&path) {
                Ok(template) => {
                    if let Some(previous) = loaded.insert(template.id.clone(), template) {
                        warn!(
                            file = %path.display(),
                            id = %previous.id,
                            "duplicate template id, later file wins"
                        );
                    }
                }
                Err(reason) => {
                    warn!(file = %path.display(), %reason, "skipping invalid template");
                }
            }
        }

        let count = loaded.len();
        *self.templates.write() = loaded;
        Ok(count)
    }

    /// Look up a template by id
    pub fn get(&self, id: &str) -> Option<Template> {
        self.templates.read().get(id).cloned()
    }

    /// All templates in a category, sorted by id
    pub fn by_category(&self, category: &str) -> Vec<Template> {
        let mut matches: Vec<Template> = self
            .templates
            .read()
            .values()
            .filter(|template| template.category == category)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    /// Case-insensitive substring search over id, name, and description
    pub fn search(&self, query: &str) -> Vec<Template> {
        let needle = query.to_lowercase();
        let mut matches: Vec<Template> = self
            .templates
            .read()
            .values()
            .filter(|template| {
                template.id.to_lowercase().contains(&needle)
                    || template.name.to_lowercase().contains(&needle)
                    || template
                        .description
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    /// All templates, sorted by id
    pub fn list(&self) -> Vec<Template> {
        let mut all: Vec<Template> = self.templates.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

fn load_template(path: &Path) -> Result<Template, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let template: Template = serde_yaml::from_str(&raw).map_err(|e| e.to_string())?;
    template.validate().map_err(|e| e.to_string())?;
    Ok(template)
}
