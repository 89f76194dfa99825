//! Language strategy table.
//!
//! Maps a language identifier (case-insensitive, alias-aware) to the recipe
//! describing how its interpreter is invoked. Adding a language is adding a
//! recipe here or dropping a recipe file into the languages directory; nothing
//! else in the crate branches on language.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Placeholder substituted into recipe arguments with the scratch file path
/// (file recipes) or the raw code (inline recipes).
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// How to invoke one language family.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LanguageRecipe {
    /// Canonical name, also resolvable as an identifier.
    pub name: String,

    /// Additional identifiers resolving to this recipe.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Interpreter binary, looked up on `PATH` when not absolute.
    pub command: String,

    /// Argument template; every `{source}` is substituted at invocation time.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Whether the code is written to a scratch file before execution.
    #[serde(default = "default_requires_temp_file")]
    pub requires_temp_file: bool,

    /// Extension for scratch files, without the leading dot.
    #[serde(default)]
    pub file_extension: Option<String>,
}

fn default_args() -> Vec<String> {
    vec![SOURCE_PLACEHOLDER.to_string()]
}

const fn default_requires_temp_file() -> bool {
    true
}

/// A recipe that cannot be added to the table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecipeError {
    #[error("recipe name must not be empty")]
    EmptyName,

    #[error("recipe '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("recipe '{0}' has no argument containing {{source}}")]
    MissingPlaceholder(String),

    #[error("recipe '{0}' requires a temp file but has no file extension")]
    MissingExtension(String),
}

impl LanguageRecipe {
    fn file(name: &str, aliases: &[&str], command: &str, args: &[&str], extension: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            command: command.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            requires_temp_file: true,
            file_extension: Some(extension.to_string()),
        }
    }

    /// Check that the recipe can actually be invoked.
    pub fn validate(&self) -> Result<(), RecipeError> {
        if self.name.trim().is_empty() {
            return Err(RecipeError::EmptyName);
        }
        if self.command.trim().is_empty() {
            return Err(RecipeError::EmptyCommand(self.name.clone()));
        }
        if !self.args.iter().any(|a| a.contains(SOURCE_PLACEHOLDER)) {
            return Err(RecipeError::MissingPlaceholder(self.name.clone()));
        }
        if self.requires_temp_file
            && self
                .file_extension
                .as_deref()
                .map_or(true, |ext| ext.trim_start_matches('.').is_empty())
        {
            return Err(RecipeError::MissingExtension(self.name.clone()));
        }
        Ok(())
    }

    /// Build the argument list for one invocation.
    ///
    /// `source` is the scratch file path or the inline code. It is inserted
    /// as (part of) a discrete argv element and never passes through a shell.
    pub fn build_args(&self, source: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(SOURCE_PLACEHOLDER, source))
            .collect()
    }

    /// Scratch file extension with any leading dot removed.
    pub fn extension(&self) -> Option<&str> {
        self.file_extension
            .as_deref()
            .map(|ext| ext.trim_start_matches('.'))
    }

    fn identifiers(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .map(|id| normalize_identifier(id))
    }
}

fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Read-only lookup from identifier to recipe.
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    recipes: Vec<LanguageRecipe>,
    index: HashMap<String, usize>,
}

impl LanguageTable {
    /// Table with the bundled recipes.
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for recipe in builtin_recipes() {
            table.insert(recipe);
        }
        table
    }

    /// Built-ins plus `extra`, where extra recipes win on identifier collision.
    pub fn with_recipes(
        extra: impl IntoIterator<Item = LanguageRecipe>,
    ) -> Result<Self, RecipeError> {
        let mut table = Self::builtin();
        for recipe in extra {
            recipe.validate()?;
            table.insert(recipe);
        }
        Ok(table)
    }

    fn insert(&mut self, recipe: LanguageRecipe) {
        let slot = self.recipes.len();
        for id in recipe.identifiers() {
            if let Some(previous) = self.index.insert(id.clone(), slot) {
                info!(
                    language = %id,
                    previous = %self.recipes[previous].name,
                    replacement = %recipe.name,
                    "Custom recipe overrides existing language"
                );
            }
        }
        self.recipes.push(recipe);
    }

    /// Look up a recipe by name or alias, ignoring case and surrounding whitespace.
    pub fn resolve(&self, identifier: &str) -> Option<&LanguageRecipe> {
        self.index
            .get(&normalize_identifier(identifier))
            .map(|&slot| &self.recipes[slot])
    }

    /// All identifiers currently resolvable, sorted.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.index.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn builtin_recipes() -> Vec<LanguageRecipe> {
    vec![
        LanguageRecipe::file(
            "javascript",
            &["js", "node", "nodejs"],
            "node",
            &[SOURCE_PLACEHOLDER],
            "js",
        ),
        LanguageRecipe::file("python", &["py", "python3"], "python3", &[SOURCE_PLACEHOLDER], "py"),
        LanguageRecipe::file(
            "typescript",
            &["ts"],
            "npx",
            &["ts-node", SOURCE_PLACEHOLDER],
            "ts",
        ),
        LanguageRecipe::file("shell", &["sh", "bash"], "bash", &[SOURCE_PLACEHOLDER], "sh"),
    ]
}
