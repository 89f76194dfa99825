//! Scratch files for file-based language recipes.
//!
//! Submitted code is written verbatim to `<scratch_dir>/snippet-<uuid>.<ext>`
//! and the interpreter is pointed at that path. The returned [`ScratchFile`]
//! removes the file when released or dropped, so cleanup happens on every
//! exit path including timeouts and panics.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::language::LanguageRecipe;

/// Directory holding in-flight scratch files. Also the children's working directory.
///
/// The root is always absolute: children run with it as their working
/// directory, so a relative scratch path would resolve against itself.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or_else(|e| {
            warn!(path = %root.display(), error = %e, "Cannot make scratch directory absolute");
            root
        });
        Self { root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it does not exist yet.
    pub async fn prepare(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Turn submitted code into something the recipe's argument template can reference.
    ///
    /// Inline recipes get the code back untouched. File recipes get a freshly
    /// written scratch file; if the write fails the partial file is removed
    /// before the error is returned.
    pub async fn materialize(&self, recipe: &LanguageRecipe, code: &str) -> io::Result<Source> {
        if !recipe.requires_temp_file {
            return Ok(Source::Inline(code.to_string()));
        }

        let extension = recipe.extension().unwrap_or("txt");
        let path = self
            .root
            .join(format!("snippet-{}.{extension}", Uuid::new_v4()));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        // From here on the guard owns the path.
        let scratch = ScratchFile::new(path);

        file.write_all(code.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        debug!(path = %scratch.path().display(), bytes = code.len(), "Materialized source");
        Ok(Source::File(scratch))
    }
}

/// What gets substituted into the recipe's `{source}` placeholder.
#[derive(Debug)]
pub enum Source {
    /// The code itself, passed as an argument.
    Inline(String),
    /// A scratch file holding the code.
    File(ScratchFile),
}

impl Source {
    /// The string to substitute for `{source}`.
    pub fn argument(&self) -> String {
        match self {
            Self::Inline(code) => code.clone(),
            Self::File(file) => file.path().to_string_lossy().into_owned(),
        }
    }

    /// Release the scratch file, if any. Safe to call more than once.
    pub fn release(&mut self) {
        if let Self::File(file) = self {
            file.release();
        }
    }
}

/// A scratch file owned by exactly one request.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    created_at: SystemTime,
    released: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            created_at: SystemTime::now(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Delete the file. Idempotent; an already missing file is not an error.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released scratch file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove scratch file");
            }
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageTable;

    fn python() -> LanguageRecipe {
        LanguageTable::builtin().resolve("python").unwrap().clone()
    }

    #[tokio::test]
    async fn inline_recipe_returns_code_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let recipe = LanguageRecipe {
            requires_temp_file: false,
            file_extension: None,
            ..python()
        };

        let source = scratch.materialize(&recipe, "print('hi')").await.unwrap();
        assert!(matches!(&source, Source::Inline(code) if code == "print('hi')"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn file_recipe_writes_verbatim_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let code = "print(\"quotes ' and $vars `ticks`\")\n";

        let mut source = scratch.materialize(&python(), code).await.unwrap();
        let path = match &source {
            Source::File(file) => file.path().to_path_buf(),
            Source::Inline(_) => panic!("python should be file-based"),
        };

        assert_eq!(path.parent().unwrap(), dir.path());
        assert_eq!(path.extension().unwrap(), "py");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), code);
        assert_eq!(source.argument(), path.to_string_lossy());

        source.release();
        assert!(!path.exists());
        // Second release is a no-op
        source.release();
    }

    #[tokio::test]
    async fn drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());

        let source = scratch.materialize(&python(), "pass").await.unwrap();
        let path = PathBuf::from(source.argument());
        assert!(path.exists());

        drop(source);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn release_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());

        let mut source = scratch.materialize(&python(), "pass").await.unwrap();
        std::fs::remove_file(source.argument()).unwrap();
        source.release();
    }

    #[tokio::test]
    async fn paths_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let recipe = python();

        let sources = materialize_many(&scratch, &recipe).await;
        let mut paths: Vec<String> = sources.iter().map(Source::argument).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), sources.len());
    }

    async fn materialize_many(scratch: &ScratchDir, recipe: &LanguageRecipe) -> Vec<Source> {
        let mut sources = Vec::new();
        for i in 0..32 {
            sources.push(
                scratch
                    .materialize(recipe, &format!("print({i})"))
                    .await
                    .unwrap(),
            );
        }
        sources
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let scratch = ScratchDir::new("relative-scratch");
        assert!(scratch.path().is_absolute());
        assert_eq!(
            scratch.path(),
            std::env::current_dir().unwrap().join("relative-scratch")
        );
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path().join("absent"));
        assert!(scratch.materialize(&python(), "pass").await.is_err());

        scratch.prepare().await.unwrap();
        assert!(scratch.materialize(&python(), "pass").await.is_ok());
    }
}
