use std::io;
use std::path::Path;

/// A named piece of Graphite source text.
///
/// The name is what diagnostics and source maps refer back to; it does not
/// have to be a real filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub content: String,
}

impl Source {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Source {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Load a source from disk, naming it after the file.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let content = std::fs::read_to_string(path)?;
        Ok(Source { name, content })
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Source: {} ({} bytes)", self.name, self.content.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_path_names_the_source_after_the_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("boot.gir");
        std::fs::write(&path, "{ stop() }").expect("sample written");

        let source = Source::from_path(&path).expect("readable");
        assert_eq!(source.name, "boot.gir");
        assert_eq!(source.content, "{ stop() }");
        assert!(!source.is_empty());
    }

    #[test]
    fn missing_files_surface_the_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(Source::from_path(&dir.path().join("ghost.gir")).is_err());
    }
}
