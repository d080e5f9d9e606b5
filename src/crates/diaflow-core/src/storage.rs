//! Filesystem-backed diagram storage
//!
//! A thin [`DiagramStorage`](crate::ports::DiagramStorage) implementation
//! over a directory of diagram files. Lookup by id resolves a file by
//! trying `<id>.yaml`, `<id>.yml`, `<id>.json` in order, then falls back
//! to scanning files whose internal metadata `id` matches. Formats are
//! detected per file; saves default to Native JSON.

use crate::domain::DomainDiagram;
use crate::error::{DiagramError, Result};
use crate::formats::{self, DiagramFormat};
use crate::ports::{DiagramEntry, DiagramStorage};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Directory-backed diagram store.
pub struct FileDiagramStorage {
    root: PathBuf,
}

impl FileDiagramStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an id to an existing file, per the lookup order.
    async fn resolve(&self, id: &str) -> Result<PathBuf> {
        for extension in EXTENSIONS {
            let candidate = self.root.join(format!("{id}.{extension}"));
            if tokio::fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        // Fall back to scanning for an internal id match.
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !has_diagram_extension(&path) {
                continue;
            }
            if let Ok(diagram) = self.read_diagram(&path).await {
                let internal_id = diagram.metadata.as_ref().and_then(|m| m.id.as_deref());
                if internal_id == Some(id) {
                    return Ok(path);
                }
            }
        }

        Err(DiagramError::Configuration(format!(
            "diagram '{id}' not found under {}",
            self.root.display()
        )))
    }

    async fn read_diagram(&self, path: &Path) -> Result<DomainDiagram> {
        let content = tokio::fs::read_to_string(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let format = formats::detect_format(file_name, &content)?;
        formats::deserialize(&content, format)
    }
}

fn has_diagram_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

#[async_trait]
impl DiagramStorage for FileDiagramStorage {
    async fn load(&self, id: &str) -> Result<DomainDiagram> {
        let path = self.resolve(id).await?;
        self.read_diagram(&path).await
    }

    async fn save(&self, id: &str, diagram: &DomainDiagram) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("{id}.json"));
        let content = formats::serialize(diagram, DiagramFormat::Native)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DiagramEntry>> {
        let mut result = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(result),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !has_diagram_extension(&path) {
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let Ok(format) = formats::detect_format(&file_name, &content) else {
                continue;
            };
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let name = formats::deserialize(&content, format)
                .ok()
                .and_then(|d| d.metadata.and_then(|m| m.name));
            let modified = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(chrono::DateTime::<chrono::Utc>::from)
                .unwrap_or_else(chrono::Utc::now);
            result.push(DiagramEntry {
                id: stem,
                name,
                format,
                modified,
            });
        }
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.resolve(id).await?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiagramMetadata, DomainArrow, DomainNode, NodeType};

    fn sample(id: Option<&str>) -> DomainDiagram {
        let mut diagram = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "e:default"));
        diagram.metadata = Some(DiagramMetadata {
            id: id.map(str::to_string),
            name: Some("sample".into()),
            description: None,
            version: None,
        });
        diagram
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileDiagramStorage::new(dir.path());

        storage.save("flow", &sample(None)).await.unwrap();
        let loaded = storage.load("flow").await.unwrap();
        assert_eq!(loaded.nodes.len(), 2);
        assert_eq!(loaded.arrows.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_by_internal_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileDiagramStorage::new(dir.path());

        // Stored under a file name that differs from the internal id.
        storage.save("some-file", &sample(Some("real-id"))).await.unwrap();
        let loaded = storage.load("real-id").await.unwrap();
        assert_eq!(
            loaded.metadata.unwrap().id.as_deref(),
            Some("real-id")
        );
    }

    #[tokio::test]
    async fn test_missing_diagram_errors() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileDiagramStorage::new(dir.path());
        assert!(matches!(
            storage.load("ghost").await.unwrap_err(),
            DiagramError::Configuration(_)
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileDiagramStorage::new(dir.path());
        storage.save("one", &sample(None)).await.unwrap();
        storage.save("two", &sample(None)).await.unwrap();

        let entries = storage.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "one");
        assert_eq!(entries[0].format, DiagramFormat::Native);

        storage.delete("one").await.unwrap();
        assert_eq!(storage.list().await.unwrap().len(), 1);
    }
}
