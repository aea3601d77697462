//! Encrypted repository index.
//!
//! The index is itself a sealed object (`_index`) holding
//! `{"files": [IndexEntry, ...]}` with absolute paths. It is fetched on first
//! use and kept until a forced refresh.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::api::client::OriginClient;
use crate::capability::{CapabilityError, IndexEntry, KeyMaterial, RepoIndex, RepoStats};

use super::container;

/// Name of the index object.
pub const INDEX_OBJECT: &str = "_index";

const INDEX_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IndexFile {
    #[serde(default)]
    pub files: Vec<IndexEntry>,
}

/// In-memory view of the index, sorted by path.
#[derive(Debug, Default)]
pub struct Catalog {
    files: Vec<IndexEntry>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(mut files: Vec<IndexEntry>) -> Self {
        for file in &mut files {
            if !file.path.starts_with('/') {
                file.path.insert(0, '/');
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);

        let by_id = files
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.file_id.clone().map(|id| (id, i)))
            .collect();
        Self { files, by_id }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn by_path(&self, path: &str) -> Option<&IndexEntry> {
        self.files
            .binary_search_by(|f| f.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.files[i])
    }

    pub fn by_id(&self, file_id: &str) -> Option<&IndexEntry> {
        self.by_id.get(file_id).map(|&i| &self.files[i])
    }

    /// Direct children of `folder`. Sub-folders are synthesized from the
    /// paths of the files below them and listed first.
    pub fn list_folder(&self, folder: &str) -> Vec<IndexEntry> {
        let prefix = if folder.ends_with('/') {
            folder.to_string()
        } else {
            format!("{}/", folder)
        };

        let mut dirs = BTreeSet::new();
        let mut files = Vec::new();
        for entry in &self.files {
            let Some(rest) = entry.path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) if !dir.is_empty() => {
                    dirs.insert(dir.to_string());
                }
                Some(_) => {}
                None if rest.is_empty() => {}
                None => files.push(IndexEntry {
                    path: rest.to_string(),
                    ..entry.clone()
                }),
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        dirs.into_iter()
            .map(|path| IndexEntry {
                path,
                is_dir: true,
                ..Default::default()
            })
            .chain(files)
            .collect()
    }
}

/// Index handle bound to one master key.
pub struct SealedIndex {
    origin: Arc<OriginClient>,
    key: KeyMaterial,
    catalog: RwLock<Option<Arc<Catalog>>>,
}

impl SealedIndex {
    pub fn new(origin: Arc<OriginClient>, key: KeyMaterial) -> Self {
        Self {
            origin,
            key,
            catalog: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<Catalog, CapabilityError> {
        let data = match self.origin.get_object(INDEX_OBJECT, None).await {
            Ok(data) => data,
            // A repository with no files yet has no index object.
            Err(CapabilityError::NotFound) => return Ok(Catalog::default()),
            Err(e) => return Err(e),
        };
        let opened = container::open_file(&data, &self.key)?;
        if opened.metadata.content_type != INDEX_CONTENT_TYPE {
            return Err(CapabilityError::Corrupted(format!(
                "index has content type '{}'",
                opened.metadata.content_type
            )));
        }
        let index: IndexFile = serde_json::from_slice(&opened.content)
            .map_err(|e| CapabilityError::Corrupted(format!("invalid index: {}", e)))?;
        log::debug!("Loaded index with {} entries", index.files.len());
        Ok(Catalog::new(index.files))
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, CapabilityError> {
        if let Some(catalog) = self.catalog.read().await.clone() {
            return Ok(catalog);
        }
        self.refresh(false).await?;
        self.catalog
            .read()
            .await
            .clone()
            .ok_or_else(|| CapabilityError::Corrupted("index unavailable".to_string()))
    }
}

#[async_trait]
impl RepoIndex for SealedIndex {
    async fn refresh(&self, force: bool) -> Result<(), CapabilityError> {
        let mut guard = self.catalog.write().await;
        if guard.is_some() && !force {
            return Ok(());
        }
        *guard = Some(Arc::new(self.fetch().await?));
        Ok(())
    }

    async fn stat(&self) -> Result<RepoStats, CapabilityError> {
        Ok(RepoStats {
            file_count: self.catalog().await?.len() as u64,
        })
    }

    async fn get_file_by_path(&self, path: &str) -> Result<Option<IndexEntry>, CapabilityError> {
        if !path.starts_with('/') {
            return Err(CapabilityError::InvalidRequest(
                "Path must start with /".to_string(),
            ));
        }
        let path = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };
        Ok(self.catalog().await?.by_path(path).cloned())
    }

    async fn get_file_by_id(&self, file_id: &str) -> Result<Option<IndexEntry>, CapabilityError> {
        Ok(self.catalog().await?.by_id(file_id).cloned())
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<IndexEntry>, CapabilityError> {
        if !path.starts_with('/') {
            return Err(CapabilityError::InvalidRequest(
                "Path must start with /".to_string(),
            ));
        }
        Ok(self.catalog().await?.list_folder(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, id: &str) -> IndexEntry {
        IndexEntry {
            path: path.to_string(),
            file_id: Some(id.to_string()),
            mime_type: Some("text/plain".to_string()),
            size: Some(3),
            ..Default::default()
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            file("/b.txt", "id-b"),
            file("/a.txt", "id-a"),
            file("/docs/one.md", "id-1"),
            file("/docs/deep/two.md", "id-2"),
            file("photos/cat.jpg", "id-cat"),
        ])
    }

    #[test]
    fn test_list_root_dirs_first() {
        let names: Vec<(String, bool)> = catalog()
            .list_folder("/")
            .into_iter()
            .map(|e| (e.path, e.is_dir))
            .collect();
        assert_eq!(
            names,
            vec![
                ("docs".to_string(), true),
                ("photos".to_string(), true),
                ("a.txt".to_string(), false),
                ("b.txt".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_list_subfolder_with_and_without_slash() {
        let c = catalog();
        let listed = c.list_folder("/docs");
        assert_eq!(listed, c.list_folder("/docs/"));
        assert_eq!(listed.len(), 2);
        assert!(listed[0].is_dir);
        assert_eq!(listed[0].path, "deep");
        assert_eq!(listed[1].path, "one.md");
        assert_eq!(listed[1].file_id.as_deref(), Some("id-1"));
    }

    #[test]
    fn test_list_missing_folder_is_empty() {
        assert!(catalog().list_folder("/nothing").is_empty());
    }

    #[test]
    fn test_lookups() {
        let c = catalog();
        assert_eq!(c.len(), 5);
        assert_eq!(c.by_path("/photos/cat.jpg").unwrap().file_id.as_deref(), Some("id-cat"));
        assert_eq!(c.by_id("id-2").unwrap().path, "/docs/deep/two.md");
        assert!(c.by_path("/docs").is_none());
        assert!(c.by_id("missing").is_none());
    }
}
