//! NamespaceLister: one level of a bucket's virtual folder tree.
//!
//! Keys are flat strings; folders exist only as shared `/`-separated
//! prefixes. A listing shows the objects directly under a prefix and the
//! distinct first segments of everything deeper.

use std::collections::BTreeSet;
use tracing::debug;

use crate::{
    errors::StorageResult,
    models::{
        client::AuthenticatedClient,
        file::{FileSummary, FolderListing},
    },
    services::catalog::Catalog,
};

#[derive(Clone)]
pub struct NamespaceLister {
    catalog: Catalog,
}

impl NamespaceLister {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// List one level of `bucket_id` below `path`.
    ///
    /// Leading and trailing slashes in `path` are ignored; an empty path is
    /// the bucket root. The bucket must exist, belong to `client` and not be
    /// archived.
    pub async fn list(
        &self,
        client: &AuthenticatedClient,
        bucket_id: i64,
        path: &str,
    ) -> StorageResult<FolderListing> {
        self.catalog
            .require_active_bucket(
                bucket_id,
                &client.client_id,
                "Cannot list files in an archived bucket",
            )
            .await?;

        let path = path.trim_matches('/');
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let rows = self.catalog.list_files_with_prefix(bucket_id, &prefix).await?;
        let (files, folders) = project_level(&prefix, rows);
        debug!(
            bucket_id,
            path,
            files = files.len(),
            folders = folders.len(),
            "listed folder"
        );

        Ok(FolderListing {
            bucket_id,
            path: path.to_string(),
            files,
            folders,
        })
    }
}

/// Split rows found under `prefix` into direct children and sub-folder names.
///
/// `prefix` is either empty or ends with `/`. Rows outside the prefix, and a
/// row whose key equals the prefix, are skipped. Input order is kept for
/// files; folder names come back sorted and unique.
pub fn project_level(prefix: &str, rows: Vec<FileSummary>) -> (Vec<FileSummary>, Vec<String>) {
    let mut files = Vec::new();
    let mut folders = BTreeSet::new();

    for row in rows {
        let Some(rest) = row.key.strip_prefix(prefix) else {
            continue;
        };
        match rest.split_once('/') {
            None if rest.is_empty() => {}
            None => files.push(row),
            Some(("", _)) => {}
            Some((folder, _)) => {
                folders.insert(folder.to_string());
            }
        }
    }

    (files, folders.into_iter().collect())
}
