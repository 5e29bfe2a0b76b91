//! DeletionCoordinator: bulk soft delete of objects.
//!
//! Each target is handled on its own: the payload is removed from disk first
//! and the tombstone is written only after that succeeds. Every requested id
//! ends up in exactly one of `deleted`, `missing` or `failed`; one bad target
//! never stops the rest. Records whose upload never completed own no bytes
//! and are reported as missing without touching the disk.

use std::{collections::HashSet, io::ErrorKind};
use tracing::{debug, info, warn};

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        client::AuthenticatedClient,
        file::{DeleteFilesRequest, DeleteReport, FileLocation},
    },
    services::{catalog::Catalog, disk::DiskStore, path_resolver},
};

#[derive(Clone)]
pub struct DeletionCoordinator {
    catalog: Catalog,
    disk: DiskStore,
}

enum Outcome {
    Deleted,
    Missing,
    Failed,
}

impl DeletionCoordinator {
    pub fn new(catalog: Catalog, disk: DiskStore) -> Self {
        Self { catalog, disk }
    }

    /// Dispatch a `DELETE /files` body to one of the two modes.
    pub async fn delete(
        &self,
        client: &AuthenticatedClient,
        req: &DeleteFilesRequest,
    ) -> StorageResult<DeleteReport> {
        let has_ids = !req.file_ids.is_empty();
        let path = req.path.as_deref().filter(|p| !p.is_empty());

        match (has_ids, req.bucket_id, path) {
            (true, _, Some(_)) => Err(StorageError::validation(
                "file_ids and path cannot be used together",
            )),
            (true, _, None) => self.delete_by_ids(client, &req.file_ids).await,
            (false, Some(bucket_id), Some(path)) => {
                self.delete_by_path(client, bucket_id, path).await
            }
            (false, None, Some(_)) => Err(StorageError::validation(
                "bucket_id is required when path is provided",
            )),
            (false, _, None) => Err(StorageError::validation(
                "Either file_ids or (bucket_id and path) is required",
            )),
        }
    }

    /// Delete objects by id.
    ///
    /// Ids that are unknown, already deleted or owned by another client are
    /// reported as missing. Duplicates are collapsed, keeping first-seen order.
    pub async fn delete_by_ids(
        &self,
        client: &AuthenticatedClient,
        ids: &[String],
    ) -> StorageResult<DeleteReport> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let located = self
            .catalog
            .locate_files_by_ids(&client.client_id, &ids)
            .await?;

        let mut report = DeleteReport::default();
        for id in ids {
            match located.iter().find(|loc| loc.id == id) {
                Some(location) => {
                    let outcome = self.remove_one(location).await;
                    record(&mut report, id, outcome);
                }
                None => report.missing.push(id),
            }
        }

        info!(
            client_id = %client.client_id,
            deleted = report.deleted.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "bulk delete by id finished"
        );
        Ok(report)
    }

    /// Delete every live object under the folder `path` of a bucket.
    pub async fn delete_by_path(
        &self,
        client: &AuthenticatedClient,
        bucket_id: i64,
        path: &str,
    ) -> StorageResult<DeleteReport> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(StorageError::validation("path is required"));
        }

        self.catalog
            .require_active_bucket(
                bucket_id,
                &client.client_id,
                "Cannot delete files in an archived bucket",
            )
            .await?;

        let located = self
            .catalog
            .locate_files_with_prefix(&client.client_id, bucket_id, &format!("{path}/"))
            .await?;
        if located.is_empty() {
            return Err(StorageError::validation("No files found at the given path"));
        }

        let mut report = DeleteReport::default();
        for location in &located {
            let outcome = self.remove_one(location).await;
            record(&mut report, location.id.clone(), outcome);
        }

        info!(
            client_id = %client.client_id,
            bucket_id,
            path,
            deleted = report.deleted.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "bulk delete by path finished"
        );
        Ok(report)
    }

    async fn remove_one(&self, location: &FileLocation) -> Outcome {
        // a pending row has no bytes; the file at its path belongs to another row
        if location.uploaded_at.is_none() {
            debug!(file_id = %location.id, "skipping delete of a record that was never uploaded");
            return Outcome::Missing;
        }

        let file_path =
            path_resolver::resolve(&location.client_name, &location.bucket_name, &location.key);

        match self.disk.remove(&file_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Outcome::Missing,
            Err(err) => {
                warn!(file_id = %location.id, path = %file_path.display(), error = %err, "failed to remove file");
                return Outcome::Failed;
            }
        }

        match self.catalog.mark_deleted(&location.id).await {
            Ok(true) => Outcome::Deleted,
            Ok(false) => Outcome::Missing,
            Err(err) => {
                warn!(file_id = %location.id, error = %err, "failed to write tombstone");
                Outcome::Failed
            }
        }
    }
}

fn record(report: &mut DeleteReport, id: String, outcome: Outcome) {
    match outcome {
        Outcome::Deleted => report.deleted.push(id),
        Outcome::Missing => report.missing.push(id),
        Outcome::Failed => report.failed.push(id),
    }
}
