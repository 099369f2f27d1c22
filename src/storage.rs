//! On-disk document storage.
//!
//! Files land under `{root}/{customer_id}/{document_type}/{file_name}`.
//! The database stores the path relative to the store root, so the root can
//! move without rewriting rows.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::DocumentType;

/// Uploads larger than this are rejected (10 MiB).
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an uploaded file and return its path relative to the store
    /// root.
    pub async fn save(
        &self,
        customer_id: &str,
        document_type: DocumentType,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String> {
        if bytes.is_empty() {
            return Err(AppError::BadRequest(
                crate::error::msg::MISSING_DOCUMENT_FILE.into(),
            ));
        }
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(AppError::BadRequest("document exceeds size limit".into()));
        }

        let safe_name = sanitize_file_name(file_name);
        let relative = format!("{}/{}/{}", customer_id, document_type.as_ref(), safe_name);
        let full = self.root.join(&relative);

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("document dir create failed: {}", e)))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| AppError::Internal(format!("document write failed: {}", e)))?;

        Ok(relative)
    }
}

/// Strip path separators and control characters from an uploaded file name,
/// keeping only the final component.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_paths() {
        assert_eq!(sanitize_file_name("scan.pdf"), "scan.pdf");
        assert_eq!(sanitize_file_name("dir/scan.pdf"), "scan.pdf");
        assert_eq!(sanitize_file_name("..\\..\\evil.exe"), "evil.exe");
        assert_eq!(sanitize_file_name("../../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name("..."), "upload");
    }

    #[tokio::test]
    async fn test_save_and_reject_empty() {
        let dir = std::env::temp_dir().join(format!("mp_store_{}", std::process::id()));
        let store = DocumentStore::new(&dir);

        let rel = store
            .save(
                "mp_cus_x",
                DocumentType::DriversLicenseFront,
                "id.png",
                b"png bytes",
            )
            .await
            .unwrap();
        assert_eq!(rel, "mp_cus_x/drivers_license_front/id.png");
        assert!(dir.join(&rel).exists());

        let empty = store
            .save("mp_cus_x", DocumentType::DriversLicenseFront, "id.png", b"")
            .await;
        assert!(empty.is_err());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
