use std::collections::BTreeMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::errors::ServiceError;
use crate::types::MAX_UPLOAD_BYTES;

/// External blob collaborator: store bytes, get back a reference path. The
/// claim service keeps only the returned paths.
pub trait FileStore: Send + Sync {
    fn store(&self, filename: &str, bytes: &[u8]) -> Result<String, ServiceError>;
}

#[derive(Default)]
pub struct InMemoryFileStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().expect("blob lock").get(path).cloned()
    }
}

impl FileStore for InMemoryFileStore {
    fn store(&self, filename: &str, bytes: &[u8]) -> Result<String, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::Validation("empty upload"));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ServiceError::Validation("upload too large"));
        }
        let path = format!("uploads/{}-{}", Uuid::new_v4(), sanitize(filename));
        let mut blobs = self.blobs.lock().expect("blob lock");
        blobs.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }
}

fn sanitize(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
