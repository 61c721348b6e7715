//! In-memory [`RemotePort`] test double used across the engine test
//! suites.
#![cfg(test)]

use crate::remote::{RemoteError, RemoteItem, RemoteResult, RemotePort};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockRemotePort {
    children: Mutex<HashMap<String, Vec<RemoteItem>>>,
    metas: Mutex<HashMap<String, RemoteItem>>,
    file_contents: Mutex<HashMap<String, Vec<u8>>>,
    folders: Mutex<HashMap<(String, String), String>>,
    next_folder_id: Mutex<u64>,
    uploads: Mutex<Vec<(String, String, String)>>,
    fail_downloads_for: Mutex<Vec<String>>,
    transient_failures_remaining: Mutex<HashMap<String, u32>>,
    fail_uploads_for: Mutex<Vec<String>>,
    transient_upload_failures_remaining: Mutex<HashMap<String, u32>>,
}

impl MockRemotePort {
    pub fn new() -> Self {
        MockRemotePort::default()
    }

    pub fn add_child(&self, parent_id: &str, item: RemoteItem) {
        self.metas.lock().unwrap().insert(item.id.clone(), item.clone());
        self.children
            .lock()
            .unwrap()
            .entry(parent_id.to_string())
            .or_default()
            .push(item);
    }

    /// Registers metadata for an item without listing it as anyone's
    /// child — used to make `get_meta` resolve a subtree root.
    pub fn set_meta(&self, item: RemoteItem) {
        self.metas.lock().unwrap().insert(item.id.clone(), item);
    }

    pub fn set_file_contents(&self, id: &str, bytes: Vec<u8>) {
        self.file_contents.lock().unwrap().insert(id.to_string(), bytes);
    }

    pub fn fail_downloads_permanently(&self, id: &str) {
        self.fail_downloads_for.lock().unwrap().push(id.to_string());
    }

    pub fn fail_transiently_then_succeed(&self, id: &str, failures: u32) {
        self.transient_failures_remaining
            .lock()
            .unwrap()
            .insert(id.to_string(), failures);
    }

    /// Every `upload` call for `name` fails permanently.
    pub fn fail_uploads_permanently(&self, name: &str) {
        self.fail_uploads_for.lock().unwrap().push(name.to_string());
    }

    /// The first `failures` `upload` calls for `name` fail transiently;
    /// subsequent calls succeed.
    pub fn fail_uploads_transiently_then_succeed(&self, name: &str, failures: u32) {
        self.transient_upload_failures_remaining
            .lock()
            .unwrap()
            .insert(name.to_string(), failures);
    }

    pub fn uploads(&self) -> Vec<(String, String, String)> {
        self.uploads.lock().unwrap().clone()
    }

    fn read_bytes(&self, id: &str) -> RemoteResult<Vec<u8>> {
        if self.fail_downloads_for.lock().unwrap().contains(&id.to_string()) {
            return Err(RemoteError::Permanent(format!("no access to {id}")));
        }
        let mut remaining = self.transient_failures_remaining.lock().unwrap();
        if let Some(count) = remaining.get_mut(id) {
            if *count > 0 {
                *count -= 1;
                return Err(RemoteError::Transient(format!("temporary failure for {id}")));
            }
        }
        self.file_contents
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::Permanent(format!("no content for {id}")))
    }
}

#[async_trait]
impl RemotePort for MockRemotePort {
    async fn list_children(&self, folder_id: &str) -> RemoteResult<Vec<RemoteItem>> {
        Ok(self
            .children
            .lock()
            .unwrap()
            .get(folder_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_meta(&self, item_id: &str) -> RemoteResult<RemoteItem> {
        self.metas
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| RemoteError::Permanent(format!("not found: {item_id}")))
    }

    async fn download_native(&self, file_id: &str, sink: &mut dyn Write) -> RemoteResult<()> {
        let bytes = self.read_bytes(file_id)?;
        sink.write_all(&bytes)
            .map_err(|e| RemoteError::Permanent(e.to_string()))
    }

    async fn export(
        &self,
        file_id: &str,
        _export_mime: &str,
        sink: &mut dyn Write,
    ) -> RemoteResult<()> {
        let bytes = self.read_bytes(file_id)?;
        sink.write_all(&bytes)
            .map_err(|e| RemoteError::Permanent(e.to_string()))
    }

    async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> RemoteResult<Option<String>> {
        Ok(self
            .folders
            .lock()
            .unwrap()
            .get(&(parent_id.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> RemoteResult<String> {
        let mut next = self.next_folder_id.lock().unwrap();
        *next += 1;
        let id = format!("folder-{next}");
        self.folders
            .lock()
            .unwrap()
            .insert((parent_id.to_string(), name.to_string()), id.clone());
        Ok(id)
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime: &str,
        source: &mut dyn Read,
    ) -> RemoteResult<RemoteItem> {
        if self.fail_uploads_for.lock().unwrap().contains(&name.to_string()) {
            return Err(RemoteError::Permanent(format!("no access to upload {name}")));
        }
        {
            let mut remaining = self.transient_upload_failures_remaining.lock().unwrap();
            if let Some(count) = remaining.get_mut(name) {
                if *count > 0 {
                    *count -= 1;
                    return Err(RemoteError::Transient(format!("temporary failure uploading {name}")));
                }
            }
        }

        let mut buf = Vec::new();
        source
            .read_to_end(&mut buf)
            .map_err(|e| RemoteError::Permanent(e.to_string()))?;
        self.uploads
            .lock()
            .unwrap()
            .push((parent_id.to_string(), name.to_string(), mime.to_string()));
        Ok(RemoteItem {
            id: format!("uploaded-{name}"),
            name: name.to_string(),
            path: format!("{parent_id}/{name}"),
            is_folder: false,
            size_bytes: buf.len() as u64,
            mime_type: mime.to_string(),
            modified_time: Some(chrono::Utc::now()),
        })
    }
}
