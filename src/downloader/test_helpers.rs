//! Shared test doubles for downloader clients and downloader config storage.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::downloader::{
    AddRequest, AddResult, DownloaderClient, DownloaderType, Item, ItemStatus, RemoteFile,
    TestResult,
};
use crate::error::{DatabaseError, DownloaderError, Error, Result};
use crate::store::DownloaderStore;
use crate::types::{DownloaderRecord, InstanceId, Protocol};

/// Scripted client: every call pops the next queued response
pub(crate) struct FakeClient {
    id: InstanceId,
    test_result: TestResult,
    add_responses: Mutex<VecDeque<Result<AddResult>>>,
    get_responses: Mutex<VecDeque<Result<Item>>>,
    file_responses: Mutex<VecDeque<Result<Vec<RemoteFile>>>>,
    pub(crate) add_requests: Mutex<Vec<AddRequest>>,
    pub(crate) get_calls: AtomicUsize,
}

impl FakeClient {
    pub(crate) fn new(id: InstanceId) -> Self {
        Self {
            id,
            test_result: TestResult {
                success: true,
                message: Some("Connection test successful".into()),
                version: Some("v0.0.0".into()),
                ..Default::default()
            },
            add_responses: Mutex::new(VecDeque::new()),
            get_responses: Mutex::new(VecDeque::new()),
            file_responses: Mutex::new(VecDeque::new()),
            add_requests: Mutex::new(Vec::new()),
            get_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_test_result(mut self, result: TestResult) -> Self {
        self.test_result = result;
        self
    }

    pub(crate) fn push_add(&self, response: Result<AddResult>) {
        self.add_responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_get(&self, response: Result<Item>) {
        self.get_responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_files(&self, response: Result<Vec<RemoteFile>>) {
        self.file_responses.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl DownloaderClient for FakeClient {
    fn downloader_type(&self) -> DownloaderType {
        DownloaderType::Qbittorrent
    }

    fn instance_id(&self) -> &InstanceId {
        &self.id
    }

    async fn test(&self) -> Result<TestResult> {
        Ok(self.test_result.clone())
    }

    async fn add(&self, request: &AddRequest) -> Result<AddResult> {
        self.add_requests.lock().unwrap().push(request.clone());
        self.add_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(AddResult {
                    external_id: "0123456789abcdef0123456789abcdef01234567".into(),
                    name: "fake".into(),
                })
            })
    }

    async fn get(&self, external_id: &str) -> Result<Item> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.get_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DownloaderError::NotFound(external_id.to_string()).into()))
    }

    async fn list_files(&self, _external_id: &str) -> Result<Vec<RemoteFile>> {
        self.file_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DownloaderError::Unsupported("list_files".into()).into()))
    }
}

/// Backend item in a given state
pub(crate) fn item(status: ItemStatus, native: &str, progress: f64) -> Item {
    Item {
        external_id: "0123456789abcdef0123456789abcdef01234567".into(),
        name: "Some.Release.1080p".into(),
        status,
        native_status: native.into(),
        progress,
        save_path: "/downloads".into(),
        content_path: "/downloads/Some.Release.1080p".into(),
        added_at: 1_700_000_000,
        error: (status == ItemStatus::Errored).then(|| format!("downloader reported state {native}")),
    }
}

pub(crate) fn file(path: &str, size: i64) -> RemoteFile {
    RemoteFile {
        path: path.into(),
        size,
        progress: 1.0,
        priority: 1,
    }
}

pub(crate) fn downloader_record(kind: &str, url: &str, enabled: bool) -> DownloaderRecord {
    DownloaderRecord {
        id: InstanceId::new_v4(),
        name: format!("{kind} at {url}"),
        kind: kind.into(),
        protocol: "torrent".into(),
        url: url.into(),
        username: Some("admin".into()),
        password: Some("adminadmin".into()),
        config_json: None,
        enabled,
        is_default: false,
        created_at: 0,
        updated_at: 0,
    }
}

/// In-memory downloader configs
pub(crate) struct MemoryDownloaderStore {
    records: Mutex<HashMap<InstanceId, DownloaderRecord>>,
}

impl MemoryDownloaderStore {
    pub(crate) fn new(records: Vec<DownloaderRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    pub(crate) fn put(&self, record: DownloaderRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }
}

#[async_trait]
impl DownloaderStore for MemoryDownloaderStore {
    async fn list_downloaders(&self) -> Result<Vec<DownloaderRecord>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn get_downloader(&self, id: &InstanceId) -> Result<DownloaderRecord> {
        self.records
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("downloader {id}"))))
    }

    async fn get_default_downloader(&self, protocol: Protocol) -> Result<DownloaderRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.is_default && r.protocol == protocol.as_str())
            .cloned()
            .ok_or_else(|| {
                Error::Database(DatabaseError::NotFound(format!(
                    "default downloader for {protocol}"
                )))
            })
    }
}
