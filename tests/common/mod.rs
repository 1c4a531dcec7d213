//! Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serve_guard::memory::{CacheHandle, HandleError, ModelHandle};
use serve_guard::recovery::{
    BackendError, CachedResponse, GenerationParams, InferenceBackend, ResponseCache,
};
use serve_guard::resources::{MemoryReading, ResourceSampler, ResourceSnapshot, MB};

pub const HOST_TOTAL_MB: u64 = 16 * 1024;

#[derive(Debug, Clone, Copy)]
struct HostState {
    cpu: f64,
    memory_percent: f64,
    gpu: Option<f64>,
}

/// Host whose readings the test sets directly. 16 GB of memory.
pub struct ScriptedHost {
    state: Mutex<HostState>,
}

impl ScriptedHost {
    pub fn new(cpu: f64, memory_percent: f64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HostState {
                cpu,
                memory_percent,
                gpu: None,
            }),
        })
    }

    pub fn set_cpu(&self, cpu: f64) {
        self.state.lock().unwrap().cpu = cpu;
    }

    pub fn set_memory(&self, memory_percent: f64) {
        self.state.lock().unwrap().memory_percent = memory_percent;
    }

    pub fn set_gpu(&self, gpu: Option<f64>) {
        self.state.lock().unwrap().gpu = gpu;
    }

    fn reading(&self) -> MemoryReading {
        let percent = self.state.lock().unwrap().memory_percent;
        let total = HOST_TOTAL_MB * MB;
        let used = (total as f64 * percent / 100.0) as u64;
        MemoryReading::from_bytes(total, total - used, used)
    }
}

impl ResourceSampler for ScriptedHost {
    fn sample(&self) -> ResourceSnapshot {
        let state = *self.state.lock().unwrap();
        let memory = self.reading();
        ResourceSnapshot {
            cpu_percent: state.cpu,
            memory_percent: memory.usage_percent,
            memory_available_mb: memory.available_bytes / MB,
            gpu_percent: state.gpu,
            gpu_memory_free_mb: state.gpu.map(|_| 4096),
            load_average: state.cpu / 25.0,
            process_count: 100,
            timestamp: SystemTime::now(),
        }
    }

    fn sample_memory(&self) -> MemoryReading {
        self.reading()
    }
}

/// Backend with per-model canned answers. Unknown models are unavailable.
#[derive(Default)]
pub struct FakeBackend {
    answers: HashMap<String, String>,
    default_answer: Option<String>,
    failures_before_success: AtomicU32,
    calls: Mutex<Vec<(Option<String>, String, GenerationParams)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(mut self, model_id: &str, answer: &str) -> Self {
        self.answers.insert(model_id.to_string(), answer.to_string());
        self
    }

    /// Answer for any model without its own canned answer.
    pub fn default_answer(mut self, answer: &str) -> Self {
        self.default_answer = Some(answer.to_string());
        self
    }

    /// Time out this many calls before answering.
    pub fn failing_first(self, failures: u32) -> Self {
        self.failures_before_success.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<(Option<String>, String, GenerationParams)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn execute(
        &self,
        model_id: Option<&str>,
        query: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((model_id.map(str::to_string), query.to_string(), *params));

        let remaining = self.failures_before_success.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Timeout);
        }

        let answer = model_id
            .and_then(|id| self.answers.get(id).cloned())
            .or_else(|| self.default_answer.clone());
        answer.ok_or_else(|| BackendError::Unavailable(model_id.unwrap_or("default").to_string()))
    }
}

pub struct FakeCache {
    pub hit: Option<CachedResponse>,
}

#[async_trait]
impl ResponseCache for FakeCache {
    async fn lookup(&self, _query: &str) -> Option<CachedResponse> {
        self.hit.clone()
    }
}

/// Cache whose clear drops host memory usage to `relieved_to` percent.
pub struct RelievingCache {
    pub host: Arc<ScriptedHost>,
    pub relieved_to: f64,
    pub clears: AtomicUsize,
}

impl CacheHandle for RelievingCache {
    fn name(&self) -> &str {
        "relieving-cache"
    }

    fn clear(&self) -> Result<u64, HandleError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.host.set_memory(self.relieved_to);
        Ok(256 * MB)
    }
}

pub struct BrokenCache;

impl CacheHandle for BrokenCache {
    fn name(&self) -> &str {
        "broken-cache"
    }

    fn clear(&self) -> Result<u64, HandleError> {
        Err(HandleError::Failed("eviction failed".into()))
    }
}

pub struct RecordingModel {
    pub id: String,
    pub active: bool,
    pub unloads: AtomicUsize,
}

impl RecordingModel {
    pub fn new(id: &str, active: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            active,
            unloads: AtomicUsize::new(0),
        })
    }

    pub fn unload_count(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

impl ModelHandle for RecordingModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn unload(&self) -> Result<u64, HandleError> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(512 * MB)
    }
}
