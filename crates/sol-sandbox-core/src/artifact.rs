//! Build outputs and the transient artifact store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize, Serializer};
use sol_sandbox_types::encoding::sha256_hex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    /// Deployable `.so` program binary.
    Binary,
    /// Anchor IDL JSON.
    InterfaceDescriptor,
}

/// An immutable build output. `size` always equals `bytes.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    kind: ArtifactKind,
    bytes: Arc<[u8]>,
    sha256: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, kind: ArtifactKind, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let sha256 = sha256_hex(&bytes);
        Self {
            name: name.into(),
            kind,
            bytes,
            sha256,
        }
    }

    pub fn binary(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(name, ArtifactKind::Binary, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn is_binary(&self) -> bool {
        self.kind == ArtifactKind::Binary
    }

    pub fn summary(&self, id: Option<Uuid>) -> ArtifactSummary {
        ArtifactSummary {
            id,
            name: self.name.clone(),
            kind: self.kind,
            size: self.size(),
            sha256: self.sha256.clone(),
        }
    }
}

impl Serialize for Artifact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.summary(None).serialize(serializer)
    }
}

/// Metadata view of an artifact, without the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
    pub kind: ArtifactKind,
    pub size: usize,
    pub sha256: String,
}

#[derive(Debug, Clone)]
struct StoredArtifact {
    build_id: Uuid,
    artifact: Artifact,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<Uuid, StoredArtifact>,
    order: VecDeque<Uuid>,
}

/// In-memory artifact store with FIFO eviction once `capacity` is reached.
#[derive(Debug)]
pub struct ArtifactStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
}

impl ArtifactStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(StoreInner::default()),
        }
    }

    pub fn put(&self, build_id: Uuid, artifact: Artifact) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock();
        while inner.order.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner
            .entries
            .insert(id, StoredArtifact { build_id, artifact });
        inner.order.push_back(id);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Artifact> {
        self.inner
            .lock()
            .entries
            .get(id)
            .map(|stored| stored.artifact.clone())
    }

    pub fn take(&self, id: &Uuid) -> Option<Artifact> {
        let mut inner = self.inner.lock();
        let stored = inner.entries.remove(id)?;
        inner.order.retain(|existing| existing != id);
        Some(stored.artifact)
    }

    /// The binary produced by `build_id`, if still stored.
    pub fn binary_for(&self, build_id: &Uuid) -> Option<(Uuid, Artifact)> {
        self.find_for(build_id, ArtifactKind::Binary)
    }

    pub fn descriptor_for(&self, build_id: &Uuid) -> Option<(Uuid, Artifact)> {
        self.find_for(build_id, ArtifactKind::InterfaceDescriptor)
    }

    /// Build that produced artifact `id`.
    pub fn build_of(&self, id: &Uuid) -> Option<Uuid> {
        self.inner.lock().entries.get(id).map(|stored| stored.build_id)
    }

    fn find_for(&self, build_id: &Uuid, kind: ArtifactKind) -> Option<(Uuid, Artifact)> {
        let inner = self.inner.lock();
        inner.order.iter().find_map(|id| {
            let stored = inner.entries.get(id)?;
            (stored.build_id == *build_id && stored.artifact.kind() == kind)
                .then(|| (*id, stored.artifact.clone()))
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
