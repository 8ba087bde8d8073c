//! Collaborator seams. Identity and section reference data live outside the
//! engine; these traits are what it calls into.

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: Ulid,
    pub display_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub id: Ulid,
    pub name: String,
}

/// Identity lookup. Authentication is somebody else's problem.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, user_id: Ulid) -> Option<UserProfile>;
}

/// Read-only reference data for slot materialization.
#[async_trait]
pub trait SectionCatalog: Send + Sync {
    async fn get(&self, section_id: Ulid) -> Option<SectionInfo>;
}

pub struct InMemoryDirectory {
    users: DashMap<Ulid, UserProfile>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    pub fn insert(&self, profile: UserProfile) {
        self.users.insert(profile.id, profile);
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn get(&self, user_id: Ulid) -> Option<UserProfile> {
        self.users.get(&user_id).map(|e| e.value().clone())
    }
}

pub struct InMemoryCatalog {
    sections: DashMap<Ulid, SectionInfo>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            sections: DashMap::new(),
        }
    }

    pub fn insert(&self, section: SectionInfo) {
        self.sections.insert(section.id, section);
    }
}

#[async_trait]
impl SectionCatalog for InMemoryCatalog {
    async fn get(&self, section_id: Ulid) -> Option<SectionInfo> {
        self.sections.get(&section_id).map(|e| e.value().clone())
    }
}
