pub mod properties;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// 영속 상태. 프로세스가 실제로 살아있는지는 Supervisor 추적 테이블이 기준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Running,
    Stopping,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
        }
    }
}

/// 서버 인스턴스 - 관리 대상 마인크래프트 서버 한 개
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInstance {
    pub id: String,                    // 고유 ID (uuid)
    pub name: String,                  // 사용자 지정 이름
    #[serde(default)]
    pub folder_name: String,           // servers/ 아래 폴더 이름 (비어 있으면 id)
    pub version: String,               // 게임 버전 (예: "1.20.4")
    pub loader: String,                // vanilla / paper / fabric / forge / neoforge
    pub port: u16,                     // 할당된 서버 포트
    pub ram: u32,                      // 최대 힙 (MB)
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub custom_args: String,           // 추가 JVM 인수 (공백 구분)
}

impl ServerInstance {
    pub fn new(name: &str, loader: &str, version: &str, port: u16, ram: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            folder_name: String::new(),
            version: version.to_string(),
            loader: loader.to_string(),
            port,
            ram,
            status: InstanceStatus::Stopped,
            custom_args: String::new(),
        }
    }

    /// Working directory under `servers_root`.
    pub fn working_dir(&self, servers_root: &Path) -> PathBuf {
        let folder = if self.folder_name.is_empty() { &self.id } else { &self.folder_name };
        servers_root.join(folder)
    }
}

/// Persistence boundary the supervisor depends on.
pub trait InstanceRepository: Send + Sync {
    fn get_instance(&self, id: &str) -> Result<Option<ServerInstance>>;
    fn list_instances(&self) -> Result<Vec<ServerInstance>>;
    fn update_status(&self, id: &str, status: InstanceStatus) -> Result<()>;
    fn update_port(&self, id: &str, port: u16) -> Result<()>;
}

/// 인스턴스 저장소 - instances.json 관리
pub struct JsonInstanceStore {
    file_path: PathBuf,
    instances: Mutex<Vec<ServerInstance>>,
}

impl JsonInstanceStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            instances: Mutex::new(Vec::new()),
        }
    }

    /// Open the store and load whatever is on disk.
    pub fn open(file_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(file_path);
        store.load()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<ServerInstance>>> {
        self.instances
            .lock()
            .map_err(|e| anyhow::anyhow!("instance store lock poisoned: {}", e))
    }

    /// 파일에서 인스턴스 로드
    pub fn load(&self) -> Result<()> {
        let mut instances = self.lock()?;
        if !self.file_path.exists() {
            tracing::info!("Instance store file does not exist, starting empty");
            instances.clear();
            return Ok(());
        }

        let content = fs::read_to_string(&self.file_path)?;
        *instances = serde_json::from_str(&content)?;
        tracing::info!("Loaded {} instances", instances.len());
        Ok(())
    }

    fn save(&self, instances: &[ServerInstance]) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(instances)?;
        fs::write(&self.file_path, content)?;
        tracing::debug!("Saved {} instances", instances.len());
        Ok(())
    }

    /// 인스턴스 추가
    pub fn add(&self, instance: ServerInstance) -> Result<()> {
        let mut instances = self.lock()?;
        if instances.iter().any(|i| i.id == instance.id) {
            return Err(anyhow::anyhow!("Instance already exists: {}", instance.id));
        }
        instances.push(instance);
        self.save(&instances)
    }

    /// 인스턴스 제거
    pub fn remove(&self, id: &str) -> Result<()> {
        let mut instances = self.lock()?;
        instances.retain(|i| i.id != id);
        self.save(&instances)
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut ServerInstance)) -> Result<()> {
        let mut instances = self.lock()?;
        let instance = instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| anyhow::anyhow!("Instance not found: {}", id))?;
        f(instance);
        self.save(&instances)
    }
}

impl InstanceRepository for JsonInstanceStore {
    fn get_instance(&self, id: &str) -> Result<Option<ServerInstance>> {
        Ok(self.lock()?.iter().find(|i| i.id == id).cloned())
    }

    fn list_instances(&self) -> Result<Vec<ServerInstance>> {
        Ok(self.lock()?.clone())
    }

    fn update_status(&self, id: &str, status: InstanceStatus) -> Result<()> {
        self.modify(id, |i| i.status = status)
    }

    fn update_port(&self, id: &str, port: u16) -> Result<()> {
        self.modify(id, |i| i.port = port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&InstanceStatus::Stopping).unwrap(), "\"STOPPING\"");
        let parsed: InstanceStatus = serde_json::from_str("\"RUNNING\"").unwrap();
        assert_eq!(parsed, InstanceStatus::Running);
        assert_eq!(InstanceStatus::Stopped.as_str(), "STOPPED");
    }

    #[test]
    fn test_working_dir_falls_back_to_id() {
        let mut inst = ServerInstance::new("survival", "paper", "1.20.4", 25565, 4096);
        let root = Path::new("/srv/mc");
        assert_eq!(inst.working_dir(root), root.join(&inst.id));

        inst.folder_name = "survival-world".into();
        assert_eq!(inst.working_dir(root), root.join("survival-world"));
    }

    #[test]
    fn test_store_roundtrip_and_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");

        let store = JsonInstanceStore::open(&path).unwrap();
        assert!(store.list_instances().unwrap().is_empty());

        let inst = ServerInstance::new("creative", "vanilla", "1.21.1", 25570, 2048);
        let id = inst.id.clone();
        store.add(inst).unwrap();
        store.update_status(&id, InstanceStatus::Running).unwrap();
        store.update_port(&id, 25571).unwrap();

        // 새로 열어도 같은 내용
        let reopened = JsonInstanceStore::open(&path).unwrap();
        let loaded = reopened.get_instance(&id).unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Running);
        assert_eq!(loaded.port, 25571);
        assert_eq!(loaded.name, "creative");
    }

    #[test]
    fn test_update_unknown_instance_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonInstanceStore::new(dir.path().join("instances.json"));
        assert!(store.update_status("ghost", InstanceStatus::Stopped).is_err());
        assert!(store.get_instance("ghost").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonInstanceStore::new(dir.path().join("instances.json"));
        let inst = ServerInstance::new("a", "paper", "1.20.1", 25565, 1024);
        store.add(inst.clone()).unwrap();
        assert!(store.add(inst).is_err());
    }
}
