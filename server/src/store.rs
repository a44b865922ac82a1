//! Game state store access.
//!
//! Handlers never touch persistence directly. They go through a
//! [`StoreGateway`], which caps concurrent calls and gives each one a
//! deadline, so a slow store degrades single requests instead of stalling
//! the worker pool.

use crate::error::StoreError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::{Npc, PlayerCharacter, Templates};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Repository interface the server consumes.
///
/// Calls are synchronous and may block; the gateway runs them on the
/// blocking thread pool.
pub trait GameStore: Send + Sync + 'static {
    fn load_templates(&self) -> Result<Templates, StoreError>;

    fn load_npcs(&self) -> Result<Vec<Npc>, StoreError>;

    /// `Ok(None)` when no character has that first name.
    fn load_character_by_name(&self, name: &str) -> Result<Option<PlayerCharacter>, StoreError>;

    fn character_name_taken(&self, name: &str) -> Result<bool, StoreError>;

    /// Free character slots on `account` given a per-account maximum.
    fn remaining_slots(&self, account: &str, max: u32) -> Result<u32, StoreError>;

    fn create_character(&self, pc: PlayerCharacter) -> Result<(), StoreError>;

    /// First names of the characters on `account`, in creation order.
    fn character_list(&self, account: &str) -> Result<Vec<String>, StoreError>;
}

/// Contents of the JSON world file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorldSeed {
    pub templates: Templates,
    pub npcs: Vec<Npc>,
    pub characters: Vec<PlayerCharacter>,
}

/// Reference data shared read-only by every handler.
#[derive(Debug, Clone, Default)]
pub struct WorldData {
    pub templates: Templates,
    pub npcs: Vec<Npc>,
}

impl WorldData {
    /// Loads templates and NPCs once. Failure here aborts startup.
    pub fn load(store: &dyn GameStore) -> Result<Self, StoreError> {
        let templates = store.load_templates()?;
        let npcs = store.load_npcs()?;
        info!(
            "Loaded {} races, {} professions, {} items, {} spells, {} NPCs",
            templates.races.len(),
            templates.professions.len(),
            templates.items.len(),
            templates.spells.len(),
            npcs.len()
        );
        Ok(Self { templates, npcs })
    }
}

#[derive(Debug, Default)]
struct Characters {
    /// Insertion order, for character lists.
    order: Vec<String>,
    by_name: HashMap<String, PlayerCharacter>,
}

/// In-memory store seeded from a [`WorldSeed`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    templates: Templates,
    npcs: Vec<Npc>,
    characters: RwLock<Characters>,
}

impl MemoryStore {
    pub fn new(seed: WorldSeed) -> Self {
        let mut characters = Characters::default();
        for pc in seed.characters {
            if characters.by_name.contains_key(&pc.firstname) {
                continue;
            }
            characters.order.push(pc.firstname.clone());
            characters.by_name.insert(pc.firstname.clone(), pc);
        }

        Self {
            templates: seed.templates,
            npcs: seed.npcs,
            characters: RwLock::new(characters),
        }
    }

    /// Reads a world file. Missing or invalid files are errors.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let seed: WorldSeed = serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            "World file {} holds {} characters",
            path.display(),
            seed.characters.len()
        );
        Ok(Self::new(seed))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Characters>, StoreError> {
        self.characters
            .read()
            .map_err(|_| StoreError::Unavailable("character table poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Characters>, StoreError> {
        self.characters
            .write()
            .map_err(|_| StoreError::Unavailable("character table poisoned".to_string()))
    }
}

impl GameStore for MemoryStore {
    fn load_templates(&self) -> Result<Templates, StoreError> {
        Ok(self.templates.clone())
    }

    fn load_npcs(&self) -> Result<Vec<Npc>, StoreError> {
        Ok(self.npcs.clone())
    }

    fn load_character_by_name(&self, name: &str) -> Result<Option<PlayerCharacter>, StoreError> {
        Ok(self.read()?.by_name.get(name).cloned())
    }

    fn character_name_taken(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.by_name.contains_key(name))
    }

    fn remaining_slots(&self, account: &str, max: u32) -> Result<u32, StoreError> {
        let used = self
            .read()?
            .by_name
            .values()
            .filter(|pc| pc.account == account)
            .count() as u32;
        Ok(max.saturating_sub(used))
    }

    fn create_character(&self, pc: PlayerCharacter) -> Result<(), StoreError> {
        let mut characters = self.write()?;
        if characters.by_name.contains_key(&pc.firstname) {
            return Err(StoreError::NameTaken(pc.firstname));
        }
        debug!("Creating character {} on account {}", pc.firstname, pc.account);
        characters.order.push(pc.firstname.clone());
        characters.by_name.insert(pc.firstname.clone(), pc);
        Ok(())
    }

    fn character_list(&self, account: &str) -> Result<Vec<String>, StoreError> {
        let characters = self.read()?;
        Ok(characters
            .order
            .iter()
            .filter(|name| {
                characters
                    .by_name
                    .get(name.as_str())
                    .map_or(false, |pc| pc.account == account)
            })
            .cloned()
            .collect())
    }
}

/// Bounded, deadline-enforcing access to a [`GameStore`].
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn GameStore>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl StoreGateway {
    pub fn new(store: Arc<dyn GameStore>, pool_size: usize, timeout: Duration) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(pool_size)),
            timeout,
        }
    }

    /// Runs `f` against the store on the blocking pool
    ///
    /// Waiting for a permit counts against the same deadline as the call
    /// itself. A call that times out keeps running to completion in the
    /// background but its result is discarded.
    pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn GameStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);

        let work = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| StoreError::Unavailable("store gateway closed".to_string()))?;
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f(store.as_ref())
            })
            .await;
            match joined {
                Ok(result) => result,
                Err(e) => Err(StoreError::Unavailable(format!("store call panicked: {}", e))),
            }
        };

        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl std::fmt::Debug for StoreGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreGateway")
            .field("permits", &self.permits.available_permits())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ProfessionTemplate, RaceTemplate};
    use std::io::Write;

    fn seed() -> WorldSeed {
        WorldSeed {
            templates: Templates {
                races: vec![RaceTemplate {
                    name: "Human".to_string(),
                    description: String::new(),
                    strength_mod: 0,
                    constitution_mod: 0,
                    intelligence_mod: 0,
                    dexterity_mod: 0,
                }],
                professions: vec![ProfessionTemplate {
                    name: "Warrior".to_string(),
                    description: String::new(),
                    hp_per_level: 10,
                    mp_per_level: 0,
                    skills: Default::default(),
                }],
                items: vec![],
                spells: vec![],
            },
            npcs: vec![],
            characters: vec![
                PlayerCharacter::new("alice", "Joe", "Human", "Warrior", "Town"),
                PlayerCharacter::new("alice", "Ann", "Human", "Warrior", "Town"),
                PlayerCharacter::new("bob", "Bob", "Human", "Warrior", "Cave"),
            ],
        }
    }

    /// Store whose calls sleep, to exercise the gateway deadline.
    struct SlowStore(Duration);

    impl GameStore for SlowStore {
        fn load_templates(&self) -> Result<Templates, StoreError> {
            Ok(Templates::default())
        }
        fn load_npcs(&self) -> Result<Vec<Npc>, StoreError> {
            Ok(vec![])
        }
        fn load_character_by_name(&self, _: &str) -> Result<Option<PlayerCharacter>, StoreError> {
            std::thread::sleep(self.0);
            Ok(None)
        }
        fn character_name_taken(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn remaining_slots(&self, _: &str, max: u32) -> Result<u32, StoreError> {
            Ok(max)
        }
        fn create_character(&self, _: PlayerCharacter) -> Result<(), StoreError> {
            Ok(())
        }
        fn character_list(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_character_queries() {
        let store = MemoryStore::new(seed());

        let joe = store.load_character_by_name("Joe").unwrap().unwrap();
        assert_eq!(joe.account, "alice");
        assert!(store.load_character_by_name("Nobody").unwrap().is_none());

        assert!(store.character_name_taken("Bob").unwrap());
        assert!(!store.character_name_taken("Zed").unwrap());

        assert_eq!(store.remaining_slots("alice", 10).unwrap(), 8);
        assert_eq!(store.remaining_slots("alice", 1).unwrap(), 0);
        assert_eq!(store.remaining_slots("carol", 10).unwrap(), 10);

        assert_eq!(store.character_list("alice").unwrap(), ["Joe", "Ann"]);
        assert!(store.character_list("carol").unwrap().is_empty());
    }

    #[test]
    fn test_create_character() {
        let store = MemoryStore::new(seed());

        let zed = PlayerCharacter::new("alice", "Zed", "Human", "Warrior", "Town");
        store.create_character(zed.clone()).unwrap();
        assert_eq!(store.character_list("alice").unwrap(), ["Joe", "Ann", "Zed"]);

        let result = store.create_character(zed);
        assert!(matches!(result, Err(StoreError::NameTaken(name)) if name == "Zed"));
    }

    #[test]
    fn test_world_file_loading() {
        let path = std::env::temp_dir().join(format!("world-{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_json::to_string(&seed()).unwrap().as_bytes())
            .unwrap();
        drop(file);

        let store = MemoryStore::from_json_file(&path).unwrap();
        let world = WorldData::load(&store).unwrap();
        assert!(world.templates.race("Human").is_some());
        assert!(store.character_name_taken("Joe").unwrap());
        std::fs::remove_file(&path).unwrap();

        let missing = MemoryStore::from_json_file(&path);
        assert!(matches!(missing, Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_invalid_world_file() {
        let path = std::env::temp_dir().join(format!("bad-world-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let result = MemoryStore::from_json_file(&path);
        assert!(matches!(result, Err(StoreError::Parse { .. })));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_gateway_call() {
        let gateway = StoreGateway::new(Arc::new(MemoryStore::new(seed())), 2, Duration::from_secs(1));

        let list = gateway
            .call(|store| store.character_list("alice"))
            .await
            .unwrap();
        assert_eq!(list, ["Joe", "Ann"]);
        assert_eq!(gateway.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_gateway_timeout() {
        let gateway = StoreGateway::new(
            Arc::new(SlowStore(Duration::from_millis(300))),
            1,
            Duration::from_millis(50),
        );

        let result = gateway
            .call(|store| store.load_character_by_name("Joe"))
            .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));

        // Fast calls still complete once the slow one lets go of its permit.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let slots = gateway.call(|store| store.remaining_slots("x", 3)).await;
        assert_eq!(slots.unwrap(), 3);
    }
}
