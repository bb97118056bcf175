//! Locally stored admin/editor accounts shown in the admin panel.
//!
//! The directory is bookkeeping only: login is decided by the gate's
//! credential check, not by these records.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::clock::{Clock, SystemClock};
use super::storage::{KeyValueStore, StorageError};
use super::USERS_KEY;
use crate::config::AdminCredential;

lazy_static::lazy_static! {
    /// Lowercase letters, digits and underscores
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[a-z0-9_]{3,32}$").unwrap();
}

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Username must be 3-32 characters of lowercase letters, digits or '_'")]
    InvalidUsername,
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),
    #[error("Password must be at least {MIN_PASSWORD_LEN} characters long")]
    WeakPassword,
    #[error("User not found: {0}")]
    NotFound(String),
    #[error("At least one admin account must remain")]
    LastAdmin,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("Password hashing task failed: {0}")]
    HashTask(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

/// What the admin panel lists; never carries the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&LocalUser> for UserView {
    fn from(user: &LocalUser) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChanges {
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

pub struct UserDirectory {
    storage: Arc<dyn KeyValueStore>,
    seed: AdminCredential,
    clock: Arc<dyn Clock>,
    cost: u32,
    // Serialises read-modify-write cycles on the stored array.
    write_lock: Mutex<()>,
}

impl UserDirectory {
    pub fn new(storage: Arc<dyn KeyValueStore>, seed: AdminCredential) -> Self {
        Self {
            storage,
            seed,
            clock: Arc::new(SystemClock),
            cost: bcrypt::DEFAULT_COST,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn list(&self) -> Result<Vec<UserView>, UserError> {
        Ok(self.load()?.iter().map(UserView::from).collect())
    }

    pub async fn create(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<UserView, UserError> {
        validate_username(username)?;
        validate_password(password)?;
        let password_hash = self.hash_password(password).await?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut users = self.load()?;
        if users.iter().any(|u| u.username == username) {
            return Err(UserError::DuplicateUsername(username.to_string()));
        }

        let user = LocalUser {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            role,
            created_at: self.clock.now(),
            last_login: None,
        };
        let view = UserView::from(&user);
        users.push(user);
        self.save(&users)?;

        tracing::info!(username = %username, role = ?role, "local user created");
        Ok(view)
    }

    pub async fn update(&self, id: &str, changes: UserChanges) -> Result<UserView, UserError> {
        if let Some(username) = changes.username.as_deref() {
            validate_username(username)?;
        }
        let password_hash = match changes.password.as_deref() {
            Some(password) => {
                validate_password(password)?;
                Some(self.hash_password(password).await?)
            }
            None => None,
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut users = self.load()?;
        let index = users
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| UserError::NotFound(id.to_string()))?;

        if let Some(username) = changes.username.as_deref() {
            if users.iter().any(|u| u.id != id && u.username == username) {
                return Err(UserError::DuplicateUsername(username.to_string()));
            }
        }
        if changes.role == Some(Role::Editor)
            && users[index].role == Role::Admin
            && admin_count(&users) == 1
        {
            return Err(UserError::LastAdmin);
        }

        let user = &mut users[index];
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(hash) = password_hash {
            user.password_hash = hash;
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        let view = UserView::from(&*user);
        self.save(&users)?;

        tracing::info!(id = %id, "local user updated");
        Ok(view)
    }

    pub fn delete(&self, id: &str) -> Result<(), UserError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut users = self.load()?;
        let index = users
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| UserError::NotFound(id.to_string()))?;
        if users[index].role == Role::Admin && admin_count(&users) == 1 {
            return Err(UserError::LastAdmin);
        }
        let removed = users.remove(index);
        self.save(&users)?;

        tracing::info!(username = %removed.username, "local user deleted");
        Ok(())
    }

    /// Stamps `last_login` for a matching username; unknown names are ignored.
    pub fn record_login(&self, username: &str) -> Result<(), UserError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut users = self.load()?;
        if let Some(user) = users.iter_mut().find(|u| u.username == username) {
            user.last_login = Some(self.clock.now());
            self.save(&users)?;
        }
        Ok(())
    }

    /// bcrypt is CPU bound, so it runs on the blocking pool.
    async fn hash_password(&self, password: &str) -> Result<String, UserError> {
        let password = password.to_string();
        let cost = self.cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
        Ok(hash)
    }

    fn load(&self) -> Result<Vec<LocalUser>, UserError> {
        match self.storage.get(USERS_KEY) {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| UserError::Storage(StorageError::Json(e))),
            None => Ok(vec![LocalUser {
                id: "1".to_string(),
                username: self.seed.username.clone(),
                password_hash: self.seed.password_hash.clone(),
                role: Role::Admin,
                created_at: self.clock.now(),
                last_login: None,
            }]),
        }
    }

    fn save(&self, users: &[LocalUser]) -> Result<(), UserError> {
        let raw = serde_json::to_string(users).map_err(StorageError::from)?;
        self.storage.set(USERS_KEY, &raw)?;
        Ok(())
    }
}

fn admin_count(users: &[LocalUser]) -> usize {
    users.iter().filter(|u| u.role == Role::Admin).count()
}

fn validate_username(username: &str) -> Result<(), UserError> {
    if USERNAME_REGEX.is_match(username) {
        Ok(())
    } else {
        Err(UserError::InvalidUsername)
    }
}

fn validate_password(password: &str) -> Result<(), UserError> {
    if password.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(UserError::WeakPassword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::storage::MemoryStorage;
    use chrono::TimeZone;

    fn directory() -> (UserDirectory, Arc<MemoryStorage>, Arc<ManualClock>) {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let seed = AdminCredential {
            username: "deviem_admin".to_string(),
            password_hash: "$2b$04$seedhash".to_string(),
        };
        let dir = UserDirectory::new(storage.clone(), seed)
            .with_clock(clock.clone())
            .with_cost(4);
        (dir, storage, clock)
    }

    #[test]
    fn test_empty_directory_lists_seed_admin() {
        let (dir, storage, _) = directory();
        let users = dir.list().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "deviem_admin");
        assert_eq!(users[0].role, Role::Admin);
        // Listing alone does not write.
        assert!(storage.get(USERS_KEY).is_none());
    }

    #[tokio::test]
    async fn test_create_stores_hash_not_plaintext() {
        let (dir, storage, _) = directory();
        let view = dir.create("editor_one", "longenough", Role::Editor).await.unwrap();
        assert_eq!(view.role, Role::Editor);

        let raw = storage.get(USERS_KEY).unwrap();
        assert!(!raw.contains("longenough"));
        let stored: Vec<LocalUser> = serde_json::from_str(&raw).unwrap();
        let user = stored.iter().find(|u| u.username == "editor_one").unwrap();
        assert!(bcrypt::verify("longenough", &user.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let (dir, _, _) = directory();
        assert!(matches!(
            dir.create("No Spaces", "longenough", Role::Editor).await,
            Err(UserError::InvalidUsername)
        ));
        assert!(matches!(
            dir.create("editor", "short", Role::Editor).await,
            Err(UserError::WeakPassword)
        ));
        assert!(matches!(
            dir.create("deviem_admin", "longenough", Role::Editor).await,
            Err(UserError::DuplicateUsername(_))
        ));
    }

    #[tokio::test]
    async fn test_last_admin_cannot_be_removed_or_demoted() {
        let (dir, _, _) = directory();
        let seed_id = dir.list().unwrap()[0].id.clone();
        assert!(matches!(dir.delete(&seed_id), Err(UserError::LastAdmin)));
        let demote = UserChanges {
            role: Some(Role::Editor),
            ..Default::default()
        };
        assert!(matches!(dir.update(&seed_id, demote).await, Err(UserError::LastAdmin)));

        dir.create("second_admin", "longenough", Role::Admin).await.unwrap();
        dir.delete(&seed_id).unwrap();
        assert_eq!(dir.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_renames_and_rejects_duplicates() {
        let (dir, _, _) = directory();
        let editor = dir.create("editor_one", "longenough", Role::Editor).await.unwrap();

        let renamed = dir
            .update(
                &editor.id,
                UserChanges {
                    username: Some("editor_two".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.username, "editor_two");

        let clash = dir.update(
            &editor.id,
            UserChanges {
                username: Some("deviem_admin".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(clash, Err(UserError::DuplicateUsername(_))));
        assert!(matches!(
            dir.update("missing", UserChanges::default()).await,
            Err(UserError::NotFound(_))
        ));
    }

    #[test]
    fn test_record_login_stamps_time() {
        let (dir, _, clock) = directory();
        dir.record_login("deviem_admin").unwrap();
        let users = dir.list().unwrap();
        assert_eq!(users[0].last_login, Some(clock.now()));
        dir.record_login("nobody").unwrap();
    }

    #[tokio::test]
    async fn test_hashing_leaves_the_runtime_free() {
        let (dir, _, _) = directory();
        let dir = dir.with_cost(10);
        let start = std::time::Instant::now();

        let (created_after, slept_after) = tokio::join!(
            async {
                dir.create("editor_one", "longenough", Role::Editor)
                    .await
                    .unwrap();
                start.elapsed()
            },
            async {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                start.elapsed()
            }
        );

        // The timer fires while bcrypt is still working on the blocking pool.
        assert!(slept_after < created_after);
    }
}
