//! Temporary identity records for users mid-authentication.
//!
//! A user that has not yet been admitted to the permanent user database
//! still needs a resolvable identity while a login attempt is in flight.
//! The registry hands out provisional records with a collision-free uid
//! and a pseudonymous display name, and forgets them when the attempt
//! concludes or is abandoned.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use authgate_common::constants::{PREAUTH_HOMEDIR, PREAUTH_NAME_PREFIX, PREAUTH_SHELL};
use authgate_common::daemon_proto::ProvisionalUser;

// Collisions should be rare at any sane registry size. A source that
// keeps yielding live uids is treated the same as one that ran dry.
const MAX_ID_GENERATION_ATTEMPTS: u32 = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("maximum number of pre-auth users reached")]
    CapacityReached,
    #[error("identifier source exhausted without yielding a usable id")]
    IdentifiersExhausted,
    #[error("no pre-auth user found")]
    NotFound,
}

/// Yields candidate numeric identifiers. Candidates may collide with
/// identifiers already in use; the registry filters those out.
pub trait IdentifierSource: Send + Sync {
    /// The next candidate, or `None` once the supply is exhausted.
    fn generate_id(&self) -> Option<u32>;
}

/// Uniform random candidates from a fixed range. Never exhausts.
pub struct RandomIdSource {
    min: u32,
    max: u32,
}

impl RandomIdSource {
    pub fn new(min: u32, max: u32) -> Self {
        RandomIdSource { min, max }
    }
}

impl IdentifierSource for RandomIdSource {
    fn generate_id(&self) -> Option<u32> {
        Some(rand::thread_rng().gen_range(self.min..=self.max))
    }
}

/// One provisional user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreAuthUser {
    pub uid: u32,
    /// The stable login name the user authenticates under.
    pub login: String,
    /// Generated pseudonymous display name, unique while the record lives.
    pub name: String,
}

impl PreAuthUser {
    pub fn as_provisional(&self) -> ProvisionalUser {
        ProvisionalUser {
            name: self.name.clone(),
            uid: self.uid,
            gid: self.uid,
            gecos: String::new(),
            homedir: PREAUTH_HOMEDIR.to_string(),
            shell: PREAUTH_SHELL.to_string(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    users: HashMap<u32, PreAuthUser>,
    uid_by_login: HashMap<String, u32>,
    uid_by_name: HashMap<String, u32>,
    num_users: usize,
}

/// Concurrency-safe store of all provisional users in the process.
///
/// All three indexes and the population counter live behind one lock, so
/// every mutation is atomic: either the record exists in all of them and
/// is counted, or in none.
pub struct TempIdentityRegistry {
    id_source: Box<dyn IdentifierSource>,
    max_users: usize,
    inner: RwLock<RegistryInner>,
}

impl TempIdentityRegistry {
    pub fn new(id_source: Box<dyn IdentifierSource>) -> Self {
        Self::with_capacity(id_source, authgate_common::constants::MAX_PREAUTH_USERS)
    }

    pub fn with_capacity(id_source: Box<dyn IdentifierSource>, max_users: usize) -> Self {
        TempIdentityRegistry {
            id_source,
            max_users,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    // The maps stay consistent between operations, so a poisoned lock
    // only means a panic elsewhere while holding it.
    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|err| err.into_inner())
    }

    /// Registers a provisional user for `login` and returns its uid.
    ///
    /// Registering a login name that is already registered is idempotent
    /// and returns the existing uid without touching capacity.
    pub fn register_pre_auth_user(&self, login: &str) -> Result<u32, RegistryError> {
        let mut inner = self.write();

        if let Some(uid) = inner.uid_by_login.get(login) {
            return Ok(*uid);
        }

        if inner.num_users >= self.max_users {
            warn!(
                "maximum number of pre-auth users ({}) reached, rejecting {:?}",
                self.max_users, login
            );
            return Err(RegistryError::CapacityReached);
        }

        let mut uid = None;
        for _ in 0..MAX_ID_GENERATION_ATTEMPTS {
            let Some(candidate) = self.id_source.generate_id() else {
                break;
            };
            // uid 0 is reserved and always treated as in use.
            if candidate == 0 || inner.users.contains_key(&candidate) {
                continue;
            }
            uid = Some(candidate);
            break;
        }
        let Some(uid) = uid else {
            error!(
                "identifier source exhausted while registering pre-auth user {:?}",
                login
            );
            return Err(RegistryError::IdentifiersExhausted);
        };

        let name = loop {
            let candidate = format!("{}{}", PREAUTH_NAME_PREFIX, Uuid::new_v4().as_simple());
            if !inner.uid_by_name.contains_key(&candidate) {
                break candidate;
            }
        };

        let user = PreAuthUser {
            uid,
            login: login.to_string(),
            name: name.clone(),
        };

        inner.uid_by_login.insert(login.to_string(), uid);
        inner.uid_by_name.insert(name, uid);
        inner.users.insert(uid, user);
        inner.num_users += 1;

        debug!("registered pre-auth user {:?} with uid {}", login, uid);
        Ok(uid)
    }

    pub fn user_by_id(&self, uid: u32) -> Result<PreAuthUser, RegistryError> {
        self.read()
            .users
            .get(&uid)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    pub fn user_by_login(&self, login: &str) -> Result<PreAuthUser, RegistryError> {
        let inner = self.read();
        inner
            .uid_by_login
            .get(login)
            .and_then(|uid| inner.users.get(uid))
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    /// Look up a record under its generated pseudonymous display name.
    pub fn user_by_name(&self, name: &str) -> Result<PreAuthUser, RegistryError> {
        let inner = self.read();
        inner
            .uid_by_name
            .get(name)
            .and_then(|uid| inner.users.get(uid))
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    /// Removes the record for `uid`. Deleting an unknown uid is a silent
    /// no-op so teardown paths can always call this.
    pub fn delete_pre_auth_user(&self, uid: u32) {
        let mut inner = self.write();
        let Some(user) = inner.users.remove(&uid) else {
            return;
        };
        inner.uid_by_login.remove(&user.login);
        inner.uid_by_name.remove(&user.name);
        inner.num_users -= 1;
        debug!("removed pre-auth user {:?} with uid {}", user.login, uid);
    }

    pub fn len(&self) -> usize {
        self.read().num_users
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_users
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use std::sync::{Arc, Mutex};

    use super::*;

    pub(crate) struct ScriptedIdSource {
        ids: Mutex<Vec<u32>>,
    }

    impl ScriptedIdSource {
        pub(crate) fn new(ids: &[u32]) -> Box<Self> {
            Box::new(ScriptedIdSource {
                ids: Mutex::new(ids.to_vec()),
            })
        }
    }

    impl IdentifierSource for ScriptedIdSource {
        fn generate_id(&self) -> Option<u32> {
            let mut ids = self.ids.lock().expect("ids lock poisoned");
            if ids.is_empty() {
                None
            } else {
                Some(ids.remove(0))
            }
        }
    }

    #[test]
    fn test_register_pre_auth_user() {
        let records = TempIdentityRegistry::new(ScriptedIdSource::new(&[12345]));

        let uid = records
            .register_pre_auth_user("test")
            .expect("registration should succeed");
        assert_eq!(uid, 12345);
        assert_eq!(records.len(), 1);

        let user = records
            .user_by_login("test")
            .expect("user should be registered");
        assert_eq!(user.uid, 12345);
        assert_eq!(user.login, "test");
        assert!(user.name.starts_with(PREAUTH_NAME_PREFIX));

        records.delete_pre_auth_user(12345);
        assert_eq!(records.len(), 0);
        assert_eq!(
            records.user_by_login("test"),
            Err(RegistryError::NotFound)
        );
    }

    #[test]
    fn test_register_skips_uid_in_use() {
        // uid 0 (root) always exists.
        let records = TempIdentityRegistry::new(ScriptedIdSource::new(&[0, 12345]));

        let uid = records
            .register_pre_auth_user("test")
            .expect("registration should succeed");
        assert_eq!(uid, 12345);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_register_twice_is_idempotent() {
        let records = TempIdentityRegistry::new(ScriptedIdSource::new(&[12345, 99999]));

        let uid = records
            .register_pre_auth_user("test")
            .expect("registration should succeed");
        let again = records
            .register_pre_auth_user("test")
            .expect("re-registration should succeed");
        assert_eq!(uid, again);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_register_at_capacity() {
        let records =
            TempIdentityRegistry::with_capacity(ScriptedIdSource::new(&[1000, 2000]), 1);

        let uid = records
            .register_pre_auth_user("first")
            .expect("registration should succeed");
        assert_eq!(uid, 1000);

        assert_eq!(
            records.register_pre_auth_user("second"),
            Err(RegistryError::CapacityReached)
        );

        // The idempotent path bypasses the capacity check.
        let again = records
            .register_pre_auth_user("first")
            .expect("existing login must still register at capacity");
        assert_eq!(again, 1000);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_register_source_exhausted() {
        let records = TempIdentityRegistry::new(ScriptedIdSource::new(&[]));
        assert_eq!(
            records.register_pre_auth_user("test"),
            Err(RegistryError::IdentifiersExhausted)
        );
        assert_eq!(records.len(), 0);

        // Only colliding candidates on offer is exhaustion as well.
        let records = TempIdentityRegistry::new(ScriptedIdSource::new(&[500, 0, 500]));
        records
            .register_pre_auth_user("first")
            .expect("registration should succeed");
        assert_eq!(
            records.register_pre_auth_user("second"),
            Err(RegistryError::IdentifiersExhausted)
        );
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_user_by_id_and_name() {
        let records = TempIdentityRegistry::new(ScriptedIdSource::new(&[12345]));

        assert_eq!(records.user_by_id(12345), Err(RegistryError::NotFound));

        records
            .register_pre_auth_user("test")
            .expect("registration should succeed");

        let user = records.user_by_id(12345).expect("user should exist");
        assert_eq!(user.login, "test");

        let by_name = records
            .user_by_name(&user.name)
            .expect("lookup by display name should succeed");
        assert_eq!(by_name, user);

        records.delete_pre_auth_user(12345);
        assert_eq!(records.user_by_id(12345), Err(RegistryError::NotFound));
        assert_eq!(records.user_by_name(&user.name), Err(RegistryError::NotFound));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let records = TempIdentityRegistry::new(ScriptedIdSource::new(&[12345]));
        records
            .register_pre_auth_user("test")
            .expect("registration should succeed");

        records.delete_pre_auth_user(4242);
        assert_eq!(records.len(), 1);

        records.delete_pre_auth_user(12345);
        assert_eq!(records.len(), 0);

        records.delete_pre_auth_user(12345);
        assert_eq!(records.len(), 0);
    }

    #[test]
    fn test_uid_is_reusable_after_delete() {
        let records = TempIdentityRegistry::new(ScriptedIdSource::new(&[0, 500, 500, 777]));

        let uid = records
            .register_pre_auth_user("alice")
            .expect("registration should succeed");
        assert_eq!(uid, 500);

        let again = records
            .register_pre_auth_user("alice")
            .expect("re-registration should succeed");
        assert_eq!(again, 500);

        records.delete_pre_auth_user(500);

        // 500 is free again, so the next registration takes it.
        let uid = records
            .register_pre_auth_user("alice")
            .expect("registration should succeed");
        assert_eq!(uid, 500);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_concurrent_registration_is_collision_free() {
        let ids: Vec<u32> = (1..=64).collect();
        let records = Arc::new(TempIdentityRegistry::new(ScriptedIdSource::new(&ids)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let records = records.clone();
                std::thread::spawn(move || {
                    (0..8)
                        .map(|j| {
                            records
                                .register_pre_auth_user(&format!("user-{}-{}", i, j))
                                .expect("registration should succeed")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut uids: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("worker thread panicked"))
            .collect();
        uids.sort_unstable();
        uids.dedup();
        assert_eq!(uids.len(), 64);
        assert_eq!(records.len(), 64);
    }

    #[test]
    fn test_random_id_source_stays_in_range() {
        let source = RandomIdSource::new(1000, 1010);
        for _ in 0..100 {
            let id = source.generate_id().expect("random source never exhausts");
            assert!((1000..=1010).contains(&id));
        }
    }
}
