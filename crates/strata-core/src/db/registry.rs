//! Process-wide repository directory.
//!
//! Maps a repository identity to its `(adapter, cache, metadata)` triple.
//! Entries are immutable once registered; a restart registers a new entry
//! under a new `RepoId`.

use crate::{
    adapter::{Adapter, ChildSpec},
    config::{RepoConfig, RestartType},
    db::cache::{ErasedCache, QueryCache},
    error::InternalError,
    obs::sink::{self, MetricsEvent},
};
use derive_more::Display;
use std::{
    any::{Any, type_name},
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};
use thiserror::Error as ThisError;

///
/// RegistryError
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("repository '{0}' is not started")]
    NotStarted(RepoIdentity),

    #[error("repository '{0}' already started")]
    AlreadyStarted(String),

    #[error("repository '{repo}' runs adapter {found}, not {expected}")]
    AdapterMismatch {
        repo: RepoIdentity,
        expected: &'static str,
        found: &'static str,
    },
}

///
/// RepoId
/// Stable handle returned when a repository starts.
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("#{_0}")]
pub struct RepoId(u64);

impl RepoId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

///
/// RepoIdentity
/// How callers address a repository: by handle or by registered name.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum RepoIdentity {
    Id(RepoId),
    Name(String),
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<RepoId> for RepoIdentity {
    fn from(id: RepoId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for RepoIdentity {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for RepoIdentity {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

///
/// RepoEntry
///
/// Typed view of one registry entry. Cloning is cheap; every field is shared.
///

pub struct RepoEntry<A: Adapter> {
    id: RepoId,
    adapter: Arc<A>,
    cache: Arc<QueryCache<A::Prepared, A::Cached>>,
    meta: Arc<A::Meta>,
    config: Arc<RepoConfig>,
}

impl<A: Adapter> RepoEntry<A> {
    #[must_use]
    pub const fn id(&self) -> RepoId {
        self.id
    }

    #[must_use]
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<QueryCache<A::Prepared, A::Cached>> {
        &self.cache
    }

    #[must_use]
    pub const fn meta(&self) -> &Arc<A::Meta> {
        &self.meta
    }

    #[must_use]
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }
}

impl<A: Adapter> fmt::Debug for RepoEntry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoEntry")
            .field("id", &self.id)
            .field("adapter", &type_name::<A>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<A: Adapter> Clone for RepoEntry<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            adapter: self.adapter.clone(),
            cache: self.cache.clone(),
            meta: self.meta.clone(),
            config: self.config.clone(),
        }
    }
}

///
/// StartedRepo
/// What a successful start hands back to the caller's supervisor.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartedRepo {
    pub id: RepoId,
    pub child_spec: ChildSpec,
    pub started: Vec<String>,
}

// Registry-internal, type-erased form of a `RepoEntry<A>`.
struct StoredEntry {
    adapter: &'static str,
    name: Option<String>,
    entry: Arc<dyn Any + Send + Sync>,
    cache: Arc<dyn ErasedCache>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    repos: HashMap<RepoId, StoredEntry>,
    names: HashMap<String, RepoId>,
}

impl RegistryState {
    fn resolve(&self, repo: &RepoIdentity) -> Option<&StoredEntry> {
        let id = match repo {
            RepoIdentity::Id(id) => *id,
            RepoIdentity::Name(name) => *self.names.get(name)?,
        };

        self.repos.get(&id)
    }
}

///
/// Registry
///
/// Many concurrent readers, exclusive writers only during start/stop.
/// Lock guards are never held across adapter calls.
///

#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by the free functions of this module.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

        &GLOBAL
    }

    /// Start a repository: run the adapter lifecycle hooks, create its cache
    /// and make it visible to lookups.
    pub fn start<A: Adapter>(
        &self,
        adapter: A,
        config: RepoConfig,
        restart: RestartType,
    ) -> Result<StartedRepo, InternalError> {
        config.validate()?;
        if let Some(name) = &config.name
            && self.is_started(name.as_str())
        {
            return Err(RegistryError::AlreadyStarted(name.clone()).into());
        }

        let started = adapter.ensure_all_started(&config, restart)?;
        let (child_spec, meta) = adapter.init(&config)?;
        let id = self.allocate_id();
        adapter.setup(id, &config, &meta)?;

        let cache = Arc::new(QueryCache::<A::Prepared, A::Cached>::new(config.query_cache));
        let name = config.name.clone();
        let entry = RepoEntry {
            id,
            adapter: Arc::new(adapter),
            cache: cache.clone(),
            meta: Arc::new(meta),
            config: Arc::new(config),
        };

        {
            let mut state = self.write_state();
            if let Some(name) = &name {
                if state.names.contains_key(name) {
                    return Err(RegistryError::AlreadyStarted(name.clone()).into());
                }
                state.names.insert(name.clone(), id);
            }
            state.repos.insert(
                id,
                StoredEntry {
                    adapter: type_name::<A>(),
                    name: name.clone(),
                    entry: Arc::new(entry),
                    cache,
                },
            );
        }

        tracing::info!(
            repo = %id,
            name = name.as_deref(),
            adapter = type_name::<A>(),
            "repository started"
        );
        sink::record(MetricsEvent::RepoStarted);

        Ok(StartedRepo {
            id,
            child_spec,
            started,
        })
    }

    /// Remove a repository. Its cache is cleared; callers still holding a
    /// `RepoEntry` keep a working but detached view.
    pub fn stop(&self, repo: impl Into<RepoIdentity>) -> Result<RepoId, RegistryError> {
        let repo = repo.into();
        let (id, stored) = {
            let mut state = self.write_state();
            let id = match &repo {
                RepoIdentity::Id(id) => *id,
                RepoIdentity::Name(name) => *state
                    .names
                    .get(name)
                    .ok_or_else(|| RegistryError::NotStarted(repo.clone()))?,
            };
            let stored = state
                .repos
                .remove(&id)
                .ok_or_else(|| RegistryError::NotStarted(repo.clone()))?;
            if let Some(name) = &stored.name {
                state.names.remove(name);
            }

            (id, stored)
        };

        stored.cache.clear_all();
        tracing::info!(repo = %id, name = stored.name.as_deref(), "repository stopped");
        sink::record(MetricsEvent::RepoStopped);

        Ok(id)
    }

    /// Look up the adapter, cache and metadata of a running repository.
    pub fn lookup<A: Adapter>(
        &self,
        repo: impl Into<RepoIdentity>,
    ) -> Result<RepoEntry<A>, RegistryError> {
        let repo = repo.into();
        let state = self.read_state();
        let stored = state
            .resolve(&repo)
            .ok_or_else(|| RegistryError::NotStarted(repo.clone()))?;

        stored
            .entry
            .downcast_ref::<RepoEntry<A>>()
            .cloned()
            .ok_or_else(|| RegistryError::AdapterMismatch {
                repo: repo.clone(),
                expected: type_name::<A>(),
                found: stored.adapter,
            })
    }

    pub fn lookup_meta<A: Adapter>(
        &self,
        repo: impl Into<RepoIdentity>,
    ) -> Result<Arc<A::Meta>, RegistryError> {
        self.lookup::<A>(repo).map(|entry| entry.meta)
    }

    #[must_use]
    pub fn is_started(&self, repo: impl Into<RepoIdentity>) -> bool {
        self.read_state().resolve(&repo.into()).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_state().repos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn allocate_id(&self) -> RepoId {
        let mut state = self.write_state();
        state.next_id += 1;

        RepoId(state.next_id)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Look up a repository in the process-wide registry.
pub fn lookup<A: Adapter>(repo: impl Into<RepoIdentity>) -> Result<RepoEntry<A>, RegistryError> {
    Registry::global().lookup(repo)
}

/// Metadata of a repository in the process-wide registry.
pub fn lookup_meta<A: Adapter>(
    repo: impl Into<RepoIdentity>,
) -> Result<Arc<A::Meta>, RegistryError> {
    Registry::global().lookup_meta::<A>(repo)
}
