//! Process-wide view of all containers and their classifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::classify::{Classification, Classifier, EXPORTER_LABEL};
use crate::container::{Container, ContainerID};
use crate::error::{Error, Result, ResultOkLogExt};
use crate::exporter::TARGET_LABEL;
use crate::runtime::{ContainerRuntime, RuntimeAdapter};

/// A container together with its classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerEntry {
    pub info: Container,
    pub classification: Classification,
}

/// Container id to entry. A published snapshot is never mutated; updates publish a new one.
pub type InventorySnapshot = HashMap<ContainerID, ContainerEntry>;

type RefreshOutcome = Option<Result<Arc<InventorySnapshot>>>;
type Inflight = std::sync::Mutex<Option<watch::Receiver<RefreshOutcome>>>;

/// Holds the last computed [`InventorySnapshot`].
///
/// Readers clone an `Arc` out of a watch cell and never wait for a refresh. Concurrent
/// [`refresh`](InventoryCache::refresh) calls are coalesced into one runtime listing, which
/// runs on its own task so that a caller going away does not cancel it for the others.
///
/// A refresh never publishes an entry older than a [`reconcile`](InventoryCache::reconcile)
/// that happened while it was listing.
pub struct InventoryCache<R> {
    inner: Arc<Inner<R>>,
}

struct Inner<R> {
    runtime: Arc<RuntimeAdapter<R>>,
    classifier: Arc<dyn Classifier>,
    snapshot: watch::Sender<Arc<InventorySnapshot>>,
    inflight: Inflight,
    /// Bumped by every reconcile.
    epoch: AtomicU64,
    /// Reconciled entries with the epoch they were published at; `None` marks a removal.
    /// Only touched while the snapshot cell is locked for writing.
    reconciled: DashMap<ContainerID, (u64, Option<ContainerEntry>)>,
}

/// Clears the in-flight refresh when the refresh task ends, including by panic.
struct ClearInflight<'a>(&'a Inflight);

impl Drop for ClearInflight<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<R> Clone for InventoryCache<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ContainerRuntime> InventoryCache<R> {
    pub fn new(runtime: Arc<RuntimeAdapter<R>>, classifier: Arc<dyn Classifier>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(InventorySnapshot::new()));
        Self {
            inner: Arc::new(Inner {
                runtime,
                classifier,
                snapshot,
                inflight: Inflight::default(),
                epoch: AtomicU64::new(0),
                reconciled: DashMap::new(),
            }),
        }
    }

    /// Returns the last published snapshot; empty before the first successful refresh.
    pub fn get_snapshot(&self) -> Arc<InventorySnapshot> {
        Arc::clone(&self.inner.snapshot.borrow())
    }

    /// Lists and classifies all containers and publishes the result.
    ///
    /// Joins the refresh in flight if there is one.
    ///
    /// # Errors
    ///
    /// Returns the runtime error if listing fails; the previous snapshot stays published.
    pub async fn refresh(&self) -> Result<Arc<InventorySnapshot>> {
        let mut outcome = {
            let mut inflight = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match inflight.as_ref() {
                Some(outcome) => {
                    log::trace!("Joining inventory refresh in flight");
                    outcome.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *inflight = Some(rx.clone());
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let guard = ClearInflight(&inner.inflight);
                        let result = inner.rebuild().await;
                        drop(guard);
                        tx.send_replace(Some(result));
                    });
                    rx
                }
            }
        };

        let result = outcome
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone());
        match result {
            Ok(Some(result)) => result,
            _ => Err(Error::Runtime("inventory refresh was aborted".to_owned())),
        }
    }

    /// Refreshes every `period` on a background task, picking up changes made outside the
    /// gateway. The first refresh happens one period from now.
    pub fn spawn_periodic_refresh(&self, period: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if let Some(snapshot) = cache.refresh().await.ok_log() {
                    log::trace!("Periodic refresh saw {} containers", snapshot.len());
                }
            }
        })
    }

    /// Re-inspects `id` after a lifecycle operation and publishes a snapshot with its entry
    /// replaced, or dropped if the container is gone or cannot be inspected.
    pub async fn reconcile(&self, id: &ContainerID) {
        let entry = match self.inner.runtime.inspect(id).await {
            Ok(container) => Some(self.inner.entry(container)),
            Err(Error::NotFound(_)) => None,
            Err(err) => {
                log::warn!("failed to re-inspect container `{id}`, dropping it: {err}");
                None
            }
        };

        self.inner.snapshot.send_modify(|snapshot| {
            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let mut next = InventorySnapshot::clone(snapshot);
            apply(&mut next, id, entry.clone());
            self.inner.reconciled.insert(id.clone(), (epoch, entry));
            *snapshot = Arc::new(next);
        });
        log::debug!("Reconciled container `{id}`");
    }

    /// Finds an entry by full id, then by unique id prefix, then by container name.
    pub fn resolve(&self, reference: &str) -> Option<ContainerEntry> {
        let snapshot = self.get_snapshot();
        if let Some(entry) = snapshot.get(reference) {
            return Some(entry.clone());
        }

        let mut by_prefix = snapshot
            .values()
            .filter(|entry| entry.info.id.as_str().starts_with(reference));
        if let (Some(entry), None) = (by_prefix.next(), by_prefix.next()) {
            return Some(entry.clone());
        }

        let name = reference.trim_start_matches('/');
        snapshot
            .values()
            .find(|entry| entry.info.name.trim_start_matches('/') == name)
            .cloned()
    }
}

fn apply(snapshot: &mut InventorySnapshot, id: &ContainerID, entry: Option<ContainerEntry>) {
    match entry {
        Some(entry) => {
            snapshot.insert(id.clone(), entry);
        }
        None => {
            snapshot.remove(id);
        }
    }
}

impl<R: ContainerRuntime> Inner<R> {
    fn entry(&self, info: Container) -> ContainerEntry {
        // Exporters carry their target's stack hints and are never targets themselves.
        let classification = match info.label(TARGET_LABEL) {
            Some(_) => Classification::new([(EXPORTER_LABEL.to_owned(), 1.0)]),
            None => self.classifier.classify(&info),
        };
        ContainerEntry {
            info,
            classification,
        }
    }

    async fn rebuild(&self) -> Result<Arc<InventorySnapshot>> {
        let started = self.epoch.load(Ordering::SeqCst);
        let containers = match self.runtime.list().await {
            Ok(containers) => containers,
            Err(err) => {
                log::error!("inventory refresh failed, keeping previous snapshot: {err}");
                return Err(err);
            }
        };

        let mut snapshot: InventorySnapshot = containers
            .into_iter()
            .map(|container| (container.id.clone(), self.entry(container)))
            .collect();

        let mut published = Arc::default();
        self.snapshot.send_modify(|current| {
            for reconciled in self.reconciled.iter() {
                let (epoch, entry) = reconciled.value();
                if *epoch > started {
                    log::debug!("Keeping `{}` as reconciled during refresh", reconciled.key());
                    apply(&mut snapshot, reconciled.key(), entry.clone());
                }
            }
            // Later refreshes start after this point and list newer state themselves.
            self.reconciled.clear();

            published = Arc::new(std::mem::take(&mut snapshot));
            *current = Arc::clone(&published);
        });
        log::debug!("Refreshed inventory with {} containers", published.len());
        Ok(published)
    }
}
