//! Async cache service.
//!
//! [`CacheService`] owns a [`BackForwardCache`] and runs it on one tokio
//! task. Controller commands and host signals arrive on mpsc channels, the
//! shared eviction timer is a `sleep_until` on the earliest deadline, and
//! every outcome is published on a broadcast channel. Since all mutation
//! happens on that one task, an eviction and a commit for the same entry are
//! always applied in a single order.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use rewind_filter::{QueryParam, UrlPattern};

use crate::document::Page;
use crate::entry::{EntrySnapshot, RestoredPage};
use crate::error::{CacheError, Result};
use crate::ids::{DocumentId, NavigationEntryId, ProcessId, RestoreToken};
use crate::reason::{EvictionReason, IneligibleReasons, NotRestoredReason};
use crate::restore::{ActivationContext, FreshNavigation};
use crate::signal::HostSignal;
use crate::{ActivationCheck, BackForwardCache, CacheEffects, RestoreStart, StoreOutcome};

/// Default channel capacity.
pub const DEFAULT_BUFFER: usize = 256;

/// How a restore request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The page is active again.
    Restored(RestoredPage),
    /// The entry was evicted mid-restore; load the URL normally.
    Reissue(FreshNavigation),
    /// The entry was not cached.
    NotRestored(NotRestoredReason),
}

/// Notifications published by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A page entered the cache.
    Stored {
        /// Entry.
        entry_id: NavigationEntryId,
    },
    /// A page was refused.
    Rejected {
        /// Entry.
        entry_id: NavigationEntryId,
        /// Failing checks.
        reasons: IneligibleReasons,
    },
    /// An entry was evicted; its documents must be torn down.
    Evicted {
        /// Entry.
        entry_id: NavigationEntryId,
        /// Why.
        reason: EvictionReason,
        /// Documents to tear down.
        documents: Vec<DocumentId>,
        /// Processes no longer referenced by the cache.
        released_processes: Vec<ProcessId>,
    },
    /// The host should activate these documents and acknowledge.
    ActivationRequested {
        /// Attempt to acknowledge.
        token: RestoreToken,
        /// Entry.
        entry_id: NavigationEntryId,
        /// Documents, root first.
        documents: Vec<DocumentId>,
    },
    /// A restore committed.
    Restored {
        /// Attempt.
        token: RestoreToken,
        /// Entry.
        entry_id: NavigationEntryId,
    },
    /// A restore was aborted and must be loaded normally.
    Reissued(FreshNavigation),
}

enum Command {
    Store {
        page: Box<Page>,
        reply: oneshot::Sender<Result<StoreOutcome>>,
    },
    Restore {
        entry_id: NavigationEntryId,
        context: ActivationContext,
        reply: oneshot::Sender<Result<RestoreOutcome>>,
    },
    CancelRestore {
        entry_id: NavigationEntryId,
        reply: oneshot::Sender<Result<CacheEffects>>,
    },
    SetTimeToLive {
        time_to_live: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    SetCapacity {
        global: usize,
        foreground: usize,
        reply: oneshot::Sender<Result<CacheEffects>>,
    },
    SetDomainPolicy {
        allowed: Vec<UrlPattern>,
        blocked: Vec<UrlPattern>,
        reply: oneshot::Sender<()>,
    },
    SetBlockedQueryParameters {
        params: Vec<QueryParam>,
        reply: oneshot::Sender<()>,
    },
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<CacheEffects>,
    },
    Flush {
        reply: oneshot::Sender<CacheEffects>,
    },
    IsAllowed {
        url: Url,
        reply: oneshot::Sender<bool>,
    },
    Entries {
        reply: oneshot::Sender<Vec<EntrySnapshot>>,
    },
    NotRestoredReason {
        entry_id: NavigationEntryId,
        reply: oneshot::Sender<Option<NotRestoredReason>>,
    },
    Shutdown {
        reply: oneshot::Sender<CacheEffects>,
    },
}

/// Cloneable handle to a running [`CacheService`].
#[derive(Clone)]
pub struct CacheHandle {
    commands: mpsc::Sender<Command>,
    signals: mpsc::Sender<HostSignal>,
    events: broadcast::Sender<CacheEvent>,
}

impl CacheHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| CacheError::ServiceClosed)?;
        response.await.map_err(|_| CacheError::ServiceClosed)
    }

    /// Offers a page to the cache.
    pub async fn store(&self, page: Page) -> Result<StoreOutcome> {
        self.request(|reply| Command::Store {
            page: Box::new(page),
            reply,
        })
        .await?
    }

    /// Restores `entry_id`.
    ///
    /// Resolves once the host acknowledges activation, the attempt is aborted
    /// by an eviction, or the entry turns out not to be cached.
    pub async fn restore(
        &self,
        entry_id: NavigationEntryId,
        context: ActivationContext,
    ) -> Result<RestoreOutcome> {
        self.request(|reply| Command::Restore {
            entry_id,
            context,
            reply,
        })
        .await?
    }

    /// Cancels the in-flight restore of `entry_id`.
    pub async fn cancel_restore(&self, entry_id: NavigationEntryId) -> Result<CacheEffects> {
        self.request(|reply| Command::CancelRestore { entry_id, reply })
            .await?
    }

    /// Delivers a host signal.
    pub async fn signal(&self, signal: HostSignal) -> Result<()> {
        self.signals
            .send(signal)
            .await
            .map_err(|_| CacheError::ServiceClosed)
    }

    /// Sender for hosts that only deliver signals.
    pub fn signal_sender(&self) -> mpsc::Sender<HostSignal> {
        self.signals.clone()
    }

    /// Subscribes to cache events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Changes the entry lifetime.
    pub async fn set_time_to_live(&self, time_to_live: Duration) -> Result<()> {
        self.request(|reply| Command::SetTimeToLive {
            time_to_live,
            reply,
        })
        .await?
    }

    /// Changes the capacity limits.
    pub async fn set_capacity(&self, global: usize, foreground: usize) -> Result<CacheEffects> {
        self.request(|reply| Command::SetCapacity {
            global,
            foreground,
            reply,
        })
        .await?
    }

    /// Replaces the allow and block lists.
    pub async fn set_domain_policy(
        &self,
        allowed: Vec<UrlPattern>,
        blocked: Vec<UrlPattern>,
    ) -> Result<()> {
        self.request(|reply| Command::SetDomainPolicy {
            allowed,
            blocked,
            reply,
        })
        .await
    }

    /// Replaces the blocked query parameters.
    pub async fn set_blocked_query_parameters(&self, params: Vec<QueryParam>) -> Result<()> {
        self.request(|reply| Command::SetBlockedQueryParameters { params, reply })
            .await
    }

    /// Switches caching on or off.
    pub async fn set_enabled(&self, enabled: bool) -> Result<CacheEffects> {
        self.request(|reply| Command::SetEnabled { enabled, reply })
            .await
    }

    /// Evicts every entry.
    pub async fn flush(&self) -> Result<CacheEffects> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Checks a URL against the domain policy.
    pub async fn is_allowed(&self, url: Url) -> Result<bool> {
        self.request(|reply| Command::IsAllowed { url, reply }).await
    }

    /// Live entries, oldest first.
    pub async fn entries(&self) -> Result<Vec<EntrySnapshot>> {
        self.request(|reply| Command::Entries { reply }).await
    }

    /// Why `entry_id` cannot be restored, or `None` if it can.
    pub async fn not_restored_reason(
        &self,
        entry_id: NavigationEntryId,
    ) -> Result<Option<NotRestoredReason>> {
        self.request(|reply| Command::NotRestoredReason { entry_id, reply })
            .await
    }

    /// Flushes the cache and stops the service.
    pub async fn shutdown(&self) -> Result<CacheEffects> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Single-task driver around a [`BackForwardCache`].
pub struct CacheService {
    cache: BackForwardCache,
    commands: mpsc::Receiver<Command>,
    signals: mpsc::Receiver<HostSignal>,
    events: broadcast::Sender<CacheEvent>,
    pending: HashMap<RestoreToken, oneshot::Sender<Result<RestoreOutcome>>>,
}

impl CacheService {
    /// Creates a service and its handle.
    pub fn new(cache: BackForwardCache, buffer: usize) -> (Self, CacheHandle) {
        let (command_tx, command_rx) = mpsc::channel(buffer);
        let (signal_tx, signal_rx) = mpsc::channel(buffer);
        let (events, _) = broadcast::channel(buffer);

        let handle = CacheHandle {
            commands: command_tx,
            signals: signal_tx,
            events: events.clone(),
        };
        let service = Self {
            cache,
            commands: command_rx,
            signals: signal_rx,
            events,
            pending: HashMap::new(),
        };
        (service, handle)
    }

    /// Spawns the service on the current runtime.
    pub fn spawn(cache: BackForwardCache, buffer: usize) -> (CacheHandle, tokio::task::JoinHandle<()>) {
        let (service, handle) = Self::new(cache, buffer);
        (handle, tokio::spawn(service.run()))
    }

    /// Runs until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!("cache service started");
        loop {
            let deadline = self.cache.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        let effects = self.shutdown();
                        let _ = reply.send(effects);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(signal) = self.signals.recv() => {
                    let effects = self.cache.handle_signal(signal, now());
                    self.publish(&effects);
                }
                () = sleep_until(deadline) => {
                    let effects = self.cache.run_timers(now());
                    self.publish(&effects);
                }
            }
        }
        info!("cache service stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Store { page, reply } => {
                let outcome = self.cache.store_page(*page, now());
                match &outcome {
                    Ok(StoreOutcome::Stored { entry_id, effects }) => {
                        self.emit(CacheEvent::Stored {
                            entry_id: *entry_id,
                        });
                        self.publish(effects);
                    }
                    Ok(StoreOutcome::Rejected { entry_id, reasons }) => {
                        self.emit(CacheEvent::Rejected {
                            entry_id: *entry_id,
                            reasons: reasons.clone(),
                        });
                    }
                    Err(e) => warn!(error = %e, "store failed"),
                }
                let _ = reply.send(outcome);
            }
            Command::Restore {
                entry_id,
                context,
                reply,
            } => self.restore(entry_id, context, reply),
            Command::CancelRestore { entry_id, reply } => {
                let Some(token) = self.cache.restore_token_for(entry_id) else {
                    let _ = reply.send(Ok(CacheEffects::default()));
                    return;
                };
                let result = self.cache.cancel_restore(token);
                if let Ok(effects) = &result {
                    self.publish(effects);
                }
                if let Some(waiter) = self.pending.remove(&token) {
                    let _ = waiter.send(Err(CacheError::RestoreAborted(token)));
                }
                let _ = reply.send(result);
            }
            Command::SetTimeToLive {
                time_to_live,
                reply,
            } => {
                let _ = reply.send(self.cache.set_time_to_live(time_to_live));
            }
            Command::SetCapacity {
                global,
                foreground,
                reply,
            } => {
                let result = self.cache.set_capacity(global, foreground);
                if let Ok(effects) = &result {
                    self.publish(effects);
                }
                let _ = reply.send(result);
            }
            Command::SetDomainPolicy {
                allowed,
                blocked,
                reply,
            } => {
                self.cache.set_domain_policy(allowed, blocked);
                let _ = reply.send(());
            }
            Command::SetBlockedQueryParameters { params, reply } => {
                self.cache.set_blocked_query_parameters(params);
                let _ = reply.send(());
            }
            Command::SetEnabled { enabled, reply } => {
                let effects = self.cache.set_enabled(enabled);
                self.publish(&effects);
                let _ = reply.send(effects);
            }
            Command::Flush { reply } => {
                let effects = self.cache.flush();
                self.publish(&effects);
                let _ = reply.send(effects);
            }
            Command::IsAllowed { url, reply } => {
                let _ = reply.send(self.cache.is_allowed(&url));
            }
            Command::Entries { reply } => {
                let _ = reply.send(self.cache.entries(now()));
            }
            Command::NotRestoredReason { entry_id, reply } => {
                let _ = reply.send(self.cache.not_restored_reason(entry_id));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(self.shutdown());
            }
        }
    }

    fn restore(
        &mut self,
        entry_id: NavigationEntryId,
        context: ActivationContext,
        reply: oneshot::Sender<Result<RestoreOutcome>>,
    ) {
        let token = match self.cache.begin_restore(entry_id, context, now()) {
            Ok(RestoreStart::Requested(token)) => token,
            Ok(RestoreStart::NotRestored(reason)) => {
                let _ = reply.send(Ok(RestoreOutcome::NotRestored(reason)));
                return;
            }
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        // Registered first so a failed check resolves it through `publish`.
        self.pending.insert(token, reply);
        match self.cache.check_activation(token) {
            Ok(ActivationCheck::Ready {
                token,
                entry_id,
                documents,
            }) => {
                debug!(%token, %entry_id, "waiting for activation");
                self.emit(CacheEvent::ActivationRequested {
                    token,
                    entry_id,
                    documents,
                });
            }
            Ok(ActivationCheck::Failed(effects)) => self.publish(&effects),
            Err(e) => {
                if let Some(reply) = self.pending.remove(&token) {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    fn shutdown(&mut self) -> CacheEffects {
        info!(entries = self.cache.len(), "cache service shutting down");
        let effects = self.cache.flush();
        self.publish(&effects);
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(CacheError::ServiceClosed));
        }
        effects
    }

    fn publish(&mut self, effects: &CacheEffects) {
        for eviction in &effects.evicted {
            self.emit(CacheEvent::Evicted {
                entry_id: eviction.entry_id,
                reason: eviction.reason.clone(),
                documents: eviction.document_ids(),
                released_processes: eviction.released_processes.clone(),
            });
        }
        for fresh in &effects.reissued {
            if let Some(reply) = self.pending.remove(&fresh.token) {
                let _ = reply.send(Ok(RestoreOutcome::Reissue(fresh.clone())));
            }
            self.emit(CacheEvent::Reissued(fresh.clone()));
        }
        for page in &effects.restored {
            if let Some(reply) = self.pending.remove(&page.token) {
                let _ = reply.send(Ok(RestoreOutcome::Restored(page.clone())));
            }
            self.emit(CacheEvent::Restored {
                token: page.token,
                entry_id: page.entry_id,
            });
        }
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentInstance;
    use crate::ids::DomainGroupId;
    use crate::CacheConfig;

    fn page(id: u64) -> Page {
        Page::new(
            NavigationEntryId(id),
            DomainGroupId(id),
            DocumentInstance::new(
                DocumentId(id),
                ProcessId(1),
                Url::parse("https://a.com/").unwrap(),
            ),
        )
    }

    fn spawn(ttl: Duration) -> CacheHandle {
        let cache = BackForwardCache::new(CacheConfig {
            time_to_live: ttl,
            freeze_timeout: Duration::ZERO,
            ..CacheConfig::default()
        })
        .unwrap();
        CacheService::spawn(cache, DEFAULT_BUFFER).0
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_and_expire() {
        let handle = spawn(Duration::from_secs(10));
        let mut events = handle.subscribe();

        assert!(handle.store(page(1)).await.unwrap().is_stored());
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::Stored {
                entry_id: NavigationEntryId(1)
            }
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(matches!(
            events.recv().await.unwrap(),
            CacheEvent::Evicted {
                reason: EvictionReason::Timeout,
                ..
            }
        ));
        assert!(handle.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let handle = spawn(Duration::from_secs(3600));
        let mut events = handle.subscribe();
        handle.store(page(1)).await.unwrap();

        let restoring = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .restore(NavigationEntryId(1), ActivationContext::default())
                    .await
            })
        };

        let token = loop {
            if let CacheEvent::ActivationRequested { token, .. } = events.recv().await.unwrap() {
                break token;
            }
        };
        handle
            .signal(HostSignal::ActivationAcknowledged { token })
            .await
            .unwrap();

        let outcome = restoring.await.unwrap().unwrap();
        assert!(matches!(outcome, RestoreOutcome::Restored(ref page) if page.token == token));
    }

    #[tokio::test]
    async fn test_flush_during_restore_reissues() {
        let handle = spawn(Duration::from_secs(3600));
        let mut events = handle.subscribe();
        handle.store(page(1)).await.unwrap();

        let restoring = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .restore(NavigationEntryId(1), ActivationContext::default())
                    .await
            })
        };
        while !matches!(
            events.recv().await.unwrap(),
            CacheEvent::ActivationRequested { .. }
        ) {}

        handle.flush().await.unwrap();
        let outcome = restoring.await.unwrap().unwrap();
        let RestoreOutcome::Reissue(fresh) = outcome else {
            panic!("expected reissue, got {outcome:?}");
        };
        assert_eq!(fresh.reason, EvictionReason::Flushed);
        assert_eq!(fresh.url.as_str(), "https://a.com/");
    }

    #[tokio::test]
    async fn test_restore_unknown_entry() {
        let handle = spawn(Duration::from_secs(3600));
        let outcome = handle
            .restore(NavigationEntryId(9), ActivationContext::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RestoreOutcome::NotRestored(NotRestoredReason::NotInCache)
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let handle = spawn(Duration::from_secs(3600));
        handle.store(page(1)).await.unwrap();

        let effects = handle.shutdown().await.unwrap();
        assert_eq!(effects.evicted_ids(), vec![NavigationEntryId(1)]);
        assert_eq!(
            handle.entries().await.unwrap_err(),
            CacheError::ServiceClosed
        );
    }
}
