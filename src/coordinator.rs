use crate::adapter::DraftEvent;
use crate::adapter::Platform;
use crate::config::Config;
use crate::detection::{ClassificationResult, DetectionEngine};
use crate::events::{CommitRecord, EventsClient};
use crate::rewrite::{RewriteClient, Variant};
use crate::state::{PersistedState, Settings, StateStore, UsageCounters};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

/// Identifies the originating tab; one governance cycle is in flight
/// per tab at most.
pub type TabId = u64;

#[derive(Debug)]
pub enum Command {
    Classify {
        tab: TabId,
        event: DraftEvent,
        reply: oneshot::Sender<ClassificationResult>,
    },
    Rewrite {
        tab: TabId,
        text: String,
        reply: oneshot::Sender<Vec<Variant>>,
    },
    Commit {
        tab: TabId,
        platform: Platform,
        result: ClassificationResult,
        chosen: Variant,
        reply: oneshot::Sender<()>,
    },
    GetStats {
        reply: oneshot::Sender<UsageCounters>,
    },
    GetSettings {
        reply: oneshot::Sender<Settings>,
    },
    ResetStats {
        reply: oneshot::Sender<()>,
    },
    SetSettings {
        settings: Settings,
        reply: oneshot::Sender<std::result::Result<(), String>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CyclePhase {
    /// Risk was found; waiting on the user's decision message.
    DecisionPending,
    /// Clean draft, submission already allowed; waiting on the commit.
    AutoApproved,
}

struct Cycle {
    phase: CyclePhase,
    started: Instant,
}

/// Cloneable sender side of the coordinator. All components talk to the
/// coordinator through this; nothing shares its state directly.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<T>,
    ) -> Result<T> {
        self.tx
            .send(command)
            .map_err(|_| anyhow::anyhow!("coordinator is gone"))?;
        rx.await.context("coordinator dropped the reply")
    }

    pub async fn classify(&self, tab: TabId, event: DraftEvent) -> Result<ClassificationResult> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Classify { tab, event, reply }, rx).await
    }

    pub async fn rewrite(&self, tab: TabId, text: String) -> Result<Vec<Variant>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Rewrite { tab, text, reply }, rx).await
    }

    pub async fn commit(
        &self,
        tab: TabId,
        platform: Platform,
        result: ClassificationResult,
        chosen: Variant,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Commit {
                tab,
                platform,
                result,
                chosen,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn stats(&self) -> Result<UsageCounters> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::GetStats { reply }, rx).await
    }

    pub async fn settings(&self) -> Result<Settings> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::GetSettings { reply }, rx).await
    }

    pub async fn reset_stats(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::ResetStats { reply }, rx).await
    }

    pub async fn set_settings(
        &self,
        settings: Settings,
    ) -> Result<std::result::Result<(), String>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SetSettings { settings, reply }, rx).await
    }
}

#[derive(Clone, Copy)]
struct ClientParams {
    request_timeout: Duration,
    cache_ttl: Duration,
    cache_capacity: usize,
}

/// The single stateful actor. Processes one message at a time to
/// completion, so counter updates are serialized without locking; the
/// only suspension points are spawned off onto their own tasks.
pub struct Coordinator {
    rx: mpsc::UnboundedReceiver<Command>,
    engine: DetectionEngine,
    store: StateStore,
    state: PersistedState,
    rewrite: Arc<RewriteClient>,
    events: Arc<EventsClient>,
    cycles: HashMap<TabId, Cycle>,
    abandonment: Duration,
    params: ClientParams,
    forward_warned: bool,
}

impl Coordinator {
    /// Load durable state, build the outbound clients, and start the
    /// actor loop on the runtime.
    pub fn spawn(config: &Config) -> Result<(CoordinatorHandle, tokio::task::JoinHandle<()>)> {
        let store = StateStore::new(&config.state_path);
        let mut state = store.load()?;
        if state.settings == Settings::default() {
            state.settings = config.seed_settings();
            store.save(&state)?;
        }

        let params = ClientParams {
            request_timeout: Duration::from_secs(config.service.request_timeout_seconds),
            cache_ttl: Duration::from_secs(config.cache.ttl_seconds),
            cache_capacity: config.cache.max_entries,
        };
        let (rewrite, events) = build_clients(&state.settings, params)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            rx,
            engine: DetectionEngine::new(config.detection.min_text_length),
            store,
            state,
            rewrite,
            events,
            cycles: HashMap::new(),
            abandonment: Duration::from_secs(config.timeouts.abandonment_seconds),
            params,
            forward_warned: false,
        };
        let handle = tokio::spawn(coordinator.run());
        Ok((CoordinatorHandle { tx }, handle))
    }

    async fn run(mut self) {
        log::info!("coordinator started");
        let mut sweep = interval(self.abandonment.max(Duration::from_secs(1)) / 2);
        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                _ = sweep.tick() => self.sweep_abandoned(),
            }
        }
        log::info!("coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Classify { tab, event, reply } => {
                let result = self.engine.classify(&event.text);
                let phase = if result.is_clean() {
                    CyclePhase::AutoApproved
                } else {
                    CyclePhase::DecisionPending
                };
                log::debug!(
                    "tab {tab} ({}) classified: {} finding(s), tier {:?}",
                    event.platform.label(),
                    result.findings.len(),
                    result.tier
                );
                // A new draft supersedes any cycle still open for the tab.
                self.cycles.insert(
                    tab,
                    Cycle {
                        phase,
                        started: Instant::now(),
                    },
                );
                let _ = reply.send(result);
            }
            Command::Rewrite { tab, text, reply } => {
                if !self.cycles.contains_key(&tab) {
                    log::debug!("rewrite request for tab {tab} with no open cycle");
                }
                // The network call must not stall the actor; other tabs'
                // cycles keep flowing while this one waits.
                let client = self.rewrite.clone();
                tokio::spawn(async move {
                    let variants = client.variants(&text).await;
                    let _ = reply.send(variants);
                });
            }
            Command::Commit {
                tab,
                platform,
                result,
                chosen,
                reply,
            } => {
                self.commit(tab, platform, result, chosen);
                let _ = reply.send(());
            }
            Command::GetStats { reply } => {
                let _ = reply.send(self.state.counters);
            }
            Command::GetSettings { reply } => {
                let _ = reply.send(self.state.settings.clone());
            }
            Command::ResetStats { reply } => {
                self.state.counters = UsageCounters::default();
                if let Err(e) = self.store.save(&self.state) {
                    log::error!("failed to persist counter reset: {e}");
                }
                log::info!("usage counters reset");
                let _ = reply.send(());
            }
            Command::SetSettings { settings, reply } => {
                let _ = reply.send(self.apply_settings(settings));
            }
        }
    }

    fn commit(
        &mut self,
        tab: TabId,
        platform: Platform,
        result: ClassificationResult,
        chosen: Variant,
    ) {
        if self.cycles.remove(&tab).is_none() {
            // Legitimate when the cycle was already released as
            // abandoned; the completed outcome still counts.
            log::debug!("commit for tab {tab} with no open cycle");
        }

        let flagged = !result.is_clean();
        let adopted = chosen.is_rewrite();
        self.state.counters.record_cycle(flagged, adopted);
        if let Err(e) = self.store.save(&self.state) {
            log::error!("failed to persist counters: {e}");
        }
        log::info!(
            "tab {tab} committed on {}: flagged={flagged} rewrite_adopted={adopted}",
            platform.label()
        );

        if self.state.settings.can_forward() {
            let record = CommitRecord::new(
                platform,
                &self.state.settings.user_email,
                result,
                chosen,
            );
            let events = self.events.clone();
            // Fire and forget: forwarding failures never block a cycle.
            tokio::spawn(async move {
                events.forward(&record).await;
            });
        } else if !self.forward_warned {
            log::warn!(
                "identity or service destination not configured; commit records stay local"
            );
            self.forward_warned = true;
        }
    }

    fn apply_settings(&mut self, settings: Settings) -> std::result::Result<(), String> {
        settings.validate()?;
        let (rewrite, events) =
            build_clients(&settings, self.params).map_err(|e| e.to_string())?;
        self.rewrite = rewrite;
        self.events = events;
        self.state.settings = settings;
        self.store
            .save(&self.state)
            .map_err(|e| format!("failed to persist settings: {e}"))?;
        self.forward_warned = false;
        log::info!("settings updated");
        Ok(())
    }

    /// Tabs can close without a clean message; pending cycles older
    /// than the ceiling are released so this map stays bounded.
    fn sweep_abandoned(&mut self) {
        let ceiling = self.abandonment;
        let before = self.cycles.len();
        self.cycles.retain(|tab, cycle| {
            let keep = cycle.started.elapsed() < ceiling;
            if !keep {
                log::info!(
                    "releasing abandoned cycle for tab {tab} ({:?})",
                    cycle.phase
                );
            }
            keep
        });
        let released = before - self.cycles.len();
        if released > 0 {
            log::debug!("abandonment sweep released {released} cycle(s)");
        }
    }
}

fn build_clients(
    settings: &Settings,
    params: ClientParams,
) -> Result<(Arc<RewriteClient>, Arc<EventsClient>)> {
    let rewrite = RewriteClient::new(
        &settings.service_url,
        &settings.api_key,
        params.request_timeout,
        params.cache_ttl,
        params.cache_capacity,
    )?;
    let events = EventsClient::new(&settings.service_url, &settings.api_key, params.request_timeout)?;
    Ok((Arc::new(rewrite), Arc::new(events)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::VariantSource;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.state_path = dir
            .path()
            .join("state.yaml")
            .to_string_lossy()
            .to_string();
        // No identity configured: forwarding is skipped, so these tests
        // run with zero network traffic.
        config.user_email = String::new();
        config.service.url = String::new();
        config
    }

    fn draft(text: &str) -> DraftEvent {
        DraftEvent::new(Platform::ChatGpt, text.to_string())
    }

    #[tokio::test]
    async fn clean_draft_auto_approves_and_still_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _join) = Coordinator::spawn(&test_config(&dir)).unwrap();

        let result = handle
            .classify(1, draft("please review my meeting notes draft"))
            .await
            .unwrap();
        assert!(result.is_clean());

        handle
            .commit(
                1,
                Platform::ChatGpt,
                result,
                Variant::original("please review my meeting notes draft"),
            )
            .await
            .unwrap();

        let counters = handle.stats().await.unwrap();
        assert_eq!(counters.prompts_observed, 1);
        assert_eq!(counters.pii_flagged, 0);
        assert_eq!(counters.rewrites_adopted, 0);
    }

    #[tokio::test]
    async fn keeping_original_after_high_risk_leaves_adoption_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _join) = Coordinator::spawn(&test_config(&dir)).unwrap();

        let text = "My SSN is 123-45-6789";
        let result = handle.classify(7, draft(text)).await.unwrap();
        assert!(!result.is_clean());

        handle
            .commit(7, Platform::ChatGpt, result, Variant::original(text))
            .await
            .unwrap();

        let counters = handle.stats().await.unwrap();
        assert_eq!(counters.prompts_observed, 1);
        assert_eq!(counters.pii_flagged, 1);
        assert_eq!(counters.rewrites_adopted, 0);
    }

    #[tokio::test]
    async fn adopting_a_rewrite_increments_adoption() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _join) = Coordinator::spawn(&test_config(&dir)).unwrap();

        let result = handle
            .classify(3, draft("card number 4111 1111 1111 1111 for the refund"))
            .await
            .unwrap();
        let rewrite = Variant {
            source: VariantSource::Rewrite,
            text: "card number [REDACTED] for the refund".to_string(),
            score: Some(0.9),
        };
        handle
            .commit(3, Platform::Claude, result, rewrite)
            .await
            .unwrap();

        let counters = handle.stats().await.unwrap();
        assert_eq!(counters.rewrites_adopted, 1);
        assert_eq!(counters.pii_flagged, 1);
    }

    #[tokio::test]
    async fn counters_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        {
            let (handle, _join) = Coordinator::spawn(&config).unwrap();
            let result = handle.classify(1, draft("hello")).await.unwrap();
            handle
                .commit(1, Platform::Gemini, result, Variant::original("hello"))
                .await
                .unwrap();
            assert_eq!(handle.stats().await.unwrap().prompts_observed, 1);
        }

        let (handle, _join) = Coordinator::spawn(&config).unwrap();
        assert_eq!(handle.stats().await.unwrap().prompts_observed, 1);
    }

    #[tokio::test]
    async fn counters_are_monotone_over_many_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _join) = Coordinator::spawn(&test_config(&dir)).unwrap();

        let texts = [
            "summarize the planning notes from this morning",
            "My SSN is 123-45-6789",
            "what rhymes with orange, asking for a song",
        ];
        for (i, text) in texts.iter().enumerate() {
            let result = handle.classify(i as TabId, draft(text)).await.unwrap();
            handle
                .commit(i as TabId, Platform::ChatGpt, result, Variant::original(text))
                .await
                .unwrap();
        }

        let counters = handle.stats().await.unwrap();
        assert_eq!(counters.prompts_observed, 3);
        assert_eq!(counters.pii_flagged, 1);
        assert!(counters.rewrites_adopted <= counters.prompts_observed);
    }

    #[tokio::test]
    async fn counter_reset_zeroes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let (handle, _join) = Coordinator::spawn(&config).unwrap();

        let result = handle.classify(1, draft("My SSN is 123-45-6789")).await.unwrap();
        handle
            .commit(1, Platform::ChatGpt, result, Variant::original("My SSN is 123-45-6789"))
            .await
            .unwrap();
        assert_eq!(handle.stats().await.unwrap().prompts_observed, 1);

        handle.reset_stats().await.unwrap();
        assert_eq!(handle.stats().await.unwrap(), UsageCounters::default());

        let persisted = StateStore::new(&config.state_path).load().unwrap();
        assert_eq!(persisted.counters, UsageCounters::default());
    }

    #[tokio::test]
    async fn settings_update_validates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let (handle, _join) = Coordinator::spawn(&config).unwrap();

        let bad = Settings {
            user_email: "nope".to_string(),
            service_url: String::new(),
            api_key: String::new(),
        };
        assert!(handle.set_settings(bad).await.unwrap().is_err());

        let good = Settings {
            user_email: "user@corp.example".to_string(),
            service_url: "https://governance.corp.example".to_string(),
            api_key: "secret".to_string(),
        };
        assert!(handle.set_settings(good.clone()).await.unwrap().is_ok());

        let persisted = StateStore::new(&config.state_path).load().unwrap();
        assert_eq!(persisted.settings, good);
    }

    #[tokio::test]
    async fn rewrite_falls_back_when_service_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.service.request_timeout_seconds = 1;
        let (handle, _join) = Coordinator::spawn(&config).unwrap();

        let variants = handle
            .rewrite(1, "rewrite this risky draft please".to_string())
            .await
            .unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].source, VariantSource::Original);
    }

    #[test]
    fn sweep_releases_stale_pending_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let store = StateStore::new(&config.state_path);
        let params = ClientParams {
            request_timeout: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(1),
            cache_capacity: 4,
        };
        let settings = Settings::default();
        let (rewrite, events) = build_clients(&settings, params).unwrap();
        let (_tx, rx) = mpsc::unbounded_channel();

        let mut coordinator = Coordinator {
            rx,
            engine: DetectionEngine::default(),
            store,
            state: PersistedState::default(),
            rewrite,
            events,
            cycles: HashMap::new(),
            abandonment: Duration::from_secs(30),
            params,
            forward_warned: false,
        };

        let stale = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .unwrap();
        coordinator.cycles.insert(
            1,
            Cycle {
                phase: CyclePhase::DecisionPending,
                started: stale,
            },
        );
        coordinator.cycles.insert(
            2,
            Cycle {
                phase: CyclePhase::DecisionPending,
                started: Instant::now(),
            },
        );

        coordinator.sweep_abandoned();
        assert!(!coordinator.cycles.contains_key(&1));
        assert!(coordinator.cycles.contains_key(&2));
    }
}
