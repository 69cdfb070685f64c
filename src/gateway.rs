use crate::adapter::{AdapterRegistry, Debouncer, DraftEvent, PageSnapshot};
use crate::coordinator::{CoordinatorHandle, TabId};
use crate::detection::ClassificationResult;
use crate::rewrite::Variant;
use crate::state::{Settings, UsageCounters};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;

/// Frames the in-page observer sends, one JSON object per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Current page state after a qualifying composition change.
    Snapshot { page: PageSnapshot },
    /// The user hit send; the native submit is suspended until release.
    Submit,
    /// The user's choice on the decision surface while a submit is held.
    Decision { choice: DecisionChoice },
    /// Status-surface queries and writes. These ride the same socket so
    /// the coordinator stays the only writer of the durable record even
    /// while the agent is running.
    Stats,
    ResetStats,
    SetIdentity { email: String },
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DecisionChoice {
    KeepOriginal,
    /// Index into the variant list previously sent with the hold frame.
    UseRewrite { index: usize },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentFrame {
    Classified {
        result: ClassificationResult,
    },
    Hold {
        result: ClassificationResult,
        variants: Vec<Variant>,
    },
    Release {
        verdict: Verdict,
    },
    Stats {
        counters: UsageCounters,
        settings: Settings,
    },
    Ack,
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Allow,
    Timeout,
}

/// Accepts one connection per monitored tab and drives the governance
/// cycle for it. The gateway is the fail-open boundary: no path through
/// here may leave a submission suspended forever.
pub struct Gateway {
    handle: CoordinatorHandle,
    registry: AdapterRegistry,
    decision_timeout: Duration,
    next_tab: AtomicU64,
}

impl Gateway {
    pub fn new(handle: CoordinatorHandle, decision_timeout: Duration) -> Self {
        Gateway {
            handle,
            registry: AdapterRegistry::default(),
            decision_timeout,
            next_tab: AtomicU64::new(1),
        }
    }

    pub async fn run(self: Arc<Self>, socket_path: &str) -> Result<()> {
        log::info!("gateway listening on: {socket_path}");
        if std::path::Path::new(socket_path).exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;

        loop {
            let (stream, _) = listener.accept().await?;
            let gateway = self.clone();
            let tab = self.next_tab.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                log::debug!("tab {tab} connected");
                if let Err(e) = gateway.session(tab, stream).await {
                    log::warn!("tab {tab} session ended with error: {e}");
                }
                log::debug!("tab {tab} disconnected");
            });
        }
    }

    async fn session(&self, tab: TabId, stream: UnixStream) -> Result<()> {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut debouncer = Debouncer::default();
        let mut draft: Option<DraftEvent> = None;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let frame: ClientFrame = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    log::debug!("tab {tab} sent malformed frame: {e}");
                    send(
                        &mut write,
                        &AgentFrame::Error {
                            message: format!("malformed frame: {e}"),
                        },
                    )
                    .await?;
                    continue;
                }
            };

            match frame {
                ClientFrame::Snapshot { page } => {
                    self.on_snapshot(tab, page, &mut debouncer, &mut draft, &mut write)
                        .await?;
                }
                ClientFrame::Submit => {
                    let open = self
                        .on_submit(tab, &mut draft, &mut lines, &mut write)
                        .await?;
                    if !open {
                        break;
                    }
                }
                ClientFrame::Decision { .. } => {
                    // No submission is held; nothing to decide on.
                    log::debug!("tab {tab} sent a decision with no held submit");
                }
                ClientFrame::Stats => {
                    self.on_stats(tab, &mut write).await?;
                }
                ClientFrame::ResetStats => match self.handle.reset_stats().await {
                    Ok(()) => send(&mut write, &AgentFrame::Ack).await?,
                    Err(e) => {
                        send(
                            &mut write,
                            &AgentFrame::Error {
                                message: e.to_string(),
                            },
                        )
                        .await?
                    }
                },
                ClientFrame::SetIdentity { email } => {
                    self.on_set_identity(tab, &email, &mut write).await?;
                }
                ClientFrame::Close => break,
            }
        }
        Ok(())
    }

    async fn on_snapshot(
        &self,
        tab: TabId,
        page: PageSnapshot,
        debouncer: &mut Debouncer,
        draft: &mut Option<DraftEvent>,
        write: &mut OwnedWriteHalf,
    ) -> Result<()> {
        let Some(event) = self.registry.extract(&page) else {
            *draft = None;
            return Ok(());
        };
        *draft = Some(event.clone());

        if !debouncer.allow() {
            return Ok(());
        }
        match self.handle.classify(tab, event).await {
            Ok(result) => send(write, &AgentFrame::Classified { result }).await,
            Err(e) => {
                log::warn!("tab {tab} classify failed: {e}");
                Ok(())
            }
        }
    }

    async fn on_stats(&self, tab: TabId, write: &mut OwnedWriteHalf) -> Result<()> {
        let snapshot = match (self.handle.stats().await, self.handle.settings().await) {
            (Ok(counters), Ok(settings)) => AgentFrame::Stats { counters, settings },
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("tab {tab} stats request failed: {e}");
                AgentFrame::Error {
                    message: e.to_string(),
                }
            }
        };
        send(write, &snapshot).await
    }

    /// Identity changes from the status surface go through the
    /// coordinator's settings path; a direct file write would be
    /// overwritten the next time the coordinator persists its record.
    async fn on_set_identity(
        &self,
        tab: TabId,
        email: &str,
        write: &mut OwnedWriteHalf,
    ) -> Result<()> {
        let mut settings = match self.handle.settings().await {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("tab {tab} settings lookup failed: {e}");
                return send(
                    write,
                    &AgentFrame::Error {
                        message: e.to_string(),
                    },
                )
                .await;
            }
        };
        settings.user_email = email.trim().to_string();
        let reply = match self.handle.set_settings(settings).await {
            Ok(Ok(())) => AgentFrame::Ack,
            Ok(Err(message)) => AgentFrame::Error { message },
            Err(e) => AgentFrame::Error {
                message: e.to_string(),
            },
        };
        send(write, &reply).await
    }

    /// Runs one submission attempt to completion. Returns false when the
    /// connection went away mid-cycle.
    async fn on_submit(
        &self,
        tab: TabId,
        draft: &mut Option<DraftEvent>,
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
        write: &mut OwnedWriteHalf,
    ) -> Result<bool> {
        let Some(event) = draft.take() else {
            send(
                &mut *write,
                &AgentFrame::Error {
                    message: "no draft observed before submit".to_string(),
                },
            )
            .await?;
            return Ok(true);
        };

        // Classification at submit time is authoritative; snapshots are
        // advisory previews.
        let result = match self.handle.classify(tab, event.clone()).await {
            Ok(result) => result,
            Err(e) => {
                // Losing the coordinator must not hold the user's text
                // hostage: allow the original through.
                log::error!("tab {tab} classify failed, failing open: {e}");
                send(write, &AgentFrame::Release { verdict: Verdict::Allow }).await?;
                return Ok(true);
            }
        };

        if result.is_clean() {
            self.commit(tab, &event, result, Variant::original(&event.text))
                .await;
            send(write, &AgentFrame::Release { verdict: Verdict::Allow }).await?;
            return Ok(true);
        }

        let variants = self
            .handle
            .rewrite(tab, event.text.clone())
            .await
            .unwrap_or_else(|_| vec![Variant::original(&event.text)]);
        send(
            write,
            &AgentFrame::Hold {
                result: result.clone(),
                variants: variants.clone(),
            },
        )
        .await?;

        match timeout(self.decision_timeout, next_decision(lines)).await {
            Ok(Some(choice)) => {
                let chosen = match choice {
                    DecisionChoice::KeepOriginal => Variant::original(&event.text),
                    DecisionChoice::UseRewrite { index } => variants
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| Variant::original(&event.text)),
                };
                self.commit(tab, &event, result, chosen).await;
                send(write, &AgentFrame::Release { verdict: Verdict::Allow }).await?;
                Ok(true)
            }
            Ok(None) => {
                // Tab closed while the decision surface was up; the
                // coordinator's sweep reclaims the cycle.
                log::debug!("tab {tab} closed while a submit was held");
                Ok(false)
            }
            Err(_) => {
                // Fail open: the governed platform stays usable even
                // when nobody answers the decision surface.
                log::info!(
                    "tab {tab} decision timed out after {:?}, failing open",
                    self.decision_timeout
                );
                self.commit(tab, &event, result, Variant::original(&event.text))
                    .await;
                send(write, &AgentFrame::Release { verdict: Verdict::Timeout }).await?;
                Ok(true)
            }
        }
    }

    async fn commit(
        &self,
        tab: TabId,
        event: &DraftEvent,
        result: ClassificationResult,
        chosen: Variant,
    ) {
        if let Err(e) = self
            .handle
            .commit(tab, event.platform, result, chosen)
            .await
        {
            log::error!("tab {tab} commit failed: {e}");
        }
    }
}

/// Reads frames until a decision arrives; other frames while a submit
/// is held are logged and skipped. Returns None once the peer is gone.
async fn next_decision(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Option<DecisionChoice> {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str(&line) {
                Ok(ClientFrame::Decision { choice }) => return Some(choice),
                Ok(ClientFrame::Close) => return None,
                Ok(_) => log::debug!("ignoring non-decision frame while submit is held"),
                Err(e) => log::debug!("malformed frame while submit is held: {e}"),
            },
            Ok(None) | Err(_) => return None,
        }
    }
}

async fn send(write: &mut OwnedWriteHalf, frame: &AgentFrame) -> Result<()> {
    let mut payload = serde_json::to_string(frame)?;
    payload.push('\n');
    write.write_all(payload.as_bytes()).await?;
    Ok(())
}
