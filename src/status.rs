use crate::events::EventsClient;
use crate::state::{Settings, StateStore, UsageCounters};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Render the aggregate counters. Every figure is read fresh from the
/// durable record; the surface itself holds no state.
pub fn print_stats(counters: &UsageCounters, settings: &Settings) {
    println!("📊 promptgate usage");
    println!("═══════════════════════════════════════");
    println!("  Prompts observed:  {}", counters.prompts_observed);
    if counters.prompts_observed > 0 {
        let flagged_pct =
            (counters.pii_flagged as f64 / counters.prompts_observed as f64) * 100.0;
        println!(
            "  ├─ PII flagged:    {} ({:.1}%)",
            counters.pii_flagged, flagged_pct
        );
        println!("  └─ Rewrites adopted: {}", counters.rewrites_adopted);
    }
    println!();
    if settings.can_forward() {
        println!("  Identity: {}", settings.user_email);
        println!("  Service:  {}", settings.service_url);
    } else {
        println!("  ⚠️  Identity or service destination not configured");
        println!("      (classify-only mode; commit records stay local)");
    }
}

/// Connection to a running agent's socket. All status reads and writes
/// go through it when an agent is up, so the coordinator remains the
/// only writer of the durable record; the offline functions below exist
/// solely for when nothing is listening.
pub struct LiveStatus {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl LiveStatus {
    /// None when no agent is listening on the socket.
    pub async fn connect(socket_path: &str) -> Option<LiveStatus> {
        let stream = UnixStream::connect(socket_path).await.ok()?;
        let (read, write) = stream.into_split();
        Some(LiveStatus {
            lines: BufReader::new(read).lines(),
            write,
        })
    }

    pub async fn stats(&mut self) -> Result<(UsageCounters, Settings)> {
        let reply = self.roundtrip(serde_json::json!({ "type": "stats" })).await?;
        let counters = serde_json::from_value(reply["counters"].clone())
            .context("malformed counters in agent reply")?;
        let settings = serde_json::from_value(reply["settings"].clone())
            .context("malformed settings in agent reply")?;
        Ok((counters, settings))
    }

    pub async fn reset_stats(&mut self) -> Result<()> {
        self.roundtrip(serde_json::json!({ "type": "reset-stats" }))
            .await?;
        Ok(())
    }

    pub async fn set_identity(&mut self, email: &str) -> Result<()> {
        self.roundtrip(serde_json::json!({ "type": "set-identity", "email": email }))
            .await?;
        Ok(())
    }

    async fn roundtrip(&mut self, frame: serde_json::Value) -> Result<serde_json::Value> {
        let mut payload = frame.to_string();
        payload.push('\n');
        self.write.write_all(payload.as_bytes()).await?;
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .context("agent did not answer")??
            .ok_or_else(|| anyhow::anyhow!("agent closed the connection"))?;
        let reply: serde_json::Value = serde_json::from_str(&line)?;
        if reply["type"] == "error" {
            anyhow::bail!("{}", reply["message"].as_str().unwrap_or("unknown error"));
        }
        Ok(reply)
    }
}

/// Offline counter reset. Only for when no agent is running: a live
/// coordinator holds the record in memory and would overwrite this file
/// on its next cycle. Callers try the socket first.
pub fn reset_stats(store: &StateStore) -> Result<()> {
    let mut state = store.load()?;
    state.counters = UsageCounters::default();
    store.save(&state)?;
    Ok(())
}

/// Offline identity update, with the same validation the coordinator
/// applies on its live settings path. Same caveat as [`reset_stats`]:
/// only for when no agent holds the record.
pub fn set_identity(store: &StateStore, email: &str) -> Result<()> {
    let mut state = store.load()?;
    let mut settings = state.settings.clone();
    settings.user_email = email.trim().to_string();
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("rejected settings update: {e}"))?;
    state.settings = settings;
    store.save(&state)?;
    Ok(())
}

/// Probe the remote service with the persisted credentials.
pub async fn check_health(settings: &Settings) -> Result<bool> {
    if settings.service_url.trim().is_empty() {
        anyhow::bail!("no service destination configured");
    }
    let client = EventsClient::new(
        &settings.service_url,
        &settings.api_key,
        Duration::from_secs(5),
    )?;
    Ok(client.check_health().await)
}
