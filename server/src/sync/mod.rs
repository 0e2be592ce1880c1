use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::cache::{ApiCache, SYNC_CACHE_KEYS};
use crate::ingestion::FullSyncOptions;
use crate::ServerState;

pub const MAX_EVENTS: usize = 200;
pub const DEFAULT_AUTO_SYNC_INTERVAL_SECS: i64 = 30;
const AUTO_SYNC_TICK: Duration = Duration::from_secs(10);
const REINDEX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct SyncEvent {
    pub ts: String,
    pub msg: String,
}

#[derive(Debug, Default)]
struct SyncRun {
    is_syncing: bool,
    synced: usize,
    total: usize,
    error: Option<String>,
    events: VecDeque<SyncEvent>,
}

#[derive(Debug)]
struct AutoSync {
    enabled: bool,
    interval_seconds: i64,
    next_run_epoch: Option<i64>,
    disabled_by_auth: bool,
}

impl Default for AutoSync {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: DEFAULT_AUTO_SYNC_INTERVAL_SECS,
            next_run_epoch: None,
            disabled_by_auth: false,
        }
    }
}

#[derive(Debug, Default)]
struct LlmRun {
    is_running: bool,
    processed: usize,
    total: usize,
    error: Option<String>,
}

/// Single-writer scheduler for sync runs: one global run state, a bounded
/// event log, the auto-sync timer config and the LLM post-process state,
/// each behind its own mutex.
pub struct SyncCoordinator {
    run: Mutex<SyncRun>,
    auto: Mutex<AutoSync>,
    llm: Mutex<LlmRun>,
    pub cache: ApiCache,
}

impl SyncCoordinator {
    pub fn new(cache: ApiCache) -> Self {
        Self {
            run: Mutex::new(SyncRun::default()),
            auto: Mutex::new(AutoSync::default()),
            llm: Mutex::new(LlmRun::default()),
            cache,
        }
    }

    // --- run state ---

    pub fn is_syncing(&self) -> bool {
        self.run.lock().unwrap().is_syncing
    }

    pub fn push_event(&self, msg: impl Into<String>) {
        let mut run = self.run.lock().unwrap();
        run.events.push_back(SyncEvent {
            ts: Utc::now().to_rfc3339(),
            msg: msg.into(),
        });
        while run.events.len() > MAX_EVENTS {
            run.events.pop_front();
        }
    }

    pub fn events_after(&self, after: Option<&str>) -> (Vec<SyncEvent>, bool) {
        let run = self.run.lock().unwrap();
        let events = run
            .events
            .iter()
            .filter(|e| after.map_or(true, |a| e.ts.as_str() > a))
            .cloned()
            .collect();
        (events, run.is_syncing)
    }

    pub fn set_progress(&self, synced: usize, total: usize) {
        let mut run = self.run.lock().unwrap();
        run.synced = synced;
        run.total = total;
    }

    pub fn progress(&self) -> Value {
        let run = self.run.lock().unwrap();
        let pct = if run.total > 0 {
            (run.synced as f64 / run.total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        json!({
            "is_syncing": run.is_syncing,
            "synced": run.synced,
            "total": run.total,
            "pct": pct,
            "error": run.error,
        })
    }

    /// Take the single writer slot; refuses reentry while a run is active.
    /// Counters reset, cache keys bump.
    fn begin_run(&self) -> bool {
        {
            let mut run = self.run.lock().unwrap();
            if run.is_syncing {
                return false;
            }
            run.is_syncing = true;
            run.synced = 0;
            run.total = 0;
            run.error = None;
            run.events.clear();
        }
        self.cache.invalidate(&SYNC_CACHE_KEYS);
        true
    }

    fn end_run(&self, error: Option<String>) {
        {
            let mut run = self.run.lock().unwrap();
            run.error = error;
            run.is_syncing = false;
        }
        self.cache.invalidate(&SYNC_CACHE_KEYS);
    }

    // --- auto-sync config ---

    pub fn auto_status(&self) -> Value {
        let auto = self.auto.lock().unwrap();
        json!({
            "enabled": auto.enabled,
            "interval_seconds": auto.interval_seconds,
            "next_run": auto
                .next_run_epoch
                .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
                .map(|dt| dt.to_rfc3339()),
        })
    }

    pub fn set_auto(&self, enabled: bool) -> Value {
        {
            let mut auto = self.auto.lock().unwrap();
            auto.enabled = enabled;
            auto.disabled_by_auth = false;
            let interval = auto.interval_seconds;
            auto.next_run_epoch = enabled.then(|| Utc::now().timestamp() + interval);
        }
        tracing::info!("Auto-sync {}", if enabled { "enabled" } else { "disabled" });
        self.auto_status()
    }

    fn disable_auto_for_auth(&self) {
        let mut auto = self.auto.lock().unwrap();
        if auto.enabled {
            auto.enabled = false;
            auto.disabled_by_auth = true;
            tracing::warn!("Auto-sync disabled until the next successful login");
        }
    }

    /// A fresh login re-arms an auth-disabled loop and, when an incremental
    /// cursor exists, kicks one incremental sync.
    pub fn on_login(&self, state: ServerState) {
        {
            let mut auto = self.auto.lock().unwrap();
            if auto.disabled_by_auth {
                auto.enabled = true;
                auto.disabled_by_auth = false;
                auto.next_run_epoch = Some(Utc::now().timestamp() + auto.interval_seconds);
            }
        }
        tokio::spawn(async move {
            let has_cursor = matches!(
                state.store.get_sync_state().await,
                Ok(Some(s)) if !s.last_history_id.is_empty()
            );
            if has_cursor {
                tracing::info!("Login detected, starting incremental sync");
                state.coordinator.start_incremental(state.clone());
            } else {
                tracing::info!("Login detected but no sync cursor yet, waiting for a full sync");
            }
        });
    }

    // --- run starters ---

    pub fn start_full(&self, state: ServerState, options: FullSyncOptions) -> bool {
        if !self.begin_run() {
            return false;
        }
        tokio::spawn(async move {
            let coordinator = state.coordinator.clone();
            coordinator.run_full(state, options).await;
        });
        true
    }

    pub fn start_incremental(&self, state: ServerState) -> bool {
        if !self.begin_run() {
            return false;
        }
        tokio::spawn(async move {
            let coordinator = state.coordinator.clone();
            coordinator.run_incremental(state).await;
        });
        true
    }

    pub fn start_reindex(&self, state: ServerState) -> bool {
        if !self.begin_run() {
            return false;
        }
        tokio::spawn(async move {
            let coordinator = state.coordinator.clone();
            coordinator.run_reindex(state).await;
        });
        true
    }

    async fn run_full(&self, state: ServerState, options: FullSyncOptions) {
        self.push_event("Sync started");
        match options.days_ago {
            Some(days) => self.push_event(format!(
                "Fetching message list (last {} days, max {})…",
                days, options.max_emails
            )),
            None => self.push_event(format!(
                "Fetching message list (all mail, max {})…",
                options.max_emails
            )),
        }

        let progress = |synced: usize, total: usize| {
            self.set_progress(synced, total);
            let pct = if total > 0 { synced * 100 / total } else { 0 };
            self.push_event(format!(
                "Batch complete — {synced} / {total} emails ({pct}%)"
            ));
        };

        let result = match state.ingestion_pipeline().await {
            Ok(pipeline) => pipeline.full_sync(&options, Some(&progress)).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(count) => {
                self.push_event(format!("Done — {count} emails synced successfully"));
                self.end_run(None);
            }
            Err(e) => self.fail_run(e),
        }
    }

    async fn run_incremental(&self, state: ServerState) {
        self.push_event("Incremental sync started");
        let result = match state.ingestion_pipeline().await {
            Ok(pipeline) => pipeline.incremental_sync().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(summary) => {
                let mut msg = format!(
                    "Done — +{} new, -{} deleted, {} metadata refreshed",
                    summary.added, summary.deleted, summary.refreshed
                );
                if summary.fallback {
                    msg.push_str(" (history expired, resynced last 7 days)");
                }
                self.push_event(msg);
                self.end_run(None);
            }
            Err(e) => self.fail_run(e),
        }
    }

    async fn run_reindex(&self, state: ServerState) {
        self.push_event("Reindex started");
        let result = match state.ingestion_pipeline().await {
            Ok(pipeline) => pipeline.reindex_embeddings(REINDEX_BATCH_SIZE).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(count) => {
                self.push_event(format!("Done — reindexed {count} emails"));
                self.end_run(None);
            }
            Err(e) => self.fail_run(e),
        }
    }

    fn fail_run(&self, error: crate::error::AppError) {
        if error.is_invalid_grant() {
            self.disable_auto_for_auth();
        }
        let msg = error.to_string();
        tracing::error!("Sync run failed: {}", msg);
        self.push_event(format!("ERROR: {msg}"));
        self.end_run(Some(msg));
    }

    // --- LLM post-process ---

    pub fn llm_status(&self) -> Value {
        let llm = self.llm.lock().unwrap();
        json!({
            "is_running": llm.is_running,
            "processed": llm.processed,
            "total": llm.total,
            "error": llm.error,
        })
    }

    pub fn start_llm_process(&self, state: ServerState, force: bool) -> bool {
        {
            let mut llm = self.llm.lock().unwrap();
            if llm.is_running {
                return false;
            }
            *llm = LlmRun {
                is_running: true,
                ..Default::default()
            };
        }
        tokio::spawn(async move {
            let coordinator = state.coordinator.clone();
            let progress = |done: usize, total: usize| {
                let mut llm = coordinator.llm.lock().unwrap();
                llm.processed = done;
                llm.total = total;
            };
            let result = match state.ingestion_pipeline().await {
                Ok(pipeline) => pipeline.llm_process(force, Some(&progress)).await,
                Err(e) => Err(e),
            };
            let mut llm = coordinator.llm.lock().unwrap();
            llm.is_running = false;
            match result {
                Ok(count) => {
                    llm.processed = count;
                    tracing::info!("LLM post-process complete: {} emails", count);
                }
                Err(e) => {
                    llm.error = Some(e.to_string());
                    tracing::error!("LLM post-process failed: {}", e);
                }
            }
            drop(llm);
            coordinator.cache.invalidate(&SYNC_CACHE_KEYS);
        });
        true
    }
}

/// Background timer: wakes every ten seconds and fires an incremental sync
/// when auto-sync is enabled, nothing is running and the interval elapsed.
pub fn spawn_auto_sync_loop(
    coordinator: Arc<SyncCoordinator>,
    state: ServerState,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AUTO_SYNC_TICK);
        loop {
            ticker.tick().await;
            let fire = {
                let syncing = coordinator.is_syncing();
                let mut auto = coordinator.auto.lock().unwrap();
                let now = Utc::now().timestamp();
                if auto.enabled && !syncing && auto.next_run_epoch.map_or(false, |t| now >= t) {
                    auto.next_run_epoch = Some(now + auto.interval_seconds);
                    true
                } else {
                    false
                }
            };
            if fire {
                tracing::info!("Auto-sync firing scheduled incremental sync");
                coordinator.start_incremental(state.clone());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> SyncCoordinator {
        SyncCoordinator::new(ApiCache::new())
    }

    #[test]
    fn test_begin_run_rejects_reentry() {
        let c = coordinator();
        assert!(c.begin_run());
        assert!(!c.begin_run());
        c.end_run(None);
        assert!(c.begin_run());
    }

    #[test]
    fn test_event_ring_is_bounded() {
        let c = coordinator();
        for i in 0..(MAX_EVENTS + 50) {
            c.push_event(format!("event {i}"));
        }
        let (events, _) = c.events_after(None);
        assert_eq!(events.len(), MAX_EVENTS);
        assert_eq!(events[0].msg, "event 50");
    }

    #[test]
    fn test_events_after_filters_by_timestamp() {
        let c = coordinator();
        c.push_event("first");
        let (all, _) = c.events_after(None);
        let cutoff = all[0].ts.clone();
        c.push_event("second");
        let (newer, _) = c.events_after(Some(&cutoff));
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].msg, "second");
    }

    #[test]
    fn test_progress_snapshot() {
        let c = coordinator();
        assert!(c.begin_run());
        c.set_progress(25, 100);
        let progress = c.progress();
        assert_eq!(progress["is_syncing"], true);
        assert_eq!(progress["synced"], 25);
        assert_eq!(progress["pct"], 25.0);

        c.end_run(Some("boom".to_string()));
        let progress = c.progress();
        assert_eq!(progress["is_syncing"], false);
        assert_eq!(progress["error"], "boom");
    }

    #[test]
    fn test_auto_config_round_trip() {
        let c = coordinator();
        let status = c.auto_status();
        assert_eq!(status["enabled"], false);
        assert_eq!(status["next_run"], Value::Null);

        let status = c.set_auto(true);
        assert_eq!(status["enabled"], true);
        assert!(status["next_run"].is_string());

        let status = c.set_auto(false);
        assert_eq!(status["enabled"], false);
        assert_eq!(status["next_run"], Value::Null);
    }

    #[test]
    fn test_auth_failure_disables_enabled_loop() {
        let c = coordinator();
        c.set_auto(true);
        c.disable_auto_for_auth();
        let status = c.auto_status();
        assert_eq!(status["enabled"], false);
        assert!(c.auto.lock().unwrap().disabled_by_auth);
    }
}
