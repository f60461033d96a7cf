//! Tool-call timeline navigation and the persisted run timer
//!
//! Navigation has two modes: *live* (index follows the latest
//! snapshot) and *manual* (the user scrubbed away). The elapsed-time
//! counter for a running agent survives restarts through the
//! key-value port, keyed by (project, agent), and stale entries are
//! collected before any restore.

use crate::kv::{Clock, KvStore};
use crate::project::{SnapshotState, ToolCallSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Timer entries older than this are garbage
const TIMER_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Key prefix for persisted run timers
const TIMER_PREFIX: &str = "timer/";

/// Tools whose output panel opens even after the user closed it
pub const DOC_CREATION_TOOLS: &[&str] =
    &["create_document", "edit_document", "str_replace_document"];

/// Whether a tool name is in the document-creation policy set
pub fn is_doc_creation_tool(name: &str) -> bool {
    DOC_CREATION_TOOLS.contains(&name)
}

/// Navigation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineMode {
    /// Follow the latest snapshot automatically
    Live,
    /// The user scrubbed away from the latest snapshot
    Manual,
}

/// Persisted elapsed-time record for a running agent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunTimer {
    pub start_time_ms: i64,
}

/// Timeline navigation state plus the run timer
pub struct TimelineController {
    mode: TimelineMode,
    index: usize,
    count: usize,
    user_closed_panel: bool,
    running: bool,
    timer: Option<RunTimer>,
    last_duration_ms: Option<i64>,
    timer_key: String,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl TimelineController {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        project_id: &str,
        agent_id: &str,
    ) -> Self {
        Self {
            mode: TimelineMode::Live,
            index: 0,
            count: 0,
            user_closed_panel: false,
            running: false,
            timer: None,
            last_duration_ms: None,
            timer_key: format!("{}{}/{}", TIMER_PREFIX, project_id, agent_id),
            kv,
            clock,
        }
    }

    pub fn mode(&self) -> TimelineMode {
        self.mode
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Index of the newest snapshot, if any exist
    pub fn latest(&self) -> Option<usize> {
        self.count.checked_sub(1)
    }

    pub fn user_closed_panel(&self) -> bool {
        self.user_closed_panel
    }

    pub fn set_user_closed(&mut self, closed: bool) {
        self.user_closed_panel = closed;
    }

    fn set_index(&mut self, index: usize) {
        let latest = self.latest().unwrap_or(0);
        self.index = index.min(latest);
        self.mode = if self.index == latest {
            TimelineMode::Live
        } else {
            TimelineMode::Manual
        };
    }

    /// Step back one snapshot
    pub fn prev(&mut self) {
        self.set_index(self.index.saturating_sub(1));
    }

    /// Step forward one snapshot
    pub fn next(&mut self) {
        self.set_index(self.index.saturating_add(1));
    }

    /// Jump to an arbitrary snapshot
    pub fn seek(&mut self, index: usize) {
        self.set_index(index);
    }

    /// Jump to the newest snapshot and follow it
    pub fn jump_to_live(&mut self) {
        self.mode = TimelineMode::Live;
        self.index = self.latest().unwrap_or(0);
    }

    /// Absorb a change in the snapshot count. In live mode the index
    /// follows; in manual mode a user who was parked at the old
    /// latest is upgraded back to live while the agent runs.
    pub fn on_latest_advanced(&mut self, new_count: usize, agent_running: bool) {
        let old_latest = self.latest();
        self.count = new_count;
        let latest = self.latest().unwrap_or(0);

        match self.mode {
            TimelineMode::Live => self.index = latest,
            TimelineMode::Manual => {
                if Some(self.index) == old_latest && agent_running {
                    self.mode = TimelineMode::Live;
                    self.index = latest;
                }
            }
        }
    }

    /// Whether the host should open the tool panel for a new
    /// snapshot. The first snapshot of a conversation clears the
    /// user's earlier close; document-creation tools open regardless.
    pub fn should_auto_open(
        &mut self,
        prev_count: usize,
        curr_count: usize,
        latest_tool_name: Option<&str>,
    ) -> bool {
        if prev_count == 0 && curr_count == 1 {
            self.user_closed_panel = false;
        }
        curr_count > prev_count
            && (!self.user_closed_panel
                || latest_tool_name.is_some_and(is_doc_creation_tool))
    }

    /// The snapshot to render. While the head is still streaming and
    /// a completed snapshot exists, live mode pins the display to the
    /// last completed one so the viewer does not flicker; the slider
    /// still spans every snapshot.
    pub fn displayed_index(&self, snapshots: &[ToolCallSnapshot]) -> Option<usize> {
        if snapshots.is_empty() {
            return None;
        }
        let head_streaming = snapshots
            .last()
            .is_some_and(|s| s.state() == SnapshotState::Streaming);
        if self.mode == TimelineMode::Live && head_streaming {
            if let Some(last_completed) = snapshots
                .iter()
                .rposition(|s| s.state() == SnapshotState::Completed)
            {
                return Some(last_completed);
            }
        }
        Some(self.index.min(snapshots.len() - 1))
    }

    // ---- Run timer ----

    /// Track run-state edges: entering a running state starts and
    /// persists the timer, leaving it captures the final duration and
    /// clears the persisted entry.
    pub fn on_run_state_changed(&mut self, running: bool) {
        if running == self.running {
            return;
        }
        self.running = running;

        if running {
            let timer = RunTimer {
                start_time_ms: self.clock.now_ms(),
            };
            self.timer = Some(timer);
            match serde_json::to_string(&timer) {
                Ok(json) => self.kv.set(&self.timer_key, &json),
                Err(e) => tracing::warn!("Failed to persist run timer: {}", e),
            }
        } else {
            if let Some(timer) = self.timer.take() {
                self.last_duration_ms = Some(self.clock.now_ms() - timer.start_time_ms);
            }
            self.kv.delete(&self.timer_key);
        }
    }

    /// Restore a persisted timer on mount. Stale entries across the
    /// whole namespace are collected first; our own entry is restored
    /// only when fresh and the agent still appears to be running.
    pub fn restore_on_mount(&mut self, agent_appears_running: bool) {
        self.gc_stale_timers();

        let Some(json) = self.kv.get(&self.timer_key) else {
            return;
        };
        let timer = match serde_json::from_str::<RunTimer>(&json) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Dropping unreadable run timer: {}", e);
                self.kv.delete(&self.timer_key);
                return;
            }
        };

        let age = self.clock.now_ms() - timer.start_time_ms;
        if age < TIMER_TTL_MS && agent_appears_running {
            self.timer = Some(timer);
            self.running = true;
        } else {
            self.kv.delete(&self.timer_key);
        }
    }

    fn gc_stale_timers(&self) {
        let now = self.clock.now_ms();
        for (key, value) in self.kv.list_by_prefix(TIMER_PREFIX) {
            let stale = match serde_json::from_str::<RunTimer>(&value) {
                Ok(timer) => now - timer.start_time_ms >= TIMER_TTL_MS,
                Err(_) => true,
            };
            if stale {
                tracing::debug!("Collecting stale run timer {}", key);
                self.kv.delete(&key);
            }
        }
    }

    /// Elapsed time of the current run, if one is being timed
    pub fn elapsed_ms(&self) -> Option<i64> {
        self.timer
            .map(|t| self.clock.now_ms() - t.start_time_ms)
    }

    /// Duration of the most recently finished run
    pub fn last_duration_ms(&self) -> Option<i64> {
        self.last_duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{ManualClock, MemoryKv};
    use crate::project::{AssistantCall, STREAMING_SENTINEL, ToolOutcome};

    fn controller() -> (TimelineController, Arc<MemoryKv>, Arc<ManualClock>) {
        let kv = Arc::new(MemoryKv::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let ctl = TimelineController::new(kv.clone(), clock.clone(), "P", "A");
        (ctl, kv, clock)
    }

    fn snapshot(index: usize, result: Option<ToolOutcome>) -> ToolCallSnapshot {
        ToolCallSnapshot {
            id: format!("c{}", index),
            index,
            call: AssistantCall {
                name: "bash".into(),
                content: "{}".into(),
                ts: 0,
            },
            result,
            timestamp: 0,
        }
    }

    fn completed(index: usize) -> ToolCallSnapshot {
        snapshot(
            index,
            Some(ToolOutcome {
                content: "ok".into(),
                is_success: true,
                ts: 0,
            }),
        )
    }

    fn streaming(index: usize) -> ToolCallSnapshot {
        snapshot(
            index,
            Some(ToolOutcome {
                content: STREAMING_SENTINEL.into(),
                is_success: true,
                ts: 0,
            }),
        )
    }

    #[test]
    fn test_live_follows_latest() {
        let (mut ctl, _, _) = controller();
        ctl.on_latest_advanced(1, true);
        assert_eq!(ctl.index(), 0);
        ctl.on_latest_advanced(3, true);
        assert_eq!(ctl.index(), 2);
        assert_eq!(ctl.mode(), TimelineMode::Live);
    }

    #[test]
    fn test_prev_enters_manual_and_next_returns_to_live() {
        let (mut ctl, _, _) = controller();
        ctl.on_latest_advanced(3, true);

        ctl.prev();
        assert_eq!(ctl.index(), 1);
        assert_eq!(ctl.mode(), TimelineMode::Manual);

        ctl.next();
        assert_eq!(ctl.index(), 2);
        assert_eq!(ctl.mode(), TimelineMode::Live);
    }

    #[test]
    fn test_seek_clamps() {
        let (mut ctl, _, _) = controller();
        ctl.on_latest_advanced(3, true);
        ctl.seek(99);
        assert_eq!(ctl.index(), 2);
        assert_eq!(ctl.mode(), TimelineMode::Live);
        ctl.seek(0);
        assert_eq!(ctl.mode(), TimelineMode::Manual);
    }

    #[test]
    fn test_manual_at_old_latest_upgrades_while_running() {
        let (mut ctl, _, _) = controller();
        ctl.on_latest_advanced(2, true);
        ctl.prev();
        ctl.next(); // back at latest, live
        ctl.prev();
        assert_eq!(ctl.mode(), TimelineMode::Manual);
        assert_eq!(ctl.index(), 0);

        // Parked at index 0 which is not the old latest: stays manual
        ctl.on_latest_advanced(3, true);
        assert_eq!(ctl.mode(), TimelineMode::Manual);
        assert_eq!(ctl.index(), 0);

        // Park at the current latest manually, then advance
        ctl.seek(2);
        assert_eq!(ctl.mode(), TimelineMode::Live);
        ctl.prev();
        ctl.seek(2); // live again
        ctl.prev();
        ctl.next();
        assert_eq!(ctl.mode(), TimelineMode::Live);
    }

    #[test]
    fn test_manual_parked_away_never_follows() {
        let (mut ctl, _, _) = controller();
        ctl.on_latest_advanced(3, true);
        ctl.seek(0);
        assert_eq!(ctl.mode(), TimelineMode::Manual);

        ctl.on_latest_advanced(4, true);
        ctl.on_latest_advanced(5, false);
        assert_eq!(ctl.mode(), TimelineMode::Manual);
        assert_eq!(ctl.index(), 0);

        ctl.jump_to_live();
        assert_eq!(ctl.mode(), TimelineMode::Live);
        assert_eq!(ctl.index(), 4);
    }

    #[test]
    fn test_auto_open_policy() {
        let (mut ctl, _, _) = controller();

        // New snapshot, panel never closed: open
        assert!(ctl.should_auto_open(1, 2, Some("bash")));

        // No growth: never open
        assert!(!ctl.should_auto_open(2, 2, Some("bash")));

        // Closed panel suppresses ordinary tools
        ctl.set_user_closed(true);
        assert!(!ctl.should_auto_open(1, 2, Some("bash")));

        // ...but not document-creation tools
        assert!(ctl.should_auto_open(1, 2, Some("create_document")));
    }

    #[test]
    fn test_auto_open_new_conversation_resets_closed_flag() {
        let (mut ctl, _, _) = controller();
        ctl.set_user_closed(true);
        assert!(ctl.should_auto_open(0, 1, Some("bash")));
        assert!(!ctl.user_closed_panel());
    }

    #[test]
    fn test_displayed_index_stabilizes_on_streaming_head() {
        let (mut ctl, _, _) = controller();
        let snaps = vec![completed(0), completed(1), streaming(2)];
        ctl.on_latest_advanced(3, true);

        // Live: display pins to the last completed snapshot
        assert_eq!(ctl.displayed_index(&snaps), Some(1));

        // Manual scrub still reaches everything
        ctl.seek(0);
        assert_eq!(ctl.displayed_index(&snaps), Some(0));
    }

    #[test]
    fn test_displayed_index_all_streaming_falls_through() {
        let (mut ctl, _, _) = controller();
        let snaps = vec![streaming(0)];
        ctl.on_latest_advanced(1, true);
        assert_eq!(ctl.displayed_index(&snaps), Some(0));
        assert_eq!(ctl.displayed_index(&[]), None);
    }

    #[test]
    fn test_timer_persisted_iff_running() {
        let (mut ctl, kv, clock) = controller();
        assert!(kv.get("timer/P/A").is_none());

        ctl.on_run_state_changed(true);
        assert!(kv.get("timer/P/A").is_some());
        assert_eq!(ctl.elapsed_ms(), Some(0));

        clock.advance(5_000);
        assert_eq!(ctl.elapsed_ms(), Some(5_000));

        // Repeated running notifications do not reset the start
        ctl.on_run_state_changed(true);
        assert_eq!(ctl.elapsed_ms(), Some(5_000));

        ctl.on_run_state_changed(false);
        assert!(kv.get("timer/P/A").is_none());
        assert_eq!(ctl.elapsed_ms(), None);
        assert_eq!(ctl.last_duration_ms(), Some(5_000));
    }

    #[test]
    fn test_timer_restored_when_fresh_and_running() {
        let (_, kv, clock) = controller();
        kv.set("timer/P/A", r#"{"start_time_ms": 958000}"#); // 42s ago

        let mut ctl = TimelineController::new(kv.clone(), clock.clone(), "P", "A");
        ctl.restore_on_mount(true);
        assert_eq!(ctl.elapsed_ms(), Some(42_000));
        // Entry retained while the run continues
        assert!(kv.get("timer/P/A").is_some());

        ctl.on_run_state_changed(false);
        assert!(kv.get("timer/P/A").is_none());
    }

    #[test]
    fn test_timer_not_restored_when_agent_idle() {
        let (_, kv, clock) = controller();
        kv.set("timer/P/A", r#"{"start_time_ms": 958000}"#);

        let mut ctl = TimelineController::new(kv.clone(), clock, "P", "A");
        ctl.restore_on_mount(false);
        assert_eq!(ctl.elapsed_ms(), None);
        assert!(kv.get("timer/P/A").is_none());
    }

    #[test]
    fn test_stale_timers_collected_before_restore() {
        let (_, kv, clock) = controller();
        let stale_start = 1_000_000 - TIMER_TTL_MS - 1;
        kv.set(
            "timer/P/A",
            &format!(r#"{{"start_time_ms": {}}}"#, stale_start),
        );
        kv.set(
            "timer/other/agent",
            &format!(r#"{{"start_time_ms": {}}}"#, stale_start),
        );
        kv.set("timer/fresh/agent", r#"{"start_time_ms": 999000}"#);
        kv.set("timer/broken/agent", "garbage");

        let mut ctl = TimelineController::new(kv.clone(), clock, "P", "A");
        ctl.restore_on_mount(true);

        // Our stale entry was collected, not restored
        assert_eq!(ctl.elapsed_ms(), None);
        assert!(kv.get("timer/P/A").is_none());
        assert!(kv.get("timer/other/agent").is_none());
        assert!(kv.get("timer/broken/agent").is_none());
        // Fresh entries belonging to other agents survive
        assert!(kv.get("timer/fresh/agent").is_some());
    }
}
