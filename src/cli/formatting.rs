//! Plain-text rendering of cache, queue, and drain state

use crate::sync::{DrainReport, EntryState, QueuedWrite};
use canvas_graph::{WorkspaceMetadata, WorkspaceSnapshot};

/// One line per cached workspace, most recently written first.
pub fn format_cache_listing(
    entries: &[(String, Option<WorkspaceSnapshot>)],
    metadata: &[WorkspaceMetadata],
    capacity: usize,
) -> String {
    let mut out = format!("Cached workspaces ({}/{}):\n", entries.len(), capacity);
    if entries.is_empty() {
        out.push_str("  (none)\n");
        return out;
    }

    for (id, snapshot) in entries {
        let name = metadata
            .iter()
            .find(|m| &m.id == id)
            .map(|m| m.name.as_str())
            .unwrap_or("-");
        match snapshot {
            Some(s) => out.push_str(&format!(
                "  {:<24} {:<20} {:>4} nodes {:>4} edges  {}\n",
                id,
                name,
                s.nodes.len(),
                s.edges.len(),
                s.loaded_at.to_rfc3339()
            )),
            None => out.push_str(&format!("  {:<24} {:<20} (unreadable)\n", id, name)),
        }
    }
    out
}

pub fn format_queue_status(entries: &[QueuedWrite]) -> String {
    if entries.is_empty() {
        return "Write queue is empty\n".to_string();
    }

    let mut out = format!("Pending writes ({}):\n", entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let state = match entry.state {
            EntryState::Queued => "queued",
            EntryState::Draining => "draining",
        };
        out.push_str(&format!(
            "  {}. {:<24} {:<8} {:>4} nodes {:>4} edges  attempts={}  captured {}\n",
            position + 1,
            entry.workspace_id,
            state,
            entry.nodes.len(),
            entry.edges.len(),
            entry.attempts,
            entry.enqueued_at.to_rfc3339()
        ));
    }
    out
}

pub fn format_drain_report(report: &DrainReport) -> String {
    if report.skipped {
        return "Drain skipped: another drain is in progress\n".to_string();
    }

    let mut out = format!(
        "Committed: {}  Conflicts: {}  Failed: {}\n",
        report.committed.len(),
        report.conflicts.len(),
        report.failed.len()
    );
    for id in &report.committed {
        out.push_str(&format!("  committed {}\n", id));
    }
    for conflict in &report.conflicts {
        out.push_str(&format!(
            "  conflict  {} (remote {}, local {}){}\n",
            conflict.workspace_id,
            conflict.server_timestamp.to_rfc3339(),
            conflict.local_timestamp.to_rfc3339(),
            if conflict.committed { ", overwritten" } else { ", kept remote" }
        ));
    }
    for id in &report.failed {
        out.push_str(&format!("  failed    {} (still queued)\n", id));
    }
    out
}
