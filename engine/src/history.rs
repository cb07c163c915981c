//! Navigation over file changes recorded in the conversation.

use tether_types::{ChangeId, ChatTurn, FileChange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEntry {
    pub turn_index: usize,
    pub change: FileChange,
}

/// File changes in conversation order, excluding any still awaiting a decision.
#[must_use]
pub fn file_change_history(turns: &[ChatTurn]) -> Vec<FileChangeEntry> {
    turns
        .iter()
        .enumerate()
        .filter_map(|(turn_index, turn)| {
            let event = turn.event.as_ref()?;
            if event.is_awaiting_decision() {
                return None;
            }
            event.file_change.clone().map(|change| FileChangeEntry { turn_index, change })
        })
        .collect()
}

#[must_use]
pub fn previous_change(turns: &[ChatTurn], id: &ChangeId) -> Option<FileChangeEntry> {
    let history = file_change_history(turns);
    let pos = history.iter().position(|entry| &entry.change.id == id)?;
    pos.checked_sub(1).map(|prev| history[prev].clone())
}

#[must_use]
pub fn next_change(turns: &[ChatTurn], id: &ChangeId) -> Option<FileChangeEntry> {
    let mut history = file_change_history(turns);
    let pos = history.iter().position(|entry| &entry.change.id == id)?;
    (pos + 1 < history.len()).then(|| history.swap_remove(pos + 1))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::SystemTime;

    use tether_types::{
        AgentEvent, AgentEventKind, ApprovalId, ChangeId, ChatTurn, ExecutionStatus, FileChange,
    };

    use super::{file_change_history, next_change, previous_change};

    fn change_turn(id: &str, status: ExecutionStatus, awaiting: bool) -> ChatTurn {
        let mut event = AgentEvent::new(AgentEventKind::FileChange, id).with_status(status);
        event.file_change = Some(FileChange::new(
            ChangeId::new(id),
            PathBuf::from(format!("/{id}.txt")),
            None,
            Some("x".into()),
            SystemTime::UNIX_EPOCH,
        ));
        if awaiting {
            event.approval_id = Some(ApprovalId::new(format!("ap-{id}")));
        }
        ChatTurn::agent_event(event, SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn pending_decisions_are_excluded_and_neighbors_resolve() {
        let t = SystemTime::UNIX_EPOCH;
        let turns = vec![
            ChatTurn::user("go", t),
            change_turn("a", ExecutionStatus::Succeeded, false),
            change_turn("b", ExecutionStatus::Pending, true),
            ChatTurn::assistant("done", t),
            change_turn("c", ExecutionStatus::Failed, true),
        ];

        let history = file_change_history(&turns);
        let ids: Vec<_> = history.iter().map(|e| e.change.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(history[1].turn_index, 4);

        let a = ChangeId::new("a");
        let c = ChangeId::new("c");
        assert_eq!(next_change(&turns, &a).unwrap().change.id, c);
        assert_eq!(previous_change(&turns, &c).unwrap().change.id, a);
        assert!(previous_change(&turns, &a).is_none());
        assert!(next_change(&turns, &c).is_none());
        assert!(next_change(&turns, &ChangeId::new("b")).is_none());
    }
}
