//! Mapping streamed updates and settled outcomes onto thread items.

use std::collections::{HashMap, HashSet};

use crate::types::StreamUpdate;

use super::events::{
    AgentMessageItem, BrowserActionsItem, ErrorItem, ItemEvent, ItemKind, ReasoningItem,
    ThreadEvent, ThreadItem, ThreadItemDetails, TodoListItem,
};
use super::outcome::TurnOutcome;

/// Fresh opaque id for a thread or an item.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// One id per item kind, assigned before a turn starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemIds {
    pub message: String,
    pub reasoning: String,
    pub steps: String,
    pub actions: String,
}

impl ItemIds {
    pub fn generate() -> Self {
        Self {
            message: new_id(),
            reasoning: new_id(),
            steps: new_id(),
            actions: new_id(),
        }
    }
}

/// Ids to reuse for final items. Kinds left `None` get a fresh id.
#[derive(Debug, Clone, Default)]
pub struct ItemIdOverrides {
    pub message: Option<String>,
    pub reasoning: Option<String>,
    pub steps: Option<String>,
    pub actions: Option<String>,
}

/// Items carried by one live update.
pub fn items_from_update(update: &StreamUpdate, ids: &ItemIds) -> Vec<ThreadItem> {
    let mut items = Vec::new();

    if let Some(message) = &update.message {
        items.push(ThreadItem::new(
            &ids.message,
            ThreadItemDetails::AgentMessage(AgentMessageItem {
                text: message.clone(),
            }),
        ));
    }
    if let Some(thoughts) = update.thoughts.as_ref().filter(|t| !t.is_empty()) {
        items.push(ThreadItem::new(
            &ids.reasoning,
            ThreadItemDetails::Reasoning(ReasoningItem {
                text: thoughts.join("\n"),
            }),
        ));
    }
    if let Some(steps) = update.steps.as_ref().filter(|s| !s.is_empty()) {
        items.push(ThreadItem::new(
            &ids.steps,
            ThreadItemDetails::TodoList(TodoListItem::from_steps(steps)),
        ));
    }
    if let Some(actions) = update.actions.as_ref().filter(|a| !a.is_empty()) {
        items.push(ThreadItem::new(
            &ids.actions,
            ThreadItemDetails::BrowserActions(BrowserActionsItem {
                actions: actions.clone(),
                tool_use_ids: None,
                tool_inputs: None,
                parallel_actions: update.parallel_actions,
            }),
        ));
    }

    items
}

/// Final items of a settled turn, in order: reasoning, todo list, browser
/// actions, message, error.
pub fn items_from_outcome(outcome: &TurnOutcome, ids: &ItemIdOverrides) -> Vec<ThreadItem> {
    let id_or_new = |id: &Option<String>| id.clone().unwrap_or_else(new_id);
    let mut items = Vec::new();

    if !outcome.thoughts.is_empty() {
        items.push(ThreadItem::new(
            id_or_new(&ids.reasoning),
            ThreadItemDetails::Reasoning(ReasoningItem {
                text: outcome.thoughts.join("\n"),
            }),
        ));
    }
    if !outcome.steps.is_empty() {
        items.push(ThreadItem::new(
            id_or_new(&ids.steps),
            ThreadItemDetails::TodoList(TodoListItem::from_steps(&outcome.steps)),
        ));
    }
    if !outcome.actions.is_empty() {
        items.push(ThreadItem::new(
            id_or_new(&ids.actions),
            ThreadItemDetails::BrowserActions(BrowserActionsItem {
                actions: outcome.actions.clone(),
                tool_use_ids: Some(outcome.tool_use_ids.clone()),
                tool_inputs: Some(outcome.tool_inputs.clone()),
                parallel_actions: outcome.parallel_actions,
            }),
        ));
    }
    if let Some(text) = outcome.message.as_ref().filter(|m| !m.is_empty()) {
        items.push(ThreadItem::new(
            id_or_new(&ids.message),
            ThreadItemDetails::AgentMessage(AgentMessageItem { text: text.clone() }),
        ));
    }
    if let Some(message) = &outcome.error {
        items.push(error_item(message));
    }

    items
}

pub fn error_item(message: &str) -> ThreadItem {
    ThreadItem::new(
        new_id(),
        ThreadItemDetails::Error(ErrorItem {
            message: message.to_string(),
        }),
    )
}

/// Tracks which items a turn has started and their latest content.
#[derive(Debug)]
pub struct ItemTracker {
    ids: ItemIds,
    started: HashSet<String>,
    latest: HashMap<String, ThreadItem>,
}

impl ItemTracker {
    pub fn new(ids: ItemIds) -> Self {
        Self {
            ids,
            started: HashSet::new(),
            latest: HashMap::new(),
        }
    }

    pub fn ids(&self) -> &ItemIds {
        &self.ids
    }

    /// Events for one update: `item.started` the first time an id is seen,
    /// `item.updated` afterwards.
    pub fn observe(&mut self, update: &StreamUpdate) -> Vec<ThreadEvent> {
        items_from_update(update, &self.ids)
            .into_iter()
            .map(|item| {
                let first = self.started.insert(item.id.clone());
                self.latest.insert(item.id.clone(), item.clone());
                let event = ItemEvent { item };
                if first {
                    ThreadEvent::ItemStarted(event)
                } else {
                    ThreadEvent::ItemUpdated(event)
                }
            })
            .collect()
    }

    fn was_started(&self, id: &str) -> bool {
        self.started.contains(id)
    }

    /// Final items for a settled turn.
    ///
    /// Started kinds keep their streaming ids. A message, reasoning or todo
    /// item that streamed but is missing from the outcome is completed with
    /// its last streamed content.
    pub fn settle(&self, outcome: &TurnOutcome) -> Vec<ThreadItem> {
        let started = |id: &String| self.was_started(id).then(|| id.clone());
        let overrides = ItemIdOverrides {
            message: started(&self.ids.message),
            reasoning: started(&self.ids.reasoning),
            steps: started(&self.ids.steps),
            actions: Some(self.ids.actions.clone()),
        };
        let mut items = items_from_outcome(outcome, &overrides);

        for (kind, id) in [
            (ItemKind::AgentMessage, &self.ids.message),
            (ItemKind::Reasoning, &self.ids.reasoning),
            (ItemKind::TodoList, &self.ids.steps),
        ] {
            if items.iter().any(|item| item.kind() == kind) || !self.was_started(id) {
                continue;
            }
            if let Some(latest) = self.latest.get(id).filter(|item| item.kind() == kind) {
                items.push(latest.clone());
            }
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, ActionType};

    fn text_of(item: &ThreadItem) -> &str {
        match &item.details {
            ThreadItemDetails::AgentMessage(m) => &m.text,
            ThreadItemDetails::Reasoning(r) => &r.text,
            ThreadItemDetails::Error(e) => &e.message,
            _ => "",
        }
    }

    #[test]
    fn update_maps_each_present_field() {
        let ids = ItemIds::generate();
        let update = StreamUpdate {
            message: Some(String::new()),
            thoughts: Some(vec!["a".into(), "b".into()]),
            steps: Some(vec![]),
            actions: Some(vec![Action::new(ActionType::Click)]),
            parallel_actions: Some(true),
        };
        let items = items_from_update(&update, &ids);

        let kinds: Vec<_> = items.iter().map(ThreadItem::kind).collect();
        assert_eq!(
            kinds,
            vec![ItemKind::AgentMessage, ItemKind::Reasoning, ItemKind::BrowserActions]
        );
        assert_eq!(items[0].id, ids.message);
        assert_eq!(text_of(&items[1]), "a\nb");
        assert_eq!(items[2].id, ids.actions);
    }

    #[test]
    fn outcome_items_are_ordered() {
        let mut click = Action::new(ActionType::Click);
        click.id = "a1".into();
        let outcome = TurnOutcome {
            message: Some("done".into()),
            thoughts: vec!["why".into()],
            steps: vec!["one".into()],
            actions: vec![click],
            tool_use_ids: vec!["t1".into()],
            error: Some("late failure".into()),
            ..Default::default()
        };
        let items = items_from_outcome(&outcome, &ItemIdOverrides::default());
        let kinds: Vec<_> = items.iter().map(ThreadItem::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ItemKind::Reasoning,
                ItemKind::TodoList,
                ItemKind::BrowserActions,
                ItemKind::AgentMessage,
                ItemKind::Error,
            ]
        );
        let ThreadItemDetails::BrowserActions(actions) = &items[2].details else {
            panic!("expected browser actions");
        };
        assert_eq!(actions.tool_use_ids, Some(vec!["t1".to_string()]));
    }

    #[test]
    fn first_sighting_starts_later_ones_update() {
        let mut tracker = ItemTracker::new(ItemIds::generate());
        let first = tracker.observe(&StreamUpdate::message("He"));
        let second = tracker.observe(&StreamUpdate::message("Hello"));

        assert!(matches!(first[0], ThreadEvent::ItemStarted(_)));
        assert!(matches!(second[0], ThreadEvent::ItemUpdated(_)));
        assert_eq!(first[0].item().unwrap().id, second[0].item().unwrap().id);
    }

    #[test]
    fn settle_reuses_started_ids_only() {
        let mut tracker = ItemTracker::new(ItemIds::generate());
        tracker.observe(&StreamUpdate::message("Hel"));

        let outcome = TurnOutcome {
            message: Some("Hello".into()),
            steps: vec!["one".into()],
            ..Default::default()
        };
        let items = tracker.settle(&outcome);

        let todo = items.iter().find(|i| i.kind() == ItemKind::TodoList).unwrap();
        assert_ne!(todo.id, tracker.ids().steps);
        let message = items.iter().find(|i| i.kind() == ItemKind::AgentMessage).unwrap();
        assert_eq!(message.id, tracker.ids().message);
        assert_eq!(text_of(message), "Hello");
    }

    #[test]
    fn settle_patches_kinds_missing_from_the_outcome() {
        let mut tracker = ItemTracker::new(ItemIds::generate());
        tracker.observe(&StreamUpdate::thoughts("weighing options"));
        tracker.observe(&StreamUpdate {
            steps: Some(vec!["open menu".into()]),
            ..Default::default()
        });

        let outcome = TurnOutcome {
            message: Some("ok".into()),
            ..Default::default()
        };
        let items = tracker.settle(&outcome);
        let kinds: Vec<_> = items.iter().map(ThreadItem::kind).collect();
        assert_eq!(
            kinds,
            vec![ItemKind::AgentMessage, ItemKind::Reasoning, ItemKind::TodoList]
        );
        assert_eq!(items[1].id, tracker.ids().reasoning);
        assert_eq!(text_of(&items[1]), "weighing options");
    }
}
