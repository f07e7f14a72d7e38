use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{RepositoryError, ThreadResult};
use crate::models::message::Message;
use crate::models::message_like::MessageLike;
use crate::models::status::MessageStatus;

const OPTIMISTIC_PREFIX: &str = "__optimistic__";

/// Whether `id` was produced by [`MessageRepository::append_optimistic_message`]
pub fn is_optimistic_id(id: &str) -> bool {
    id.starts_with(OPTIMISTIC_PREFIX)
}

/// One message of an exported repository together with its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryItem {
    pub parent_id: Option<String>,
    pub message: Arc<Message>,
}

/// Snapshot of a whole message tree
///
/// Items are ordered so that every parent precedes its children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedRepository {
    #[serde(default)]
    pub head_id: Option<String>,
    pub messages: Vec<RepositoryItem>,
}

impl ExportedRepository {
    /// A single linear chain, each message parented to the one before it
    pub fn from_linear(messages: &[Arc<Message>]) -> Self {
        let mut items = Vec::with_capacity(messages.len());
        let mut parent_id: Option<String> = None;
        for message in messages {
            items.push(RepositoryItem {
                parent_id: parent_id.clone(),
                message: Arc::clone(message),
            });
            parent_id = Some(message.id.clone());
        }
        ExportedRepository {
            head_id: parent_id,
            messages: items,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    message: Arc<Message>,
    parent: Option<String>,
    children: Vec<String>,
    active_child: Option<String>,
}

/// A tree of messages with one active branch per parent.
///
/// Nodes live in a map keyed by message id and refer to each other by id.
/// The head is a single node; [`MessageRepository::messages`] is the path
/// from the root down to it.
#[derive(Debug, Clone, Default)]
pub struct MessageRepository {
    nodes: HashMap<String, Node>,
    root_children: Vec<String>,
    root_active: Option<String>,
    head: Option<String>,
    path: OnceCell<Arc<[Arc<Message>]>>,
}

impl MessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head_id(&self) -> Option<&str> {
        self.head.as_deref()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_message(&self, id: &str) -> Result<RepositoryItem, RepositoryError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| RepositoryError::MessageNotFound(id.to_string()))?;
        Ok(RepositoryItem {
            parent_id: node.parent.clone(),
            message: Arc::clone(&node.message),
        })
    }

    pub fn children(&self, id: &str) -> Result<&[String], RepositoryError> {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .ok_or_else(|| RepositoryError::MessageNotFound(id.to_string()))
    }

    /// Ids of all siblings of `id` (itself included), in creation order
    pub fn branches(&self, id: &str) -> Result<Vec<String>, RepositoryError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| RepositoryError::MessageNotFound(id.to_string()))?;
        Ok(self.children_of(node.parent.as_deref()).to_vec())
    }

    /// Insert `message` below `parent_id`, or replace the payload of the node
    /// that already has its id.
    ///
    /// A new or moved node becomes the active child of its parent. Replacing
    /// the payload under the same parent leaves the active pointers alone. A
    /// new node becomes the head when its parent was the head.
    pub fn add_or_update_message(
        &mut self,
        parent_id: Option<&str>,
        message: Arc<Message>,
    ) -> Result<(), RepositoryError> {
        if let Some(parent_id) = parent_id {
            if !self.nodes.contains_key(parent_id) {
                return Err(RepositoryError::ParentNotFound(parent_id.to_string()));
            }
        }

        let id = message.id.clone();
        if let Some(node) = self.nodes.get(&id) {
            let same_parent = node.parent.as_deref() == parent_id;
            if same_parent && Arc::ptr_eq(&node.message, &message) {
                return Ok(());
            }
            if !same_parent {
                self.ensure_not_ancestor(&id, parent_id)?;
                self.unlink(&id);
                self.link(parent_id, &id);
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.message = message;
            }
            self.invalidate();
            return Ok(());
        }

        self.nodes.insert(
            id.clone(),
            Node {
                message,
                parent: None,
                children: Vec::new(),
                active_child: None,
            },
        );
        self.link(parent_id, &id);
        if self.head.as_deref() == parent_id {
            self.head = Some(id);
        }
        self.invalidate();
        Ok(())
    }

    /// Insert a running assistant placeholder below `parent_id` and return its id
    pub fn append_optimistic_message(
        &mut self,
        parent_id: Option<&str>,
        mut like: MessageLike,
    ) -> ThreadResult<String> {
        let mut id = format!("{}{}", OPTIMISTIC_PREFIX, uuid::Uuid::new_v4());
        while self.nodes.contains_key(&id) {
            id = format!("{}{}", OPTIMISTIC_PREFIX, uuid::Uuid::new_v4());
        }
        like.id = None;
        let message = like.into_message(&id, MessageStatus::AUTO_RUNNING)?;
        self.add_or_update_message(parent_id, Arc::new(message))?;
        debug!(id = %id, parent = ?parent_id, "appended optimistic message");
        Ok(id)
    }

    /// Remove a node, promoting its children to its parent.
    ///
    /// If the node was its parent's active child, the last promoted child (or
    /// else the last remaining sibling) becomes active. A head on the removed
    /// node moves to the deepest active descendant of the parent.
    pub fn delete_message(&mut self, id: &str) -> Result<(), RepositoryError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| RepositoryError::MessageNotFound(id.to_string()))?;
        let parent = node.parent.clone();
        let children = node.children.clone();
        let was_active = self.active_of(parent.as_deref()) == Some(id);

        self.unlink(id);
        self.nodes.remove(id);
        for child in &children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = parent.clone();
            }
            self.children_of_mut(parent.as_deref()).push(child.clone());
        }
        if was_active {
            let fallback = self.children_of(parent.as_deref()).last().cloned();
            *self.active_of_mut(parent.as_deref()) = fallback;
        }

        if self.head.as_deref() == Some(id) {
            self.head = self.find_head(parent.as_deref());
        }
        self.invalidate();
        Ok(())
    }

    /// Make `id` part of the active path and move the head to the deepest
    /// active message below it.
    pub fn switch_to_branch(&mut self, id: &str) -> Result<(), RepositoryError> {
        if !self.nodes.contains_key(id) {
            return Err(RepositoryError::BranchNotFound(id.to_string()));
        }
        self.activate_path(id);
        self.head = self.find_head(Some(id));
        self.invalidate();
        Ok(())
    }

    /// Force the head to `id`, or to nothing.
    ///
    /// Ancestors' active pointers are updated so that they lead to `id`; no
    /// other pointer is touched.
    pub fn reset_head(&mut self, id: Option<&str>) -> Result<(), RepositoryError> {
        match id {
            None => self.head = None,
            Some(id) => {
                if !self.nodes.contains_key(id) {
                    return Err(RepositoryError::BranchNotFound(id.to_string()));
                }
                self.activate_path(id);
                self.head = Some(id.to_string());
            }
        }
        self.invalidate();
        Ok(())
    }

    /// The root-to-head path. The returned slice is shared until the next
    /// mutation.
    pub fn messages(&self) -> Arc<[Arc<Message>]> {
        Arc::clone(self.path.get_or_init(|| {
            let mut path = Vec::new();
            let mut current = self.head.as_deref();
            while let Some(id) = current {
                let Some(node) = self.nodes.get(id) else {
                    break;
                };
                path.push(Arc::clone(&node.message));
                current = node.parent.as_deref();
            }
            path.reverse();
            path.into()
        }))
    }

    /// Load every item of `exported`, then move the head to its head (or to
    /// the last item).
    pub fn import(&mut self, exported: &ExportedRepository) -> Result<(), RepositoryError> {
        for item in &exported.messages {
            self.add_or_update_message(item.parent_id.as_deref(), Arc::clone(&item.message))?;
        }
        let head = exported
            .head_id
            .as_deref()
            .or_else(|| exported.messages.last().map(|item| item.message.id.as_str()));
        self.reset_head(head)
    }

    pub fn export(&self) -> ExportedRepository {
        let mut messages = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&str> = self.root_children.iter().rev().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            messages.push(RepositoryItem {
                parent_id: node.parent.clone(),
                message: Arc::clone(&node.message),
            });
            stack.extend(node.children.iter().rev().map(String::as_str));
        }
        ExportedRepository {
            head_id: self.head.clone(),
            messages,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root_children.clear();
        self.root_active = None;
        self.head = None;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.path.take();
    }

    fn children_of(&self, parent: Option<&str>) -> &[String] {
        match parent.and_then(|id| self.nodes.get(id)) {
            Some(node) => &node.children,
            None => &self.root_children,
        }
    }

    fn children_of_mut(&mut self, parent: Option<&str>) -> &mut Vec<String> {
        match parent.and_then(|id| self.nodes.get_mut(id)) {
            Some(node) => &mut node.children,
            None => &mut self.root_children,
        }
    }

    fn active_of(&self, parent: Option<&str>) -> Option<&str> {
        match parent.and_then(|id| self.nodes.get(id)) {
            Some(node) => node.active_child.as_deref(),
            None => self.root_active.as_deref(),
        }
    }

    fn active_of_mut(&mut self, parent: Option<&str>) -> &mut Option<String> {
        match parent.and_then(|id| self.nodes.get_mut(id)) {
            Some(node) => &mut node.active_child,
            None => &mut self.root_active,
        }
    }

    fn link(&mut self, parent: Option<&str>, id: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = parent.map(str::to_string);
        }
        self.children_of_mut(parent).push(id.to_string());
        *self.active_of_mut(parent) = Some(id.to_string());
    }

    fn unlink(&mut self, id: &str) {
        let parent = self.nodes.get(id).and_then(|node| node.parent.clone());
        let siblings = self.children_of_mut(parent.as_deref());
        siblings.retain(|sibling| sibling != id);
        let fallback = siblings.last().cloned();
        let active = self.active_of_mut(parent.as_deref());
        if active.as_deref() == Some(id) {
            *active = fallback;
        }
    }

    fn ensure_not_ancestor(&self, id: &str, parent: Option<&str>) -> Result<(), RepositoryError> {
        let mut current = parent;
        while let Some(ancestor) = current {
            if ancestor == id {
                return Err(RepositoryError::Cycle(id.to_string()));
            }
            current = self.nodes.get(ancestor).and_then(|node| node.parent.as_deref());
        }
        Ok(())
    }

    fn activate_path(&mut self, id: &str) {
        let mut current = id.to_string();
        loop {
            let parent = self.nodes.get(&current).and_then(|node| node.parent.clone());
            *self.active_of_mut(parent.as_deref()) = Some(current);
            match parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }

    fn find_head(&self, start: Option<&str>) -> Option<String> {
        let mut head = start.map(str::to_string);
        let mut next = self.active_of(start).map(str::to_string);
        while let Some(id) = next {
            next = self.active_of(Some(id.as_str())).map(str::to_string);
            head = Some(id);
        }
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;

    fn message(id: &str) -> Arc<Message> {
        Arc::new(Message::user(id).with_text(id))
    }

    fn ids(repository: &MessageRepository) -> Vec<String> {
        repository.messages().iter().map(|m| m.id.clone()).collect()
    }

    fn chain(ids: &[&str]) -> anyhow::Result<MessageRepository> {
        let mut repository = MessageRepository::new();
        let mut parent = None;
        for id in ids {
            repository.add_or_update_message(parent, message(id))?;
            parent = Some(*id);
        }
        Ok(repository)
    }

    #[test]
    fn test_linear_chain_in_insertion_order() -> anyhow::Result<()> {
        let repository = chain(&["a", "b", "c", "d"])?;
        assert_eq!(ids(&repository), vec!["a", "b", "c", "d"]);
        assert_eq!(repository.head_id(), Some("d"));
        Ok(())
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let mut repository = MessageRepository::new();
        let err = repository
            .add_or_update_message(Some("missing"), message("a"))
            .unwrap_err();
        assert_eq!(err, RepositoryError::ParentNotFound("missing".into()));
    }

    #[test]
    fn test_sibling_becomes_active_branch() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b"])?;
        repository.add_or_update_message(Some("a"), message("b2"))?;
        // head was "b", not the parent, so it stays
        assert_eq!(ids(&repository), vec!["a", "b"]);

        repository.switch_to_branch("b2")?;
        assert_eq!(ids(&repository), vec!["a", "b2"]);
        assert_eq!(repository.branches("b")?, vec!["b", "b2"]);
        Ok(())
    }

    #[test]
    fn test_update_in_place_keeps_active_branch() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b"])?;
        repository.add_or_update_message(Some("a"), message("b2"))?;
        repository.switch_to_branch("b")?;

        let edited = Arc::new(Message::user("b").with_text("edited"));
        repository.add_or_update_message(Some("a"), Arc::clone(&edited))?;
        repository.switch_to_branch("a")?;
        assert_eq!(ids(&repository), vec!["a", "b"]);
        assert!(Arc::ptr_eq(&repository.messages()[1], &edited));
        Ok(())
    }

    #[test]
    fn test_switch_to_branch_follows_active_descendants() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b", "c"])?;
        repository.add_or_update_message(Some("a"), message("x"))?;
        repository.add_or_update_message(Some("x"), message("y"))?;

        repository.switch_to_branch("x")?;
        assert_eq!(ids(&repository), vec!["a", "x", "y"]);
        repository.switch_to_branch("b")?;
        assert_eq!(ids(&repository), vec!["a", "b", "c"]);

        let err = repository.switch_to_branch("nope").unwrap_err();
        assert_eq!(err, RepositoryError::BranchNotFound("nope".into()));
        Ok(())
    }

    #[test]
    fn test_optimistic_message_replaced_by_real_reply() -> anyhow::Result<()> {
        let mut repository = chain(&["u1"])?;
        let optimistic =
            repository.append_optimistic_message(Some("u1"), MessageLike::new(Role::Assistant))?;
        assert!(is_optimistic_id(&optimistic));
        let messages = repository.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].status.is_running());

        repository.delete_message(&optimistic)?;
        repository.add_or_update_message(
            Some("u1"),
            Arc::new(Message::assistant("a1").with_text("hi")),
        )?;
        let messages = repository.messages();
        let assistants: Vec<_> = messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(assistants.len(), 1);
        assert_eq!(assistants[0].id, "a1");
        assert!(!repository.contains(&optimistic));
        Ok(())
    }

    #[test]
    fn test_delete_promotes_children() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b", "c"])?;
        repository.delete_message("b")?;
        assert_eq!(ids(&repository), vec!["a", "c"]);
        assert_eq!(repository.get_message("c")?.parent_id.as_deref(), Some("a"));

        repository.delete_message("c")?;
        assert_eq!(ids(&repository), vec!["a"]);
        assert_eq!(repository.head_id(), Some("a"));
        Ok(())
    }

    #[test]
    fn test_delete_active_sibling_falls_back() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b"])?;
        repository.add_or_update_message(Some("a"), message("b2"))?;
        repository.switch_to_branch("b2")?;
        repository.delete_message("b2")?;
        assert_eq!(ids(&repository), vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_reset_head_keeps_descendants() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b", "c"])?;
        repository.reset_head(Some("b"))?;
        assert_eq!(ids(&repository), vec!["a", "b"]);
        assert!(repository.contains("c"));

        repository.reset_head(None)?;
        assert!(repository.messages().is_empty());
        Ok(())
    }

    #[test]
    fn test_messages_are_memoized_until_mutation() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b"])?;
        let first = repository.messages();
        assert!(Arc::ptr_eq(&first, &repository.messages()));

        // re-adding the same payload is a no-op
        let b = repository.get_message("b")?.message;
        repository.add_or_update_message(Some("a"), b)?;
        assert!(Arc::ptr_eq(&first, &repository.messages()));

        repository.add_or_update_message(Some("a"), message("b"))?;
        assert!(!Arc::ptr_eq(&first, &repository.messages()));
        Ok(())
    }

    #[test]
    fn test_relink_below_descendant_is_rejected() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b", "c"])?;
        let err = repository
            .add_or_update_message(Some("c"), message("a"))
            .unwrap_err();
        assert_eq!(err, RepositoryError::Cycle("a".into()));
        Ok(())
    }

    #[test]
    fn test_export_import() -> anyhow::Result<()> {
        let mut repository = chain(&["a", "b"])?;
        repository.add_or_update_message(Some("a"), message("b2"))?;
        let exported = repository.export();
        assert_eq!(exported.messages.len(), 3);
        assert_eq!(exported.head_id.as_deref(), Some("b"));

        let mut restored = MessageRepository::new();
        restored.import(&exported)?;
        assert_eq!(ids(&restored), vec!["a", "b"]);
        assert_eq!(restored.branches("b2")?, vec!["b", "b2"]);

        restored.clear();
        assert!(restored.is_empty());
        assert!(restored.messages().is_empty());
        Ok(())
    }
}
