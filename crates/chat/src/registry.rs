use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use teamdesk_core::errors::HandlerError;

use crate::interaction::{Interaction, InteractionKind};
use crate::responder::Session;

#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn handle(&self, session: Session, interaction: Interaction) -> Result<(), HandlerError>;
}

pub type SharedHandler = Arc<dyn InteractionHandler>;

type HandlerMap = RwLock<HashMap<String, SharedHandler>>;

/// Process-wide dispatch table. Commands, components and modals live in separate maps so
/// a command name can never shadow a button id.
///
/// Locks are held only for the map operation itself; handlers always run unlocked.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HandlerMap,
    components: HandlerMap,
    modals: HandlerMap,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: InteractionKind) -> &HandlerMap {
        match kind {
            InteractionKind::Command => &self.commands,
            InteractionKind::Component => &self.components,
            InteractionKind::Modal => &self.modals,
        }
    }

    /// Returns the handler that was replaced, if any.
    pub fn add(
        &self,
        kind: InteractionKind,
        identifier: impl Into<String>,
        handler: SharedHandler,
    ) -> Option<SharedHandler> {
        self.map(kind).write().insert(identifier.into(), handler)
    }

    pub fn get(&self, kind: InteractionKind, identifier: &str) -> Option<SharedHandler> {
        self.map(kind).read().get(identifier).cloned()
    }

    /// Removing an absent identifier is a no-op.
    pub fn remove(&self, kind: InteractionKind, identifier: &str) -> bool {
        self.map(kind).write().remove(identifier).is_some()
    }

    pub fn contains(&self, kind: InteractionKind, identifier: &str) -> bool {
        self.map(kind).read().contains_key(identifier)
    }

    /// Visits a snapshot taken under one read lock; `visit` may mutate the registry.
    pub fn iterate<F>(&self, kind: InteractionKind, mut visit: F)
    where
        F: FnMut(&str, &SharedHandler),
    {
        let snapshot: Vec<(String, SharedHandler)> = self
            .map(kind)
            .read()
            .iter()
            .map(|(identifier, handler)| (identifier.clone(), handler.clone()))
            .collect();
        for (identifier, handler) in &snapshot {
            visit(identifier, handler);
        }
    }

    pub fn identifiers(&self, kind: InteractionKind) -> Vec<String> {
        let mut identifiers: Vec<String> = self.map(kind).read().keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    /// Identifiers across every map containing `fragment`, used to audit flow cleanup.
    pub fn identifiers_containing(&self, fragment: &str) -> Vec<String> {
        [InteractionKind::Command, InteractionKind::Component, InteractionKind::Modal]
            .into_iter()
            .flat_map(|kind| self.identifiers(kind))
            .filter(|identifier| identifier.contains(fragment))
            .collect()
    }

    pub fn len(&self, kind: InteractionKind) -> usize {
        self.map(kind).read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
            && self.components.read().is_empty()
            && self.modals.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use teamdesk_core::errors::HandlerError;

    use super::{CommandRegistry, InteractionHandler, SharedHandler};
    use crate::interaction::{Interaction, InteractionKind};
    use crate::responder::Session;

    struct Tagged(&'static str);

    #[async_trait]
    impl InteractionHandler for Tagged {
        async fn handle(&self, _session: Session, _interaction: Interaction) -> Result<(), HandlerError> {
            Err(HandlerError::Validation(self.0.to_owned()))
        }
    }

    fn tagged(tag: &'static str) -> SharedHandler {
        Arc::new(Tagged(tag))
    }

    fn tag_of(handler: &SharedHandler) -> String {
        let session: Session = Arc::new(crate::responder::RecordingResponder::new());
        let interaction = Interaction::component(
            "x",
            crate::interaction::Invoker { id: "U".to_owned(), username: "u".to_owned() },
            "C",
            crate::interaction::ReplyToken::new("i", "t"),
        );
        let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
        match runtime.block_on(handler.handle(session, interaction)) {
            Err(HandlerError::Validation(tag)) => tag,
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn last_write_wins_and_remove_is_idempotent() {
        let registry = CommandRegistry::new();

        assert!(registry.add(InteractionKind::Command, "ping", tagged("first")).is_none());
        assert!(registry.add(InteractionKind::Command, "ping", tagged("second")).is_some());
        let handler = registry.get(InteractionKind::Command, "ping").expect("registered");
        assert_eq!(tag_of(&handler), "second");

        assert!(registry.remove(InteractionKind::Command, "ping"));
        assert!(!registry.remove(InteractionKind::Command, "ping"));
        assert!(registry.get(InteractionKind::Command, "ping").is_none());
    }

    #[test]
    fn kinds_are_isolated_and_lookup_is_case_sensitive() {
        let registry = CommandRegistry::new();
        registry.add(InteractionKind::Component, "confirm-f1", tagged("button"));

        assert!(registry.get(InteractionKind::Command, "confirm-f1").is_none());
        assert!(registry.get(InteractionKind::Modal, "confirm-f1").is_none());
        assert!(registry.get(InteractionKind::Component, "Confirm-f1").is_none());
        assert!(registry.contains(InteractionKind::Component, "confirm-f1"));
    }

    #[test]
    fn sequences_of_operations_leave_last_written_state() {
        let registry = CommandRegistry::new();
        let ids = ["a", "b", "c", "d"];
        let mut expected = std::collections::HashMap::new();

        for step in 0..40_usize {
            let id = ids[step * 7 % ids.len()];
            if step % 3 == 0 {
                registry.remove(InteractionKind::Component, id);
                expected.remove(id);
            } else {
                registry.add(InteractionKind::Component, id, tagged("v"));
                expected.insert(id, ());
            }
        }

        for id in ids {
            assert_eq!(registry.contains(InteractionKind::Component, id), expected.contains_key(id));
        }
    }

    #[test]
    fn iterate_may_remove_entries_while_visiting() {
        let registry = CommandRegistry::new();
        registry.add(InteractionKind::Component, "confirm-f1", tagged("a"));
        registry.add(InteractionKind::Component, "cancel-f1", tagged("b"));
        registry.add(InteractionKind::Component, "confirm-f2", tagged("c"));

        registry.iterate(InteractionKind::Component, |identifier, _| {
            if identifier.ends_with("-f1") {
                registry.remove(InteractionKind::Component, identifier);
            }
        });

        assert_eq!(registry.identifiers(InteractionKind::Component), vec!["confirm-f2"]);
        assert!(registry.identifiers_containing("f1").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_and_remove_leave_a_legal_state() {
        let registry = Arc::new(CommandRegistry::new());
        let mut tasks = Vec::new();

        for worker in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..200 {
                    if (worker + round) % 2 == 0 {
                        registry.add(InteractionKind::Component, "shared", tagged("v"));
                    } else {
                        registry.remove(InteractionKind::Component, "shared");
                    }
                    let _ = registry.get(InteractionKind::Component, "shared");
                }
            }));
        }
        for task in tasks {
            task.await.expect("worker");
        }

        let len = registry.len(InteractionKind::Component);
        assert!(len == 0 || len == 1);
        assert_eq!(len == 1, registry.contains(InteractionKind::Component, "shared"));
    }
}
