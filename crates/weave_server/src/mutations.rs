//! Server-side mutation handling.

use crate::store::ServerStore;
use std::sync::Arc;
use tracing::warn;
use weave_bus::{Event, EventPublisher};
use weave_model::{Role, RootId, UserId};
use weave_protocol::{Mutation, MutationKind, MutationResult, MutationStatus};

/// Applies client mutations to the synchronized tables.
///
/// Each mutation gets its own status; a failing mutation never blocks its
/// siblings in the same batch. Successful writes publish their events so
/// synchronizers wake, including on other hosts when the publisher is a
/// broadcast bridge.
pub struct MutationHandler {
    store: Arc<ServerStore>,
    events: Arc<dyn EventPublisher>,
    max_batch: usize,
}

impl MutationHandler {
    /// Creates a handler over the given store and event publisher.
    pub fn new(store: Arc<ServerStore>, events: Arc<dyn EventPublisher>, max_batch: usize) -> Self {
        Self {
            store,
            events,
            max_batch,
        }
    }

    /// Applies a batch of mutations in order, returning one result per
    /// mutation.
    ///
    /// Mutations past `max_batch` are refused as retriable: the client's
    /// outbox keeps them pending and redelivers them in its next batch.
    pub fn handle_batch(&self, user_id: &UserId, mutations: &[Mutation]) -> Vec<MutationResult> {
        if mutations.len() > self.max_batch {
            warn!(
                submitted = mutations.len(),
                max = self.max_batch,
                "oversized mutation batch; refusing the tail as retriable"
            );
        }

        mutations
            .iter()
            .enumerate()
            .map(|(index, mutation)| {
                let status = if index < self.max_batch {
                    self.handle_one(user_id, mutation)
                } else {
                    MutationStatus::InternalError
                };
                MutationResult {
                    id: mutation.id.clone(),
                    status,
                }
            })
            .collect()
    }

    fn handle_one(&self, user_id: &UserId, mutation: &Mutation) -> MutationStatus {
        let root_id = mutation.kind.root_id().clone();

        match self.authorize(user_id, &mutation.kind, &root_id) {
            Authorization::Granted => {}
            Authorization::Bootstrap => return self.bootstrap_root(user_id, mutation),
            Authorization::NoCollaboration => return MutationStatus::Forbidden,
            Authorization::RoleTooLow => return MutationStatus::NotAllowed,
        }

        match self.apply(user_id, &mutation.kind) {
            Ok(events) => {
                for event in events {
                    self.events.publish(event);
                }
                MutationStatus::Ok
            }
            Err(e) => {
                warn!(mutation = %mutation.id, error = %e, "mutation failed");
                MutationStatus::InternalError
            }
        }
    }

    fn authorize(&self, user_id: &UserId, kind: &MutationKind, root_id: &RootId) -> Authorization {
        // A record whose id equals its root id creates the root itself;
        // with no collaborations yet, the creator becomes its admin.
        if let MutationKind::CreateRecord { id, .. } = kind {
            if id.as_str() == root_id.as_str() && !self.store.has_collaborations(root_id) {
                return Authorization::Bootstrap;
            }
        }

        let Some(role) = self.store.role_for(root_id, user_id) else {
            return Authorization::NoCollaboration;
        };

        let permitted = match kind {
            MutationKind::CreateRecord { .. }
            | MutationKind::UpdateRecord { .. }
            | MutationKind::DeleteRecord { .. } => role.can_edit(),
            MutationKind::UpsertCollaboration { .. } | MutationKind::DeleteCollaboration { .. } => {
                role.can_administer()
            }
            MutationKind::UpsertInteraction { .. }
            | MutationKind::UpsertReaction { .. }
            | MutationKind::DeleteReaction { .. } => role.can_react(),
        };

        if permitted {
            Authorization::Granted
        } else {
            Authorization::RoleTooLow
        }
    }

    fn bootstrap_root(&self, user_id: &UserId, mutation: &Mutation) -> MutationStatus {
        let MutationKind::CreateRecord {
            id,
            root_id,
            record_type,
            update,
            created_at,
        } = &mutation.kind
        else {
            return MutationStatus::InternalError;
        };

        let created = self
            .store
            .create_record(id, root_id, record_type, update, user_id, *created_at)
            .and_then(|(_, record_event)| {
                let (_, collab_event) =
                    self.store
                        .upsert_collaboration(root_id, user_id, Role::Admin)?;
                Ok((record_event, collab_event))
            });

        match created {
            Ok((record_event, collab_event)) => {
                self.events.publish(record_event);
                self.events.publish(collab_event);
                MutationStatus::Ok
            }
            Err(e) => {
                warn!(mutation = %mutation.id, error = %e, "root bootstrap failed");
                MutationStatus::InternalError
            }
        }
    }

    fn apply(
        &self,
        user_id: &UserId,
        kind: &MutationKind,
    ) -> crate::error::ServerResult<Vec<Event>> {
        let events = match kind {
            MutationKind::CreateRecord {
                id,
                root_id,
                record_type,
                update,
                created_at,
            } => {
                let (_, event) = self.store.create_record(
                    id,
                    root_id,
                    record_type,
                    update,
                    user_id,
                    *created_at,
                )?;
                vec![event]
            }
            MutationKind::UpdateRecord {
                id, update, updated_at, ..
            } => self
                .store
                .update_record(id, update, user_id, *updated_at)?
                .map(|(_, event)| vec![event])
                .unwrap_or_default(),
            MutationKind::DeleteRecord { id, deleted_at, .. } => self
                .store
                .delete_record(id, user_id, *deleted_at)?
                .map(|(_, event)| vec![event])
                .unwrap_or_default(),
            MutationKind::UpsertCollaboration {
                root_id,
                collaborator_id,
                role,
            } => {
                let (_, event) = self
                    .store
                    .upsert_collaboration(root_id, collaborator_id, *role)?;
                vec![event]
            }
            MutationKind::DeleteCollaboration {
                root_id,
                collaborator_id,
                deleted_at,
            } => self
                .store
                .delete_collaboration(root_id, collaborator_id, *deleted_at)?
                .map(|(_, event)| vec![event])
                .unwrap_or_default(),
            MutationKind::UpsertInteraction {
                record_id,
                root_id,
                seen_at,
                opened_at,
            } => {
                let (_, event) = self.store.upsert_interaction(
                    root_id,
                    record_id,
                    user_id,
                    *seen_at,
                    *opened_at,
                )?;
                vec![event]
            }
            MutationKind::UpsertReaction {
                record_id,
                root_id,
                reaction,
                created_at,
            } => {
                let (_, event) = self.store.upsert_reaction(
                    root_id,
                    record_id,
                    user_id,
                    reaction,
                    *created_at,
                )?;
                vec![event]
            }
            MutationKind::DeleteReaction {
                record_id,
                root_id,
                reaction,
                deleted_at,
            } => self
                .store
                .delete_reaction(root_id, record_id, user_id, reaction, *deleted_at)?
                .map(|(_, event)| vec![event])
                .unwrap_or_default(),
        };

        Ok(events)
    }
}

enum Authorization {
    Granted,
    Bootstrap,
    NoCollaboration,
    RoleTooLow,
}
