//! Rebuilding placement snapshots from deletion payloads.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;

use crate::model::{EntityKind, ParentRef, Snapshot};
use crate::payload::{EntityPayload, Relationship};

/// Snapshots of one deleted entity: one per superseded placement plus the
/// placement that ended with the deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub historical: Vec<Snapshot>,
    pub last: Snapshot,
}

impl Placement {
    pub fn into_snapshots(self) -> impl Iterator<Item = Snapshot> {
        self.historical.into_iter().chain(std::iter::once(self.last))
    }
}

/// Rebuild the placements of `entity`, a `kind` deleted at `deleted_at`.
///
/// `previous_end` is asked for the end of the latest placement of the same
/// key known so far; it is only consulted when neither the payload's
/// relationships nor its registration timestamp say where the last
/// placement starts.
pub fn reconstruct<F>(
    kind: EntityKind,
    entity: &EntityPayload,
    deleted_at: DateTime<Utc>,
    previous_end: F,
) -> Placement
where
    F: FnOnce() -> Option<DateTime<Utc>>,
{
    let accepts = kind.parent_kinds();
    let code = entity
        .code()
        .map(str::to_string)
        .or_else(|| (kind == EntityKind::Space).then(|| entity.key.clone()));
    let perm_id = (kind != EntityKind::Space).then(|| entity.key.clone());
    let describe = |snapshot: Snapshot| {
        snapshot
            .with_code(code.clone())
            .with_perm_id(perm_id.clone())
    };

    let mut ranked: Vec<(usize, Snapshot)> = entity
        .relationships()
        .filter_map(|relationship| {
            let to = relationship.valid_until?;
            let parent = relationship.parent(accepts)?;
            let from = relationship
                .valid_from
                .or_else(|| entity.registration_timestamp())
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            let rank = specificity(&parent, accepts);
            Some((
                rank,
                describe(Snapshot::new(from, Some(to)).with_parent(Some(parent))),
            ))
        })
        .collect();
    // One placement per start instant: the most specific owner wins.
    ranked.sort_by_key(|(rank, snapshot)| (snapshot.from, *rank));
    ranked.dedup_by_key(|(_, snapshot)| snapshot.from);
    let historical: Vec<Snapshot> = ranked.into_iter().map(|(_, snapshot)| snapshot).collect();

    let current = current_relationship(entity, accepts);
    let last = match current {
        Some((relationship, parent)) => {
            let from = relationship
                .valid_from
                .unwrap_or_else(|| synthetic_start(entity, &historical, previous_end));
            Snapshot::new(from, Some(deleted_at)).with_parent(Some(parent))
        }
        None => {
            let from = synthetic_start(entity, &historical, previous_end);
            Snapshot::new(from, Some(deleted_at))
        }
    };

    Placement {
        historical,
        last: describe(last),
    }
}

/// The accepted relationship without `valid_until`; the latest `valid_from`
/// wins when there are several, then the most specific owner.
fn current_relationship<'a>(
    entity: &'a EntityPayload,
    accepts: &[EntityKind],
) -> Option<(&'a Relationship, ParentRef)> {
    entity
        .relationships()
        .filter(|relationship| relationship.is_current())
        .filter_map(|relationship| {
            relationship
                .parent(accepts)
                .map(|parent| (relationship, parent))
        })
        .max_by_key(|(relationship, parent)| {
            (relationship.valid_from, Reverse(specificity(parent, accepts)))
        })
}

/// Position of the parent's kind in `accepts`, most specific first.
/// Unresolved owners rank after every known kind.
fn specificity(parent: &ParentRef, accepts: &[EntityKind]) -> usize {
    parent
        .kind()
        .and_then(|kind| accepts.iter().position(|accepted| *accepted == kind))
        .unwrap_or(accepts.len())
}

fn synthetic_start<F>(
    entity: &EntityPayload,
    historical: &[Snapshot],
    previous_end: F,
) -> DateTime<Utc>
where
    F: FnOnce() -> Option<DateTime<Utc>>,
{
    historical
        .iter()
        .filter_map(|snapshot| snapshot.to)
        .max()
        .or_else(|| entity.registration_timestamp())
        .or_else(previous_end)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Owner of a deleted attachment: the current project, experiment or sample
/// relationship of its payload, else the `<kind>/<permId>/...` prefix of its
/// identifier.
#[must_use]
pub fn attachment_owner(entity: &EntityPayload) -> Option<(EntityKind, String)> {
    let from_payload = current_relationship(entity, EntityKind::Attachment.parent_kinds())
        .and_then(|(_, parent)| parent.kind().map(|kind| (kind, parent.key().to_string())));
    from_payload.or_else(|| owner_from_identifier(&entity.key))
}

fn owner_from_identifier(identifier: &str) -> Option<(EntityKind, String)> {
    let (prefix, rest) = identifier.split_once('/')?;
    let kind = match prefix {
        "project" => EntityKind::Project,
        "experiment" => EntityKind::Experiment,
        "sample" => EntityKind::Sample,
        _ => return None,
    };
    let (perm_id, _file) = rest.split_once('/')?;
    (!perm_id.is_empty()).then(|| (kind, perm_id.to_string()))
}
