//! Property tests for the resolved-view invariants.
//!
//! For any reachable state: views are sorted by position with direct
//! entries first, no entry is duplicated at one position, and every
//! lineage keeps exactly one latest row.

use proptest::prelude::*;
use reliquary_acl::{Ace, AcePattern, AclProperties, AclService, PermissionRef};
use reliquary_core::{AclId, ChangeRecord, QName};
use std::collections::HashSet;

fn authority(index: usize) -> String {
    format!("user-{index}")
}

fn permission(index: usize) -> PermissionRef {
    PermissionRef::new(
        QName::new("http://reliquary.example/model", "content"),
        format!("perm-{index}"),
    )
}

#[derive(Debug, Clone)]
enum Op {
    AddParent(usize, usize),
    AddChild(usize, usize),
    DeleteParent(usize),
    DeleteChild(usize),
    NewChangeSet,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize, 0..3usize).prop_map(|(a, p)| Op::AddParent(a, p)),
        (0..4usize, 0..3usize).prop_map(|(a, p)| Op::AddChild(a, p)),
        (0..4usize).prop_map(Op::DeleteParent),
        (0..4usize).prop_map(Op::DeleteChild),
        Just(Op::NewChangeSet),
    ]
}

fn follow(records: &[ChangeRecord], id: AclId) -> AclId {
    records
        .iter()
        .find(|record| record.before == id)
        .and_then(|record| record.after)
        .unwrap_or(id)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn views_stay_ordered_and_deduplicated(
        ops in proptest::collection::vec(op_strategy(), 1..40)
    ) {
        let mut service = AclService::new();
        let mut parent = service
            .create_acl_with(
                AclProperties::defining(),
                vec![Ace::allow(authority(0), permission(0))],
                None,
            )
            .unwrap();
        let mut child = service
            .create_acl_with(
                AclProperties::defining(),
                vec![Ace::allow(authority(1), permission(0))],
                Some(parent),
            )
            .unwrap();

        for op in ops {
            let records = match op {
                Op::AddParent(a, p) => service
                    .set_ace(parent, Ace::allow(authority(a), permission(p)))
                    .unwrap(),
                Op::AddChild(a, p) => service
                    .set_ace(child, Ace::allow(authority(a), permission(p)))
                    .unwrap(),
                Op::DeleteParent(a) => service
                    .delete_aces(parent, Some(vec![AcePattern::for_authority(authority(a))]))
                    .unwrap(),
                Op::DeleteChild(a) => service
                    .delete_aces(child, Some(vec![AcePattern::for_authority(authority(a))]))
                    .unwrap(),
                Op::NewChangeSet => {
                    service.complete_change_set();
                    Vec::new()
                }
            };
            parent = follow(&records, parent);
            child = follow(&records, child);
        }

        for id in [parent, child] {
            let view = service.get_acl(id).unwrap();

            // Sorted by position, so direct entries always come first.
            let positions: Vec<u32> = view.iter().map(|entry| entry.position).collect();
            let mut sorted = positions.clone();
            sorted.sort_unstable();
            prop_assert_eq!(&positions, &sorted);

            // No duplicated entry at one position.
            let mut seen = HashSet::new();
            for entry in view.iter() {
                prop_assert!(seen.insert((
                    entry.authority.clone(),
                    entry.permission.clone(),
                    entry.status,
                    entry.ace_type,
                    entry.position,
                )));
            }

            // The id we tracked through the change records is the latest
            // row of its lineage.
            prop_assert_eq!(service.latest_id(id).unwrap(), id);
        }

        // The child still mirrors the parent: everything the parent
        // resolves is visible in the child one level deeper.
        let parent_view = service.get_acl(parent).unwrap();
        let child_view = service.get_acl(child).unwrap();
        for entry in parent_view.iter() {
            let mirrored = child_view.iter().any(|candidate| {
                candidate.authority == entry.authority
                    && candidate.permission == entry.permission
                    && candidate.position == entry.position + 1
            });
            prop_assert!(mirrored);
        }
    }
}

#[test]
fn three_level_chain_cascades_through_every_level() {
    let mut service = AclService::new();
    let top = service
        .create_acl_with(
            AclProperties::defining(),
            vec![Ace::allow("top", permission(0))],
            None,
        )
        .unwrap();
    let middle = service
        .create_acl_with(
            AclProperties::defining(),
            vec![Ace::allow("middle", permission(0))],
            Some(top),
        )
        .unwrap();
    let leaf = service
        .create_acl_with(
            AclProperties::defining(),
            vec![Ace::allow("leaf", permission(0))],
            Some(middle),
        )
        .unwrap();

    let view = service.get_acl(leaf).unwrap();
    let rendered: Vec<(&str, u32)> = view
        .iter()
        .map(|entry| (entry.authority.as_str(), entry.position))
        .collect();
    assert_eq!(rendered, vec![("leaf", 0), ("middle", 1), ("top", 2)]);

    // Fork the top in a fresh change-set; the whole chain follows.
    service.complete_change_set();
    let records = service
        .set_ace(top, Ace::allow("added", permission(1)))
        .unwrap();

    let leaf = follow(&records, leaf);
    let view = service.get_acl(leaf).unwrap();
    assert!(view
        .iter()
        .any(|entry| entry.authority == "added" && entry.position == 2));

    // Every list the cascade touched forked exactly once.
    for record in &records {
        assert!(record.id_changed());
    }
}
