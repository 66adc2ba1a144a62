//! Re-derivation of inherited grants when documents move.

mod common;

use std::collections::{BTreeSet, HashSet};

use common::Fixture;
use docperm_engine::{AssignPermission, EngineError};
use docperm_storage::{
    CreateSubspaceParams, CreateWorkspaceParams, DocumentId, GrantStore, Level, ResourceRef,
    SubspaceId, SubspaceRole, SubspaceType, UserId, WorkspaceId, WorkspaceRole,
};

fn direct(user_id: UserId, document_id: DocumentId, level: Level) -> AssignPermission {
    AssignPermission {
        user_id: Some(user_id),
        guest_id: None,
        resource: ResourceRef::Document(document_id),
        level,
        created_by_id: None,
    }
}

/// Two subspaces. `x` (with child `y`) starts under `p1` in the first and is
/// moved under `p2` in the second.
struct MoveSetup {
    fx: Fixture,
    target_subspace: SubspaceId,
    p1: DocumentId,
    p2: DocumentId,
    x: DocumentId,
    y: DocumentId,
    old_owner: UserId,
    new_reader: UserId,
    member: UserId,
    pinned: UserId,
}

async fn setup() -> MoveSetup {
    let fx = Fixture::new().await;
    let target_subspace = fx.subspace(SubspaceType::InviteOnly).await;
    let p1 = fx.document(Some(fx.subspace_id), None).await;
    let x = fx.document(Some(fx.subspace_id), Some(p1)).await;
    let y = fx.document(Some(fx.subspace_id), Some(x)).await;
    let p2 = fx.document(Some(target_subspace), None).await;

    let old_owner = UserId::new();
    let new_reader = UserId::new();
    let member = UserId::new();
    let pinned = UserId::new();

    fx.engine
        .assign_user_permission(direct(old_owner, p1, Level::Edit))
        .await
        .unwrap();
    fx.engine
        .assign_subspace_permissions(target_subspace, member, SubspaceRole::Member, None)
        .await
        .unwrap();
    fx.engine
        .assign_user_permission(direct(new_reader, p2, Level::Comment))
        .await
        .unwrap();
    fx.engine
        .assign_user_permission(direct(pinned, x, Level::Manage))
        .await
        .unwrap();

    MoveSetup {
        fx,
        target_subspace,
        p1,
        p2,
        x,
        y,
        old_owner,
        new_reader,
        member,
        pinned,
    }
}

#[tokio::test]
async fn test_moved_rows_only_reference_new_position() {
    let s = setup().await;
    let fx = &s.fx;
    assert_eq!(fx.level(s.old_owner, s.x).await, Level::Edit);

    fx.engine
        .move_document(s.x, Some(s.p2), Some(s.target_subspace))
        .await
        .unwrap();

    let allowed: HashSet<_> = fx
        .rows(ResourceRef::Document(s.p2))
        .await
        .into_iter()
        .chain(fx.rows(ResourceRef::Subspace(s.target_subspace)).await)
        .map(|g| g.id)
        .collect();
    let old_parent: HashSet<_> = fx
        .rows(ResourceRef::Document(s.p1))
        .await
        .into_iter()
        .map(|g| g.id)
        .collect();

    for row in fx.rows(ResourceRef::Document(s.x)).await {
        if let Some(source_id) = row.source_id {
            assert!(allowed.contains(&source_id), "stale source on {row:?}");
            assert!(!old_parent.contains(&source_id));
        }
    }

    assert_eq!(fx.level(s.old_owner, s.x).await, Level::None);
    assert_eq!(fx.level(s.new_reader, s.x).await, Level::Comment);
    assert_eq!(fx.level(s.member, s.x).await, Level::Read);
    // Explicit rows survive the move
    assert_eq!(fx.level(s.pinned, s.x).await, Level::Manage);
}

#[tokio::test]
async fn test_children_follow_into_new_subspace() {
    let s = setup().await;
    let fx = &s.fx;

    let report = fx
        .engine
        .move_document(s.x, Some(s.p2), Some(s.target_subspace))
        .await
        .unwrap();
    assert_eq!(report.nodes, 2);
    assert!(!report.deferred);

    let y = fx.store.get_document(&s.y).await.unwrap();
    assert_eq!(y.subspace_id, Some(s.target_subspace));
    assert_eq!(y.parent_id, Some(s.x));

    let x_rows: HashSet<_> = fx
        .rows(ResourceRef::Document(s.x))
        .await
        .into_iter()
        .map(|g| g.id)
        .collect();
    let role_rows: HashSet<_> = fx
        .rows(ResourceRef::Subspace(s.target_subspace))
        .await
        .into_iter()
        .map(|g| g.id)
        .collect();
    for row in fx.rows(ResourceRef::Document(s.y)).await {
        let source_id = row.source_id.unwrap();
        assert!(x_rows.contains(&source_id) || role_rows.contains(&source_id));
    }

    assert_eq!(fx.level(s.old_owner, s.y).await, Level::None);
    assert_eq!(fx.level(s.new_reader, s.y).await, Level::Comment);
    assert_eq!(fx.level(s.pinned, s.y).await, Level::Manage);
}

#[tokio::test]
async fn test_repeated_move_converges() {
    let s = setup().await;
    let fx = &s.fx;

    let shape = |rows: Vec<docperm_storage::PermissionGrant>| -> BTreeSet<String> {
        rows.into_iter()
            .map(|g| {
                format!(
                    "{}/{}/{}",
                    g.principal.key(),
                    g.source_type.as_str(),
                    g.level.as_str()
                )
            })
            .collect()
    };

    fx.engine
        .move_document(s.x, Some(s.p2), Some(s.target_subspace))
        .await
        .unwrap();
    let first_x = fx.rows(ResourceRef::Document(s.x)).await;
    let first_y = fx.rows(ResourceRef::Document(s.y)).await;

    fx.engine
        .update_permissions_on_move(s.x, Some(s.p2), Some(s.target_subspace))
        .await
        .unwrap();
    let second_x = fx.rows(ResourceRef::Document(s.x)).await;
    let second_y = fx.rows(ResourceRef::Document(s.y)).await;

    assert_eq!(first_x.len(), second_x.len());
    assert_eq!(first_y.len(), second_y.len());
    assert_eq!(shape(first_x), shape(second_x));
    assert_eq!(shape(first_y), shape(second_y));
}

#[tokio::test]
async fn test_move_to_subspace_root_inherits_subspace_grants() {
    let s = setup().await;
    let fx = &s.fx;
    let admin = UserId::new();
    fx.engine
        .assign_workspace_permissions(fx.workspace_id, admin, WorkspaceRole::Admin, None)
        .await
        .unwrap();

    fx.engine
        .move_document(s.x, None, Some(s.target_subspace))
        .await
        .unwrap();

    let subspace_rows = fx.rows(ResourceRef::Subspace(s.target_subspace)).await;
    let admin_on_subspace = subspace_rows
        .iter()
        .find(|g| g.principal.user_id() == Some(admin))
        .unwrap();
    let admin_on_x = fx
        .rows(ResourceRef::Document(s.x))
        .await
        .into_iter()
        .find(|g| g.principal.user_id() == Some(admin))
        .unwrap();
    assert_eq!(admin_on_x.source_id, Some(admin_on_subspace.id));

    assert_eq!(fx.level(admin, s.x).await, Level::Manage);
    assert_eq!(fx.level(s.member, s.x).await, Level::Read);
    assert_eq!(fx.level(s.new_reader, s.x).await, Level::None);
}

#[tokio::test]
async fn test_caller_moved_subtree_is_rederived() {
    let s = setup().await;
    let fx = &s.fx;

    fx.store
        .move_document(&s.x, Some(s.p2), Some(s.target_subspace))
        .await
        .unwrap();
    fx.store
        .move_document(&s.y, Some(s.x), Some(s.target_subspace))
        .await
        .unwrap();
    fx.engine
        .update_permissions_on_move(s.x, Some(s.p2), None)
        .await
        .unwrap();

    assert_eq!(fx.level(s.old_owner, s.y).await, Level::None);
    assert_eq!(fx.level(s.new_reader, s.y).await, Level::Comment);
    assert_eq!(fx.level(s.member, s.x).await, Level::Read);
}

#[tokio::test]
async fn test_rederive_after_move_leaves_hierarchy_alone() {
    let s = setup().await;
    let fx = &s.fx;
    let p3 = fx.document(Some(fx.subspace_id), None).await;
    let before_y = fx.store.get_document(&s.y).await.unwrap();

    fx.store
        .move_document(&s.x, Some(p3), Some(fx.subspace_id))
        .await
        .unwrap();
    fx.engine
        .update_permissions_on_move(s.x, Some(p3), None)
        .await
        .unwrap();

    let x = fx.store.get_document(&s.x).await.unwrap();
    let y = fx.store.get_document(&s.y).await.unwrap();
    assert_eq!(x.subspace_id, Some(fx.subspace_id));
    assert_eq!(y.subspace_id, before_y.subspace_id);
    assert_eq!(y.parent_id, before_y.parent_id);
    assert_eq!(fx.level(s.old_owner, s.y).await, Level::None);
    assert_eq!(fx.level(s.pinned, s.y).await, Level::Manage);
}

#[tokio::test]
async fn test_reparent_within_subspace_keeps_subspace() {
    let s = setup().await;
    let fx = &s.fx;
    let p3 = fx.document(Some(fx.subspace_id), None).await;
    let writer = UserId::new();
    let local = UserId::new();
    fx.engine
        .assign_user_permission(direct(writer, p3, Level::Edit))
        .await
        .unwrap();
    fx.engine
        .assign_subspace_permissions(fx.subspace_id, local, SubspaceRole::Admin, None)
        .await
        .unwrap();
    assert_eq!(fx.level(local, s.y).await, Level::Manage);

    fx.engine.move_document(s.x, Some(p3), None).await.unwrap();

    let x = fx.store.get_document(&s.x).await.unwrap();
    let y = fx.store.get_document(&s.y).await.unwrap();
    assert_eq!(x.parent_id, Some(p3));
    assert_eq!(x.subspace_id, Some(fx.subspace_id));
    assert_eq!(y.parent_id, Some(s.x));
    assert_eq!(y.subspace_id, Some(fx.subspace_id));

    for doc in [s.x, s.y] {
        assert_eq!(fx.level(writer, doc).await, Level::Edit);
        assert_eq!(fx.level(s.old_owner, doc).await, Level::None);
        assert_eq!(fx.level(local, doc).await, Level::Manage);
    }
    let listed = fx
        .store
        .list_subspace_root_documents(&fx.subspace_id)
        .await
        .unwrap();
    assert!(listed.iter().all(|d| d.id != s.x && d.id != s.y));
}

#[tokio::test]
async fn test_move_without_subspace_takes_parent_subspace() {
    let s = setup().await;
    let fx = &s.fx;

    fx.engine.move_document(s.x, Some(s.p2), None).await.unwrap();

    let x = fx.store.get_document(&s.x).await.unwrap();
    let y = fx.store.get_document(&s.y).await.unwrap();
    assert_eq!(x.subspace_id, Some(s.target_subspace));
    assert_eq!(y.subspace_id, Some(s.target_subspace));
    assert_eq!(fx.level(s.member, s.y).await, Level::Read);
    assert_eq!(fx.level(s.new_reader, s.y).await, Level::Comment);
}

#[tokio::test]
async fn test_move_rejects_subspace_not_containing_parent() {
    let s = setup().await;
    let fx = &s.fx;
    let before = fx.rows(ResourceRef::Document(s.x)).await;

    let err = fx
        .engine
        .move_document(s.x, Some(s.p2), Some(fx.subspace_id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let err = fx
        .engine
        .update_permissions_on_move(s.x, Some(s.p1), Some(s.target_subspace))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let x = fx.store.get_document(&s.x).await.unwrap();
    assert_eq!(x.parent_id, Some(s.p1));
    assert_eq!(x.subspace_id, Some(fx.subspace_id));
    assert_eq!(fx.rows(ResourceRef::Document(s.x)).await, before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_moves_cannot_form_a_cycle() {
    let fx = Fixture::new().await;

    for _ in 0..10 {
        let a = fx.document(Some(fx.subspace_id), None).await;
        let b = fx.document(Some(fx.subspace_id), None).await;

        let a_under_b = {
            let engine = fx.engine.clone();
            tokio::spawn(async move { engine.move_document(a, Some(b), None).await })
        };
        let b_under_a = {
            let engine = fx.engine.clone();
            tokio::spawn(async move { engine.move_document(b, Some(a), None).await })
        };
        let results = [a_under_b.await.unwrap(), b_under_a.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(EngineError::InvalidArgument(_)))));

        let a_doc = fx.store.get_document(&a).await.unwrap();
        let b_doc = fx.store.get_document(&b).await.unwrap();
        assert!(!(a_doc.parent_id == Some(b) && b_doc.parent_id == Some(a)));
        assert!(a_doc.parent_id.is_none() || b_doc.parent_id.is_none());
    }
}

#[tokio::test]
async fn test_move_below_own_subtree_is_rejected() {
    let s = setup().await;
    let fx = &s.fx;
    let before = fx.rows(ResourceRef::Document(s.x)).await;

    let err = fx
        .engine
        .move_document(s.p1, Some(s.y), Some(fx.subspace_id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let err = fx
        .engine
        .move_document(s.x, Some(s.x), Some(fx.subspace_id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    assert_eq!(fx.rows(ResourceRef::Document(s.x)).await, before);
    let p1 = fx.store.get_document(&s.p1).await.unwrap();
    assert_eq!(p1.parent_id, None);
}

#[tokio::test]
async fn test_move_with_missing_or_foreign_targets() {
    let s = setup().await;
    let fx = &s.fx;

    let err = fx
        .engine
        .move_document(DocumentId::new(), Some(s.p2), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = fx
        .engine
        .move_document(s.x, None, Some(SubspaceId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = fx
        .engine
        .move_document(s.x, Some(DocumentId::new()), Some(s.target_subspace))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let elsewhere = fx
        .store
        .create_workspace(&CreateWorkspaceParams {
            id: WorkspaceId::new(),
            name: "elsewhere".to_string(),
        })
        .await
        .unwrap();
    let foreign = fx
        .store
        .create_subspace(&CreateSubspaceParams {
            id: SubspaceId::new(),
            workspace_id: elsewhere,
            name: "foreign".to_string(),
            subspace_type: SubspaceType::Private,
            created_by_id: fx.creator,
        })
        .await
        .unwrap();
    let err = fx
        .engine
        .move_document(s.x, None, Some(foreign))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    // Nothing moved
    let x = fx.store.get_document(&s.x).await.unwrap();
    assert_eq!(x.parent_id, Some(s.p1));
    assert_eq!(x.subspace_id, Some(fx.subspace_id));
}
