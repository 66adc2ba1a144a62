use chrono::{Duration, Utc};
use docperm_storage::{
    CreateDocumentParams, CreateGroupParams, CreateSubspaceParams, CreateWorkspaceParams,
    DocumentId, GrantFilter, GrantId, GrantStore, GroupId, GuestStatus, Level, NewGrant,
    Principal, ResourceRef, SourceType, StoreError, SubspaceId, SubspaceRole, SubspaceType,
    UpsertGuestParams, UserId, WorkspaceId, WorkspaceRole,
};
use docperm_store_sqlite::SqliteStore;

struct Tree {
    ws: WorkspaceId,
    sub: SubspaceId,
    parent: DocumentId,
    child: DocumentId,
}

async fn seed(s: &SqliteStore) -> Tree {
    let creator = UserId::new();
    let ws = s
        .create_workspace(&CreateWorkspaceParams {
            id: WorkspaceId::new(),
            name: "acme".to_string(),
        })
        .await
        .unwrap();
    let sub = s
        .create_subspace(&CreateSubspaceParams {
            id: SubspaceId::new(),
            workspace_id: ws,
            name: "eng".to_string(),
            subspace_type: SubspaceType::InviteOnly,
            created_by_id: creator,
        })
        .await
        .unwrap();
    let parent = s
        .create_document(&CreateDocumentParams {
            id: DocumentId::new(),
            workspace_id: ws,
            subspace_id: Some(sub),
            parent_id: None,
            title: "Design".to_string(),
        })
        .await
        .unwrap();
    let child = s
        .create_document(&CreateDocumentParams {
            id: DocumentId::new(),
            workspace_id: ws,
            subspace_id: Some(sub),
            parent_id: Some(parent),
            title: "Design / Storage".to_string(),
        })
        .await
        .unwrap();
    Tree {
        ws,
        sub,
        parent,
        child,
    }
}

fn grant(principal: Principal, resource: ResourceRef, level: Level, source: SourceType) -> NewGrant {
    NewGrant {
        principal,
        resource,
        level,
        source_type: source,
        source_id: None,
        created_by_id: None,
    }
}

#[tokio::test]
async fn hierarchy_round_trips() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let t = seed(&s).await;

    let doc = s.get_document(&t.child).await.unwrap();
    assert_eq!(doc.parent_id, Some(t.parent));
    assert_eq!(doc.subspace_id, Some(t.sub));
    assert_eq!(
        doc.ancestry(),
        vec![
            ResourceRef::Document(t.child),
            ResourceRef::Subspace(t.sub),
            ResourceRef::Workspace(t.ws),
        ]
    );

    let roots = s.list_subspace_root_documents(&t.sub).await.unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, t.parent);

    let children = s.list_child_documents(&t.parent).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, t.child);

    // batch fetch keeps caller order and drops unknown ids
    let docs = s
        .get_documents(&[t.child, DocumentId::new(), t.parent])
        .await
        .unwrap();
    let ids: Vec<_> = docs.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![t.child, t.parent]);

    s.move_document(&t.child, None, Some(t.sub)).await.unwrap();
    assert_eq!(s.get_document(&t.child).await.unwrap().parent_id, None);

    s.set_subspace_type(&t.sub, SubspaceType::Public).await.unwrap();
    assert_eq!(
        s.get_subspace(&t.sub).await.unwrap().subspace_type,
        SubspaceType::Public
    );
}

#[tokio::test]
async fn membership_upserts_role() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let t = seed(&s).await;
    let user = UserId::new();

    s.add_workspace_member(&t.ws, &user, WorkspaceRole::Member)
        .await
        .unwrap();
    s.add_workspace_member(&t.ws, &user, WorkspaceRole::Admin)
        .await
        .unwrap();
    let members = s.list_workspace_members(&t.ws).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, WorkspaceRole::Admin);

    s.add_subspace_member(&t.sub, &user, SubspaceRole::Member)
        .await
        .unwrap();
    assert_eq!(s.list_subspace_members(&t.sub).await.unwrap().len(), 1);
    s.remove_subspace_member(&t.sub, &user).await.unwrap();
    let err = s.remove_subspace_member(&t.sub, &user).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn grant_upsert_respects_explicit_rows() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let t = seed(&s).await;
    let user = Principal::User(UserId::new());
    let doc = ResourceRef::Document(t.parent);

    let explicit = s
        .upsert_grant(&grant(user, doc, Level::Read, SourceType::Direct))
        .await
        .unwrap();

    // same key, explicit write: updates in place
    let updated = s
        .upsert_grant(&grant(user, doc, Level::Edit, SourceType::Direct))
        .await
        .unwrap();
    assert_eq!(updated.id, explicit.id);
    assert_eq!(updated.level, Level::Edit);
    assert_eq!(updated.created_at, explicit.created_at);

    // same key, inherited write: explicit row wins
    let mut inherited = grant(user, doc, Level::Owner, SourceType::Direct);
    inherited.source_id = Some(GrantId::new());
    let kept = s.upsert_grant(&inherited).await.unwrap();
    assert_eq!(kept.level, Level::Edit);
    assert_eq!(kept.source_id, None);

    assert_eq!(s.list_resource_grants(&doc).await.unwrap().len(), 1);
}

#[tokio::test]
async fn source_links_and_batch_lookup() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let t = seed(&s).await;
    let user = Principal::User(UserId::new());

    let origin = s
        .upsert_grant(&grant(
            user,
            ResourceRef::Document(t.parent),
            Level::Manage,
            SourceType::Direct,
        ))
        .await
        .unwrap();
    let copy = s
        .upsert_grant(&NewGrant::inherited_from(
            &origin,
            ResourceRef::Document(t.child),
        ))
        .await
        .unwrap();
    assert_eq!(copy.source_id, Some(origin.id));

    let linked = s.list_grants_by_source(&origin.id).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, copy.id);

    let batch = s
        .list_principal_grants(
            &user,
            &[
                ResourceRef::Document(t.child),
                ResourceRef::Subspace(t.sub),
                ResourceRef::Workspace(t.ws),
            ],
        )
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, copy.id);

    assert_eq!(
        s.update_grants_by_source(&origin.id, Level::Comment)
            .await
            .unwrap(),
        1
    );
    assert_eq!(s.get_grant(&copy.id).await.unwrap().level, Level::Comment);

    assert_eq!(s.delete_grants_by_source(&origin.id).await.unwrap(), 1);
    assert!(s.list_grants_by_source(&origin.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn replace_inherited_and_filtered_delete() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let t = seed(&s).await;
    let doc = ResourceRef::Document(t.child);
    let alice = Principal::User(UserId::new());
    let bob = Principal::User(UserId::new());

    s.upsert_grant(&grant(alice, doc, Level::Comment, SourceType::Direct))
        .await
        .unwrap();
    let mut stale = grant(bob, doc, Level::Edit, SourceType::SubspaceMember);
    stale.source_id = Some(GrantId::new());
    s.upsert_grant(&stale).await.unwrap();

    let mut fresh = grant(bob, doc, Level::Read, SourceType::WorkspaceMember);
    fresh.source_id = Some(GrantId::new());
    let written = s.replace_inherited_grants(&doc, &[fresh]).await.unwrap();
    assert_eq!(written.len(), 1);

    let rows = s.list_resource_grants(&doc).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|g| g.source_type != SourceType::SubspaceMember));

    let deleted = s
        .delete_grants(&GrantFilter {
            resource: Some(doc),
            source_types: vec![SourceType::WorkspaceMember],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].principal, bob);
    assert_eq!(s.list_resource_grants(&doc).await.unwrap().len(), 1);
}

#[tokio::test]
async fn groups_and_group_permissions() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let t = seed(&s).await;
    let user = UserId::new();

    let group = s
        .create_group(&CreateGroupParams {
            id: GroupId::new(),
            workspace_id: t.ws,
            name: "writers".to_string(),
        })
        .await
        .unwrap();
    let dup = s
        .create_group(&CreateGroupParams {
            id: GroupId::new(),
            workspace_id: t.ws,
            name: "writers".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(dup, StoreError::AlreadyExists));

    s.add_group_member(&group, &user).await.unwrap();
    s.add_group_member(&group, &user).await.unwrap();
    assert_eq!(s.list_group_members(&group).await.unwrap().len(), 1);
    assert_eq!(s.list_user_groups(&user).await.unwrap()[0].id, group);

    let doc = ResourceRef::Document(t.parent);
    s.set_group_permission(&group, &doc, Level::Comment)
        .await
        .unwrap();
    let perm = s.set_group_permission(&group, &doc, Level::Edit).await.unwrap();
    assert_eq!(perm.level, Level::Edit);
    assert_eq!(s.list_group_permissions(&group).await.unwrap().len(), 1);

    s.remove_group_permission(&group, &doc).await.unwrap();
    let err = s.get_group_permission(&group, &doc).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn guest_lifecycle() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let t = seed(&s).await;
    let now = Utc::now();

    let params = UpsertGuestParams {
        email: "guest@example.com".to_string(),
        workspace_id: t.ws,
        status: GuestStatus::Active,
        expires_at: now + Duration::days(7),
        invited_by_id: Some(UserId::new()),
    };
    let guest = s.upsert_guest(&params).await.unwrap();

    // re-invite refreshes the same row and keeps the inviter
    let again = s
        .upsert_guest(&UpsertGuestParams {
            expires_at: now - Duration::minutes(5),
            invited_by_id: None,
            ..params.clone()
        })
        .await
        .unwrap();
    assert_eq!(again.id, guest.id);
    assert_eq!(again.invited_by_id, params.invited_by_id);

    s.upsert_grant(&grant(
        Principal::Guest(guest.id),
        ResourceRef::Document(t.parent),
        Level::Comment,
        SourceType::Guest,
    ))
    .await
    .unwrap();

    let expired = s.list_expired_guests(now).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(s.delete_guest_grants(&guest.id).await.unwrap(), 1);

    assert!(s.mark_guest_expired(&guest.id, now).await.unwrap());
    assert!(!s.mark_guest_expired(&guest.id, now).await.unwrap());
    assert_eq!(
        s.get_guest(&guest.id).await.unwrap().status,
        GuestStatus::Expired
    );
    assert!(s.list_expired_guests(now).await.unwrap().is_empty());
}

#[tokio::test]
async fn common_error_mapping_paths() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let t = seed(&s).await;

    // Duplicate workspace id → AlreadyExists
    let err = s
        .create_workspace(&CreateWorkspaceParams {
            id: t.ws,
            name: "again".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists));

    // Dangling parent → NotFound
    let err = s
        .create_document(&CreateDocumentParams {
            id: DocumentId::new(),
            workspace_id: t.ws,
            subspace_id: None,
            parent_id: Some(DocumentId::new()),
            title: "orphan".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound));

    // Self-parenting → Conflict
    let err = s
        .move_document(&t.parent, Some(t.parent), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict));

    let err = s.get_grant(&GrantId::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
    let err = s
        .update_grant_level(&GrantId::new(), Level::Read)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}
