//! Guest invites, revocation and the expiry sweep.

mod common;

use chrono::{Duration, Utc};
use common::Fixture;
use docperm_engine::{AssignPermission, EngineError, SweepReport};
use docperm_storage::{
    DocumentId, GrantStore, GuestStatus, Level, Principal, ResourceRef, UpsertGuestParams,
};

async fn guest_level(fx: &Fixture, principal: Principal, document_id: DocumentId) -> Level {
    fx.engine
        .resolve_effective_permission(&principal, &ResourceRef::Document(document_id))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_expired_guest_loses_access_after_sweep() {
    let fx = Fixture::new().await;
    let docs = fx.chain(2).await;

    let invite = fx
        .engine
        .invite_guest_collaborator(docs[0], "visitor@example.com", Level::Read, Some(fx.creator), Some(1))
        .await
        .unwrap();
    let guest = Principal::Guest(invite.guest.id);
    assert_eq!(invite.guest.status, GuestStatus::Active);
    assert_eq!(invite.grant.source_type, docperm_storage::SourceType::Guest);
    assert_eq!(guest_level(&fx, guest, docs[0]).await, Level::Read);
    // Never propagated to children
    assert_eq!(guest_level(&fx, guest, docs[1]).await, Level::None);
    assert!(fx.rows(ResourceRef::Document(docs[1])).await.is_empty());

    // Nothing is due yet
    let report = fx.engine.cleanup_expired_guest_permissions().await.unwrap();
    assert_eq!(report, SweepReport::default());

    let later = Utc::now() + Duration::days(2);
    let report = fx
        .engine
        .cleanup_expired_guest_permissions_at(later)
        .await
        .unwrap();
    assert_eq!(
        report,
        SweepReport {
            expired: 1,
            grants_removed: 1,
            failed: 0
        }
    );

    assert_eq!(guest_level(&fx, guest, docs[0]).await, Level::None);
    assert!(fx
        .store
        .list_principal_grants(&guest, &[ResourceRef::Document(docs[0])])
        .await
        .unwrap()
        .is_empty());
    let record = fx.store.get_guest(&invite.guest.id).await.unwrap();
    assert_eq!(record.status, GuestStatus::Expired);

    // A second pass finds nothing to do
    let again = fx
        .engine
        .cleanup_expired_guest_permissions_at(later)
        .await
        .unwrap();
    assert_eq!(again, SweepReport::default());
}

#[tokio::test]
async fn test_guest_past_expiry_resolves_to_none_before_sweep() {
    let fx = Fixture::new().await;
    let doc = fx.document(Some(fx.subspace_id), None).await;
    let invite = fx
        .engine
        .invite_guest_collaborator(doc, "late@example.com", Level::Edit, None, None)
        .await
        .unwrap();

    fx.store
        .upsert_guest(&UpsertGuestParams {
            email: invite.guest.email.clone(),
            workspace_id: fx.workspace_id,
            status: GuestStatus::Active,
            expires_at: Utc::now() - Duration::minutes(5),
            invited_by_id: None,
        })
        .await
        .unwrap();

    let guest = Principal::Guest(invite.guest.id);
    assert_eq!(guest_level(&fx, guest, doc).await, Level::None);
    // The row is still there until a sweep runs
    assert_eq!(fx.rows(ResourceRef::Document(doc)).await.len(), 1);
}

#[tokio::test]
async fn test_reinvite_refreshes_same_guest() {
    let fx = Fixture::new().await;
    let first_doc = fx.document(Some(fx.subspace_id), None).await;
    let second_doc = fx.document(Some(fx.subspace_id), None).await;

    let first = fx
        .engine
        .invite_guest_collaborator(first_doc, "Visitor@Example.com", Level::Read, None, Some(1))
        .await
        .unwrap();
    assert_eq!(first.guest.email, "visitor@example.com");
    let lifetime = first.guest.expires_at - Utc::now();
    assert!(lifetime > Duration::hours(23) && lifetime <= Duration::days(1));

    let second = fx
        .engine
        .invite_guest_collaborator(second_doc, " visitor@example.com ", Level::Comment, None, Some(10))
        .await
        .unwrap();
    assert_eq!(second.guest.id, first.guest.id);
    assert!(second.guest.expires_at > first.guest.expires_at);

    let guest = Principal::Guest(first.guest.id);
    assert_eq!(guest_level(&fx, guest, first_doc).await, Level::Read);
    assert_eq!(guest_level(&fx, guest, second_doc).await, Level::Comment);
}

#[tokio::test]
async fn test_revoked_guest_keeps_no_grants() {
    let fx = Fixture::new().await;
    let doc = fx.document(Some(fx.subspace_id), None).await;
    let invite = fx
        .engine
        .invite_guest_collaborator(doc, "gone@example.com", Level::Read, None, None)
        .await
        .unwrap();

    assert_eq!(fx.engine.revoke_guest(invite.guest.id).await.unwrap(), 1);
    let record = fx.store.get_guest(&invite.guest.id).await.unwrap();
    assert_eq!(record.status, GuestStatus::Revoked);
    assert!(fx.rows(ResourceRef::Document(doc)).await.is_empty());
    assert_eq!(
        guest_level(&fx, Principal::Guest(invite.guest.id), doc).await,
        Level::None
    );
}

#[tokio::test]
async fn test_direct_guest_assignment_is_document_only() {
    let fx = Fixture::new().await;
    let docs = fx.chain(2).await;
    let invite = fx
        .engine
        .invite_guest_collaborator(docs[0], "pal@example.com", Level::Read, None, None)
        .await
        .unwrap();

    let outcome = fx
        .engine
        .assign_user_permission(AssignPermission {
            user_id: None,
            guest_id: Some(invite.guest.id),
            resource: ResourceRef::Document(docs[0]),
            level: Level::Edit,
            created_by_id: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.grants[0].id, invite.grant.id);
    assert_eq!(outcome.propagation.upserted, 0);
    assert!(fx.rows(ResourceRef::Document(docs[1])).await.is_empty());

    let err = fx
        .engine
        .assign_user_permission(AssignPermission {
            user_id: None,
            guest_id: Some(invite.guest.id),
            resource: ResourceRef::Subspace(fx.subspace_id),
            level: Level::Read,
            created_by_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_invite_validation() {
    let fx = Fixture::new().await;
    let doc = fx.document(None, None).await;

    for email in ["", "nobody", "@example.com", "user@"] {
        let err = fx
            .engine
            .invite_guest_collaborator(doc, email, Level::Read, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)), "{email:?}");
    }

    let err = fx
        .engine
        .invite_guest_collaborator(doc, "ok@example.com", Level::None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let err = fx
        .engine
        .invite_guest_collaborator(doc, "ok@example.com", Level::Read, None, Some(0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    let err = fx
        .engine
        .invite_guest_collaborator(DocumentId::new(), "ok@example.com", Level::Read, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(fx
        .store
        .list_expired_guests(Utc::now() + Duration::days(365))
        .await
        .unwrap()
        .is_empty());
}
