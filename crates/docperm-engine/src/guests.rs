//! Guest collaborators: invite, revoke and the expiry sweep.
//!
//! Guest grants are document-scoped and never propagate to child documents.

use chrono::{DateTime, Duration, Utc};
use docperm_storage::{
    DocumentId, GrantStore, GuestGrant, GuestId, GuestStatus, Level, NewGrant, PermissionGrant,
    Principal, ResourceRef, SourceType, UpsertGuestParams, UserId,
};
use tracing::{info, warn};

use crate::{EngineError, PermissionEngine};

/// A guest record together with the document grant issued by the invite.
#[derive(Debug, Clone)]
pub struct GuestInvite {
    pub guest: GuestGrant,
    pub grant: PermissionGrant,
}

/// Counts from one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Guests this pass marked `EXPIRED`
    pub expired: usize,
    /// Grant rows deleted for those guests
    pub grants_removed: u64,
    /// Guests skipped after an error; the next pass retries them
    pub failed: usize,
}

fn normalize_email(email: &str) -> Result<String, EngineError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(EngineError::InvalidArgument(format!(
            "invalid guest email: {email:?}"
        ))),
    }
}

impl<S: GrantStore + 'static> PermissionEngine<S> {
    /// Invite (or re-invite) `email` to one document.
    ///
    /// The guest record is keyed by `(email, workspace)`; re-inviting refreshes
    /// its expiry and reactivates it. `expire_days` defaults to the configured
    /// guest lifetime.
    pub async fn invite_guest_collaborator(
        &self,
        document_id: DocumentId,
        email: &str,
        level: Level,
        inviter_id: Option<UserId>,
        expire_days: Option<u32>,
    ) -> Result<GuestInvite, EngineError> {
        let email = normalize_email(email)?;
        if level == Level::None {
            return Err(EngineError::InvalidArgument(
                "cannot invite a guest with level NONE".to_string(),
            ));
        }
        let days = expire_days.unwrap_or(self.config.guest_expire_days);
        if days == 0 {
            return Err(EngineError::InvalidArgument(
                "guest invite must last at least one day".to_string(),
            ));
        }

        let document = self
            .store
            .get_document(&document_id)
            .await
            .map_err(EngineError::lookup(format!("document {document_id}")))?;
        let _guard = self.lock(document.workspace_id).await?;

        let guest = self
            .store
            .upsert_guest(&UpsertGuestParams {
                email,
                workspace_id: document.workspace_id,
                status: GuestStatus::Active,
                expires_at: Utc::now() + Duration::days(i64::from(days)),
                invited_by_id: inviter_id,
            })
            .await?;
        let grant = self
            .store
            .upsert_grant(&NewGrant {
                principal: Principal::Guest(guest.id),
                resource: ResourceRef::Document(document_id),
                level,
                source_type: SourceType::Guest,
                source_id: None,
                created_by_id: inviter_id,
            })
            .await?;

        info!(
            guest_id = %guest.id,
            document_id = %document_id,
            level = level.as_str(),
            expires_at = %guest.expires_at,
            "Guest invited"
        );
        Ok(GuestInvite { guest, grant })
    }

    /// Delete every grant of a guest and mark it `REVOKED`. Returns rows deleted.
    pub async fn revoke_guest(&self, guest_id: GuestId) -> Result<u64, EngineError> {
        let guest = self
            .store
            .get_guest(&guest_id)
            .await
            .map_err(EngineError::lookup(format!("guest {guest_id}")))?;
        let _guard = self.lock(guest.workspace_id).await?;

        let removed = self.store.delete_guest_grants(&guest_id).await?;
        self.store
            .set_guest_status(&guest_id, GuestStatus::Revoked)
            .await?;

        info!(guest_id = %guest_id, removed, "Guest revoked");
        Ok(removed)
    }

    /// Expire every guest past its `expires_at`.
    pub async fn cleanup_expired_guest_permissions(&self) -> Result<SweepReport, EngineError> {
        self.cleanup_expired_guest_permissions_at(Utc::now()).await
    }

    /// Expiry sweep against an explicit clock.
    ///
    /// Safe to run from several workers at once: a guest another sweep already
    /// marked is skipped. A failing guest is logged and left for the next pass.
    pub async fn cleanup_expired_guest_permissions_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        for guest in self.store.list_expired_guests(now).await? {
            match self.expire_guest(&guest, now).await {
                Ok(Some(removed)) => {
                    report.expired += 1;
                    report.grants_removed += removed;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(guest_id = %guest.id, error = %e, "Failed to expire guest");
                    report.failed += 1;
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            info!(
                expired = report.expired,
                grants_removed = report.grants_removed,
                failed = report.failed,
                "Guest sweep finished"
            );
        }
        Ok(report)
    }

    /// `None` when a concurrent sweep marked the guest first.
    async fn expire_guest(
        &self,
        guest: &GuestGrant,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, EngineError> {
        let _guard = self.lock(guest.workspace_id).await?;
        // Grants go first so a crash in between is retried by the next pass
        let removed = self.store.delete_guest_grants(&guest.id).await?;
        let marked = self.store.mark_guest_expired(&guest.id, now).await?;
        Ok(marked.then_some(removed))
    }
}
