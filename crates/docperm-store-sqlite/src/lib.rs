//! SQLite `GrantStore` backend.
//!
//! IDs are stored as TEXT, timestamps as INTEGER milliseconds since the epoch.

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docperm_storage::{
    CreateDocumentParams, CreateGroupParams, CreateSubspaceParams, CreateWorkspaceParams,
    Document, DocumentId, GrantFilter, GrantId, GrantKey, GrantStore, Group, GroupId,
    GroupMember, GroupPermission, GuestGrant, GuestId, GuestStatus, Level, NewGrant,
    PermissionGrant, Principal, ResourceRef, ResourceType, StoreError, Subspace, SubspaceId,
    SubspaceMember, SubspaceRole, SubspaceType, UpsertGuestParams, UserId, Workspace,
    WorkspaceId, WorkspaceMember, WorkspaceRole,
};
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const GRANT_COLUMNS: &str = "id, user_id, guest_id, resource_type, resource_id, level, \
     source_type, source_id, created_by_id, created_at";

const DOCUMENT_COLUMNS: &str = "id, workspace_id, subspace_id, parent_id, title, created_at";

const GUEST_COLUMNS: &str =
    "id, email, workspace_id, status, expires_at, invited_by_id, created_at, updated_at";

type GrantRow = (
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
);

type DocumentRow = (String, String, Option<String>, Option<String>, String, i64);

type GuestRow = (String, String, String, String, i64, Option<String>, i64, i64);

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    /// Connect to `url` (e.g. `sqlite://docperm.db?mode=rwc`) and run migrations.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(backend)?;

        MIGRATOR.run(&pool).await.map_err(backend)?;

        Ok(Self { pool })
    }
}

// ───────────────────────────── Row mapping ─────────────────────────────

fn backend(e: impl Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Map constraint violations on writes to their storage meaning.
fn write_err(e: sqlx::Error) -> StoreError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        StoreError::AlreadyExists
    } else if s.contains("FOREIGN KEY") {
        StoreError::NotFound
    } else {
        StoreError::Backend(s)
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::try_parse(s).map_err(backend)
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, StoreError> {
    s.as_deref().map(parse_uuid).transpose()
}

fn parse_enum<T>(s: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    s.parse::<T>().map_err(backend)
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {ms}")))
}

fn grant_from_row(row: GrantRow) -> Result<PermissionGrant, StoreError> {
    let (
        id,
        user_id,
        guest_id,
        resource_type,
        resource_id,
        level,
        source_type,
        source_id,
        created_by_id,
        created_at,
    ) = row;
    let principal = Principal::from_parts(
        parse_opt_uuid(user_id)?.map(UserId),
        parse_opt_uuid(guest_id)?.map(GuestId),
    )
    .map_err(backend)?;
    Ok(PermissionGrant {
        id: GrantId(parse_uuid(&id)?),
        principal,
        resource: ResourceRef::from_parts(
            parse_enum::<ResourceType>(&resource_type)?,
            parse_uuid(&resource_id)?,
        ),
        level: parse_enum(&level)?,
        source_type: parse_enum(&source_type)?,
        source_id: parse_opt_uuid(source_id)?.map(GrantId),
        created_by_id: parse_opt_uuid(created_by_id)?.map(UserId),
        created_at: from_millis(created_at)?,
    })
}

fn grants_from_rows(rows: Vec<GrantRow>) -> Result<Vec<PermissionGrant>, StoreError> {
    rows.into_iter().map(grant_from_row).collect()
}

fn document_from_row(row: DocumentRow) -> Result<Document, StoreError> {
    let (id, workspace_id, subspace_id, parent_id, title, created_at) = row;
    Ok(Document {
        id: DocumentId(parse_uuid(&id)?),
        workspace_id: WorkspaceId(parse_uuid(&workspace_id)?),
        subspace_id: parse_opt_uuid(subspace_id)?.map(SubspaceId),
        parent_id: parse_opt_uuid(parent_id)?.map(DocumentId),
        title,
        created_at: from_millis(created_at)?,
    })
}

fn guest_from_row(row: GuestRow) -> Result<GuestGrant, StoreError> {
    let (id, email, workspace_id, status, expires_at, invited_by_id, created_at, updated_at) = row;
    Ok(GuestGrant {
        id: GuestId(parse_uuid(&id)?),
        email,
        workspace_id: WorkspaceId(parse_uuid(&workspace_id)?),
        status: parse_enum(&status)?,
        expires_at: from_millis(expires_at)?,
        invited_by_id: parse_opt_uuid(invited_by_id)?.map(UserId),
        created_at: from_millis(created_at)?,
        updated_at: from_millis(updated_at)?,
    })
}

async fn fetch_grant_by_key(
    conn: &mut SqliteConnection,
    key: &GrantKey,
) -> Result<Option<PermissionGrant>, StoreError> {
    let row = sqlx::query_as::<_, GrantRow>(&format!(
        "SELECT {GRANT_COLUMNS} FROM permission_grants
          WHERE principal_key=? AND resource_type=? AND resource_id=? AND source_type=?"
    ))
    .bind(key.principal.key())
    .bind(key.resource.resource_type().as_str())
    .bind(key.resource.id().to_string())
    .bind(key.source_type.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(backend)?;
    row.map(grant_from_row).transpose()
}

/// Keyed upsert. An inherited row never replaces an explicit one; `created_at` is kept.
async fn upsert_grant_on(
    conn: &mut SqliteConnection,
    grant: &NewGrant,
) -> Result<PermissionGrant, StoreError> {
    sqlx::query(
        "INSERT INTO permission_grants(id,principal_key,user_id,guest_id,resource_type,resource_id,
                                       level,source_type,source_id,created_by_id,created_at)
         VALUES(?,?,?,?,?,?,?,?,?,?,?)
         ON CONFLICT(principal_key,resource_type,resource_id,source_type)
         DO UPDATE SET level=excluded.level,
                       source_id=excluded.source_id,
                       created_by_id=excluded.created_by_id
         WHERE permission_grants.source_id IS NOT NULL OR excluded.source_id IS NULL",
    )
    .bind(GrantId::new().to_string())
    .bind(grant.principal.key())
    .bind(grant.principal.user_id().map(|u| u.to_string()))
    .bind(grant.principal.guest_id().map(|g| g.to_string()))
    .bind(grant.resource.resource_type().as_str())
    .bind(grant.resource.id().to_string())
    .bind(grant.level.as_str())
    .bind(grant.source_type.as_str())
    .bind(grant.source_id.map(|s| s.to_string()))
    .bind(grant.created_by_id.map(|u| u.to_string()))
    .bind(millis(Utc::now()))
    .execute(&mut *conn)
    .await
    .map_err(write_err)?;

    fetch_grant_by_key(conn, &grant.key())
        .await?
        .ok_or_else(|| StoreError::Backend("upserted grant vanished".into()))
}

#[async_trait]
impl GrantStore for SqliteStore {
    // ───────────────────────────── Hierarchy ─────────────────────────────

    async fn create_workspace(
        &self,
        params: &CreateWorkspaceParams,
    ) -> Result<WorkspaceId, StoreError> {
        sqlx::query("INSERT INTO workspaces(id,name,created_at) VALUES(?,?,?)")
            .bind(params.id.to_string())
            .bind(&params.name)
            .bind(millis(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(params.id)
    }

    async fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Workspace, StoreError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT name, created_at FROM workspaces WHERE id=?",
        )
        .bind(workspace_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Err(StoreError::NotFound),
            Some((name, created_at)) => Ok(Workspace {
                id: *workspace_id,
                name,
                created_at: from_millis(created_at)?,
            }),
        }
    }

    async fn create_subspace(
        &self,
        params: &CreateSubspaceParams,
    ) -> Result<SubspaceId, StoreError> {
        sqlx::query(
            "INSERT INTO subspaces(id,workspace_id,name,subspace_type,created_by_id,created_at)
             VALUES(?,?,?,?,?,?)",
        )
        .bind(params.id.to_string())
        .bind(params.workspace_id.to_string())
        .bind(&params.name)
        .bind(params.subspace_type.as_str())
        .bind(params.created_by_id.to_string())
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(params.id)
    }

    async fn get_subspace(&self, subspace_id: &SubspaceId) -> Result<Subspace, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String, String, i64)>(
            "SELECT workspace_id, name, subspace_type, created_by_id, created_at
               FROM subspaces WHERE id=?",
        )
        .bind(subspace_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let (workspace_id, name, subspace_type, created_by_id, created_at) =
            row.ok_or(StoreError::NotFound)?;
        Ok(Subspace {
            id: *subspace_id,
            workspace_id: WorkspaceId(parse_uuid(&workspace_id)?),
            name,
            subspace_type: parse_enum(&subspace_type)?,
            created_by_id: UserId(parse_uuid(&created_by_id)?),
            created_at: from_millis(created_at)?,
        })
    }

    async fn list_subspaces(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Subspace>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, i64)>(
            "SELECT id, name, subspace_type, created_by_id, created_at
               FROM subspaces WHERE workspace_id=? ORDER BY created_at, id",
        )
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, name, subspace_type, created_by_id, created_at) in rows {
            out.push(Subspace {
                id: SubspaceId(parse_uuid(&id)?),
                workspace_id: *workspace_id,
                name,
                subspace_type: parse_enum(&subspace_type)?,
                created_by_id: UserId(parse_uuid(&created_by_id)?),
                created_at: from_millis(created_at)?,
            });
        }
        Ok(out)
    }

    async fn set_subspace_type(
        &self,
        subspace_id: &SubspaceId,
        subspace_type: SubspaceType,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE subspaces SET subspace_type=? WHERE id=?")
            .bind(subspace_type.as_str())
            .bind(subspace_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_document(
        &self,
        params: &CreateDocumentParams,
    ) -> Result<DocumentId, StoreError> {
        sqlx::query(
            "INSERT INTO documents(id,workspace_id,subspace_id,parent_id,title,created_at)
             VALUES(?,?,?,?,?,?)",
        )
        .bind(params.id.to_string())
        .bind(params.workspace_id.to_string())
        .bind(params.subspace_id.map(|s| s.to_string()))
        .bind(params.parent_id.map(|p| p.to_string()))
        .bind(&params.title)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(params.id)
    }

    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id=?"
        ))
        .bind(document_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(document_from_row)
            .transpose()?
            .ok_or(StoreError::NotFound)
    }

    async fn get_documents(
        &self,
        document_ids: &[DocumentId],
    ) -> Result<Vec<Document>, StoreError> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id IN ("
        ));
        let mut ids = qb.separated(", ");
        for id in document_ids {
            ids.push_bind(id.to_string());
        }
        ids.push_unseparated(")");

        let rows = qb
            .build_query_as::<DocumentRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let docs = rows
            .into_iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        // Keep the caller's order
        Ok(document_ids
            .iter()
            .filter_map(|id| docs.iter().find(|d| d.id == *id).cloned())
            .collect())
    }

    async fn list_subspace_root_documents(
        &self,
        subspace_id: &SubspaceId,
    ) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
              WHERE subspace_id=? AND parent_id IS NULL
              ORDER BY created_at, id"
        ))
        .bind(subspace_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(document_from_row).collect()
    }

    async fn list_child_documents(
        &self,
        document_id: &DocumentId,
    ) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE parent_id=? ORDER BY created_at, id"
        ))
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(document_from_row).collect()
    }

    async fn move_document(
        &self,
        document_id: &DocumentId,
        parent_id: Option<DocumentId>,
        subspace_id: Option<SubspaceId>,
    ) -> Result<(), StoreError> {
        if parent_id == Some(*document_id) {
            return Err(StoreError::Conflict);
        }
        let result = sqlx::query("UPDATE documents SET parent_id=?, subspace_id=? WHERE id=?")
            .bind(parent_id.map(|p| p.to_string()))
            .bind(subspace_id.map(|s| s.to_string()))
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ───────────────────────────── Membership ─────────────────────────────

    async fn add_workspace_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: WorkspaceRole,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO workspace_members(workspace_id,user_id,role,created_at) VALUES(?,?,?,?)
             ON CONFLICT(workspace_id,user_id) DO UPDATE SET role=excluded.role",
        )
        .bind(workspace_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn list_workspace_members(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<WorkspaceMember>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT user_id, role, created_at FROM workspace_members
              WHERE workspace_id=? ORDER BY created_at, user_id",
        )
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out = Vec::with_capacity(rows.len());
        for (user_id, role, created_at) in rows {
            out.push(WorkspaceMember {
                workspace_id: *workspace_id,
                user_id: UserId(parse_uuid(&user_id)?),
                role: parse_enum(&role)?,
                created_at: from_millis(created_at)?,
            });
        }
        Ok(out)
    }

    async fn remove_workspace_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM workspace_members WHERE workspace_id=? AND user_id=?")
            .bind(workspace_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn add_subspace_member(
        &self,
        subspace_id: &SubspaceId,
        user_id: &UserId,
        role: SubspaceRole,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO subspace_members(subspace_id,user_id,role,created_at) VALUES(?,?,?,?)
             ON CONFLICT(subspace_id,user_id) DO UPDATE SET role=excluded.role",
        )
        .bind(subspace_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn list_subspace_members(
        &self,
        subspace_id: &SubspaceId,
    ) -> Result<Vec<SubspaceMember>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT user_id, role, created_at FROM subspace_members
              WHERE subspace_id=? ORDER BY created_at, user_id",
        )
        .bind(subspace_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out = Vec::with_capacity(rows.len());
        for (user_id, role, created_at) in rows {
            out.push(SubspaceMember {
                subspace_id: *subspace_id,
                user_id: UserId(parse_uuid(&user_id)?),
                role: parse_enum(&role)?,
                created_at: from_millis(created_at)?,
            });
        }
        Ok(out)
    }

    async fn remove_subspace_member(
        &self,
        subspace_id: &SubspaceId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM subspace_members WHERE subspace_id=? AND user_id=?")
            .bind(subspace_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ───────────────────────────── Groups ─────────────────────────────

    async fn create_group(&self, params: &CreateGroupParams) -> Result<GroupId, StoreError> {
        sqlx::query("INSERT INTO groups(id,workspace_id,name,created_at) VALUES(?,?,?,?)")
            .bind(params.id.to_string())
            .bind(params.workspace_id.to_string())
            .bind(&params.name)
            .bind(millis(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(write_err)?;
        Ok(params.id)
    }

    async fn get_group(&self, group_id: &GroupId) -> Result<Group, StoreError> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT workspace_id, name, created_at FROM groups WHERE id=?",
        )
        .bind(group_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let (workspace_id, name, created_at) = row.ok_or(StoreError::NotFound)?;
        Ok(Group {
            id: *group_id,
            workspace_id: WorkspaceId(parse_uuid(&workspace_id)?),
            name,
            created_at: from_millis(created_at)?,
        })
    }

    async fn add_group_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO group_members(group_id,user_id,created_at) VALUES(?,?,?)
             ON CONFLICT(group_id,user_id) DO NOTHING",
        )
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn remove_group_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM group_members WHERE group_id=? AND user_id=?")
            .bind(group_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_group_members(&self, group_id: &GroupId) -> Result<Vec<GroupMember>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT user_id, created_at FROM group_members
              WHERE group_id=? ORDER BY created_at, user_id",
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out = Vec::with_capacity(rows.len());
        for (user_id, created_at) in rows {
            out.push(GroupMember {
                group_id: *group_id,
                user_id: UserId(parse_uuid(&user_id)?),
                created_at: from_millis(created_at)?,
            });
        }
        Ok(out)
    }

    async fn list_user_groups(&self, user_id: &UserId) -> Result<Vec<Group>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT g.id, g.workspace_id, g.name, g.created_at
               FROM groups g
               JOIN group_members gm ON gm.group_id=g.id
              WHERE gm.user_id=?
              ORDER BY g.name",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, workspace_id, name, created_at) in rows {
            out.push(Group {
                id: GroupId(parse_uuid(&id)?),
                workspace_id: WorkspaceId(parse_uuid(&workspace_id)?),
                name,
                created_at: from_millis(created_at)?,
            });
        }
        Ok(out)
    }

    async fn set_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
        level: Level,
    ) -> Result<GroupPermission, StoreError> {
        sqlx::query(
            "INSERT INTO group_permissions(group_id,resource_type,resource_id,level,created_at)
             VALUES(?,?,?,?,?)
             ON CONFLICT(group_id,resource_type,resource_id) DO UPDATE SET level=excluded.level",
        )
        .bind(group_id.to_string())
        .bind(resource.resource_type().as_str())
        .bind(resource.id().to_string())
        .bind(level.as_str())
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        self.get_group_permission(group_id, resource).await
    }

    async fn get_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
    ) -> Result<GroupPermission, StoreError> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT level, created_at FROM group_permissions
              WHERE group_id=? AND resource_type=? AND resource_id=?",
        )
        .bind(group_id.to_string())
        .bind(resource.resource_type().as_str())
        .bind(resource.id().to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let (level, created_at) = row.ok_or(StoreError::NotFound)?;
        Ok(GroupPermission {
            group_id: *group_id,
            resource: *resource,
            level: parse_enum(&level)?,
            created_at: from_millis(created_at)?,
        })
    }

    async fn list_group_permissions(
        &self,
        group_id: &GroupId,
    ) -> Result<Vec<GroupPermission>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT resource_type, resource_id, level, created_at FROM group_permissions
              WHERE group_id=? ORDER BY created_at",
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out = Vec::with_capacity(rows.len());
        for (resource_type, resource_id, level, created_at) in rows {
            out.push(GroupPermission {
                group_id: *group_id,
                resource: ResourceRef::from_parts(
                    parse_enum(&resource_type)?,
                    parse_uuid(&resource_id)?,
                ),
                level: parse_enum(&level)?,
                created_at: from_millis(created_at)?,
            });
        }
        Ok(out)
    }

    async fn remove_group_permission(
        &self,
        group_id: &GroupId,
        resource: &ResourceRef,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM group_permissions WHERE group_id=? AND resource_type=? AND resource_id=?",
        )
        .bind(group_id.to_string())
        .bind(resource.resource_type().as_str())
        .bind(resource.id().to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ───────────────────────────── Grants ─────────────────────────────

    async fn upsert_grant(&self, grant: &NewGrant) -> Result<PermissionGrant, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        upsert_grant_on(&mut *conn, grant).await
    }

    async fn get_grant(&self, grant_id: &GrantId) -> Result<PermissionGrant, StoreError> {
        let row = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM permission_grants WHERE id=?"
        ))
        .bind(grant_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(grant_from_row)
            .transpose()?
            .ok_or(StoreError::NotFound)
    }

    async fn get_grant_by_key(&self, key: &GrantKey) -> Result<PermissionGrant, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        fetch_grant_by_key(&mut *conn, key)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn list_resource_grants(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM permission_grants
              WHERE resource_type=? AND resource_id=?
              ORDER BY created_at, id"
        ))
        .bind(resource.resource_type().as_str())
        .bind(resource.id().to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        grants_from_rows(rows)
    }

    async fn list_principal_grants(
        &self,
        principal: &Principal,
        resources: &[ResourceRef],
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        if resources.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {GRANT_COLUMNS} FROM permission_grants WHERE principal_key="
        ));
        qb.push_bind(principal.key());
        qb.push(" AND resource_id IN (");
        let mut ids = qb.separated(", ");
        for resource in resources {
            ids.push_bind(resource.id().to_string());
        }
        ids.push_unseparated(") ORDER BY created_at, id");

        let rows = qb
            .build_query_as::<GrantRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(grants_from_rows(rows)?
            .into_iter()
            .filter(|g| resources.contains(&g.resource))
            .collect())
    }

    async fn list_grants_by_source(
        &self,
        source_id: &GrantId,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM permission_grants WHERE source_id=? ORDER BY created_at, id"
        ))
        .bind(source_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        grants_from_rows(rows)
    }

    async fn update_grant_level(
        &self,
        grant_id: &GrantId,
        level: Level,
    ) -> Result<PermissionGrant, StoreError> {
        let result = sqlx::query("UPDATE permission_grants SET level=? WHERE id=?")
            .bind(level.as_str())
            .bind(grant_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_grant(grant_id).await
    }

    async fn update_grants_by_source(
        &self,
        source_id: &GrantId,
        level: Level,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE permission_grants SET level=? WHERE source_id=?")
            .bind(level.as_str())
            .bind(source_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn delete_grant(&self, grant_id: &GrantId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM permission_grants WHERE id=?")
            .bind(grant_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_grants_by_source(&self, source_id: &GrantId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM permission_grants WHERE source_id=?")
            .bind(source_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn delete_grants(
        &self,
        filter: &GrantFilter,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {GRANT_COLUMNS} FROM permission_grants WHERE 1=1"
        ));
        if let Some(resource) = &filter.resource {
            qb.push(" AND resource_type=");
            qb.push_bind(resource.resource_type().as_str());
            qb.push(" AND resource_id=");
            qb.push_bind(resource.id().to_string());
        }
        if let Some(principal) = &filter.principal {
            qb.push(" AND principal_key=");
            qb.push_bind(principal.key());
        }
        if let Some(level) = &filter.level {
            qb.push(" AND level=");
            qb.push_bind(level.as_str());
        }
        if !filter.source_types.is_empty() {
            qb.push(" AND source_type IN (");
            let mut kinds = qb.separated(", ");
            for source_type in &filter.source_types {
                kinds.push_bind(source_type.as_str());
            }
            kinds.push_unseparated(")");
        }
        qb.push(" ORDER BY created_at, id");

        let rows = qb
            .build_query_as::<GrantRow>()
            .fetch_all(&mut *tx)
            .await
            .map_err(backend)?;
        let deleted = grants_from_rows(rows)?;

        for grant in &deleted {
            sqlx::query("DELETE FROM permission_grants WHERE id=?")
                .bind(grant.id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(deleted)
    }

    async fn replace_inherited_grants(
        &self,
        resource: &ResourceRef,
        grants: &[NewGrant],
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "DELETE FROM permission_grants
              WHERE resource_type=? AND resource_id=? AND source_id IS NOT NULL",
        )
        .bind(resource.resource_type().as_str())
        .bind(resource.id().to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let mut written = Vec::with_capacity(grants.len());
        for grant in grants.iter().filter(|g| g.resource == *resource) {
            written.push(upsert_grant_on(&mut *tx, grant).await?);
        }

        tx.commit().await.map_err(backend)?;
        Ok(written)
    }

    async fn delete_guest_grants(&self, guest_id: &GuestId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM permission_grants WHERE guest_id=?")
            .bind(guest_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    // ───────────────────────────── Guests ─────────────────────────────

    async fn upsert_guest(&self, params: &UpsertGuestParams) -> Result<GuestGrant, StoreError> {
        let now = millis(Utc::now());
        sqlx::query(
            "INSERT INTO guests(id,email,workspace_id,status,expires_at,invited_by_id,created_at,updated_at)
             VALUES(?,?,?,?,?,?,?,?)
             ON CONFLICT(email,workspace_id)
             DO UPDATE SET status=excluded.status,
                           expires_at=excluded.expires_at,
                           invited_by_id=COALESCE(excluded.invited_by_id, guests.invited_by_id),
                           updated_at=excluded.updated_at",
        )
        .bind(GuestId::new().to_string())
        .bind(&params.email)
        .bind(params.workspace_id.to_string())
        .bind(params.status.as_str())
        .bind(millis(params.expires_at))
        .bind(params.invited_by_id.map(|u| u.to_string()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        let row = sqlx::query_as::<_, GuestRow>(&format!(
            "SELECT {GUEST_COLUMNS} FROM guests WHERE email=? AND workspace_id=?"
        ))
        .bind(&params.email)
        .bind(params.workspace_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(guest_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::Backend("upserted guest vanished".into()))
    }

    async fn get_guest(&self, guest_id: &GuestId) -> Result<GuestGrant, StoreError> {
        let row = sqlx::query_as::<_, GuestRow>(&format!(
            "SELECT {GUEST_COLUMNS} FROM guests WHERE id=?"
        ))
        .bind(guest_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(guest_from_row)
            .transpose()?
            .ok_or(StoreError::NotFound)
    }

    async fn list_expired_guests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<GuestGrant>, StoreError> {
        let rows = sqlx::query_as::<_, GuestRow>(&format!(
            "SELECT {GUEST_COLUMNS} FROM guests
              WHERE expires_at < ? AND status <> ?
              ORDER BY expires_at"
        ))
        .bind(millis(now))
        .bind(GuestStatus::Expired.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(guest_from_row).collect()
    }

    async fn set_guest_status(
        &self,
        guest_id: &GuestId,
        status: GuestStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE guests SET status=?, updated_at=? WHERE id=?")
            .bind(status.as_str())
            .bind(millis(Utc::now()))
            .bind(guest_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_guest_expired(
        &self,
        guest_id: &GuestId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE guests SET status=?, updated_at=?
              WHERE id=? AND status <> ? AND expires_at < ?",
        )
        .bind(GuestStatus::Expired.as_str())
        .bind(millis(now))
        .bind(guest_id.to_string())
        .bind(GuestStatus::Expired.as_str())
        .bind(millis(now))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish "someone else expired it" from "no such guest"
        self.get_guest(guest_id).await.map(|_| false)
    }
}
