use sqlx::{SqliteConnection, SqlitePool};
use tombola_models::{AuditDetail, AuditEntry, DomainError, Result};

/// Append one audit entry. Takes a bare connection so callers can run it
/// inside the same transaction as the state change it records. The table is
/// append-only; nothing in this crate updates or deletes from it.
pub async fn append(
    conn: &mut SqliteConnection,
    entity: &str,
    entity_id: i64,
    actor: Option<&str>,
    detail: &AuditDetail,
) -> Result<()> {
    let metadata =
        serde_json::to_string(detail).map_err(|_| DomainError::InvalidInput("audit metadata"))?;
    sqlx::query(
        "INSERT INTO audit_log (action, entity, entity_id, actor_user_id, metadata) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(detail.action())
    .bind(entity)
    .bind(entity_id.to_string())
    .bind(actor)
    .bind(metadata)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditEntry>> {
    let entries = sqlx::query_as::<_, AuditEntry>(
        "SELECT id, action, entity, entity_id, actor_user_id, metadata, created_at \
         FROM audit_log ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

pub async fn list_for_entity(
    pool: &SqlitePool,
    entity: &str,
    entity_id: i64,
) -> Result<Vec<AuditEntry>> {
    let entries = sqlx::query_as::<_, AuditEntry>(
        "SELECT id, action, entity, entity_id, actor_user_id, metadata, created_at \
         FROM audit_log WHERE entity = ? AND entity_id = ? ORDER BY id",
    )
    .bind(entity)
    .bind(entity_id.to_string())
    .fetch_all(pool)
    .await?;
    Ok(entries)
}
