use sqlx::{Executor, Result, Sqlite};

use super::model::*;
use crate::media::{NewRecord, TargetKind};

const RECORD_COLUMNS: &str = "id, media_id, target_kind, target_id, caption, score, model_version, \
                              embedding, created_at, current, superseded_at";

/// 添加媒体项
pub async fn add_media<'c, E>(
    executor: E,
    hash: &str,
    kind: &str,
    path: &str,
    size: i64,
    ingested_at: i64,
) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO media (hash, kind, path, size, ingested_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(hash)
    .bind(kind)
    .bind(path)
    .bind(size)
    .bind(ingested_at)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// 根据哈希查找媒体项
pub async fn find_media_by_hash<'c, E>(executor: E, hash: &str) -> Result<Option<MediaRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as("SELECT id, hash, kind, path, size, ingested_at FROM media WHERE hash = ?")
        .bind(hash)
        .fetch_optional(executor)
        .await
}

pub async fn get_media<'c, E>(executor: E, id: i64) -> Result<Option<MediaRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as("SELECT id, hash, kind, path, size, ingested_at FROM media WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// 删除媒体项，关键帧和描述记录通过外键级联删除
pub async fn delete_media<'c, E>(executor: E, id: i64) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM media WHERE id = ?").bind(id).execute(executor).await?;
    Ok(result.rows_affected())
}

/// 按类型统计媒体项数量，返回 (图片, 视频)
pub async fn count_media<'c, E>(executor: E) -> Result<(i64, i64)>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(kind = 'image'), 0),
            COALESCE(SUM(kind = 'video'), 0)
        FROM media
        "#,
    )
    .fetch_one(executor)
    .await
}

pub async fn add_keyframe<'c, E>(
    executor: E,
    media_id: i64,
    ordinal: i64,
    timestamp_ms: i64,
    hash: &str,
) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO keyframe (media_id, ordinal, timestamp_ms, hash)
        VALUES (?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(media_id)
    .bind(ordinal)
    .bind(timestamp_ms)
    .bind(hash)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// 获取视频的所有关键帧，按序号排序
pub async fn get_keyframes<'c, E>(executor: E, media_id: i64) -> Result<Vec<KeyframeRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT id, media_id, ordinal, timestamp_ms, hash FROM keyframe
        WHERE media_id = ? ORDER BY ordinal ASC
        "#,
    )
    .bind(media_id)
    .fetch_all(executor)
    .await
}

pub async fn delete_keyframe<'c, E>(executor: E, id: i64) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM keyframe WHERE id = ?").bind(id).execute(executor).await?;
    Ok(result.rows_affected())
}

/// 添加一条 current 描述记录
pub async fn add_record<'c, E>(executor: E, record: &NewRecord, created_at: i64) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO record
            (media_id, target_kind, target_id, caption, score, model_version, embedding, created_at, current)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)
        RETURNING id
        "#,
    )
    .bind(record.media_id)
    .bind(record.target.kind().as_str())
    .bind(record.target.id())
    .bind(&record.caption)
    .bind(record.score as f64)
    .bind(&record.model_version)
    .bind(encode_embedding(&record.embedding))
    .bind(created_at)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

pub async fn get_record<'c, E>(executor: E, id: i64) -> Result<Option<RecordRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(&format!("SELECT {RECORD_COLUMNS} FROM record WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// 获取目标的 current 记录
pub async fn get_current_record<'c, E>(
    executor: E,
    kind: TargetKind,
    target_id: i64,
) -> Result<Option<RecordRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(&format!(
        "SELECT {RECORD_COLUMNS} FROM record WHERE target_kind = ? AND target_id = ? AND current = 1"
    ))
    .bind(kind.as_str())
    .bind(target_id)
    .fetch_optional(executor)
    .await
}

/// 将记录标记为已被替换
pub async fn set_superseded<'c, E>(executor: E, id: i64, at: i64) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE record SET current = 0, superseded_at = ? WHERE id = ? AND current = 1")
        .bind(at)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_record<'c, E>(executor: E, id: i64) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM record WHERE id = ?").bind(id).execute(executor).await?;
    Ok(result.rows_affected())
}

/// 删除某个目标的所有记录，返回其中 current 记录的 ID
pub async fn delete_target_records<'c, E>(executor: E, kind: TargetKind, target_id: i64) -> Result<Vec<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows: Vec<(i64, bool)> = sqlx::query_as(
        "DELETE FROM record WHERE target_kind = ? AND target_id = ? RETURNING id, current",
    )
    .bind(kind.as_str())
    .bind(target_id)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().filter(|(_, current)| *current).map(|(id, _)| id).collect())
}

/// 获取媒体项的所有记录
pub async fn get_media_records<'c, E>(executor: E, media_id: i64, current_only: bool) -> Result<Vec<RecordRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(&format!(
        "SELECT {RECORD_COLUMNS} FROM record WHERE media_id = ? AND (current = 1 OR ? = 0) ORDER BY id ASC"
    ))
    .bind(media_id)
    .bind(current_only)
    .fetch_all(executor)
    .await
}

/// 获取所有 current 记录以及索引需要的附加信息
pub async fn get_indexed_records<'c, E>(executor: E) -> Result<Vec<IndexedRecordRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT
            r.id, r.media_id, r.target_kind, r.target_id, r.caption, r.score, r.model_version,
            r.embedding, r.created_at, r.current, r.superseded_at,
            m.kind AS media_kind, m.path AS media_path,
            k.ordinal AS ordinal, k.timestamp_ms AS timestamp_ms
        FROM record r
        JOIN media m ON m.id = r.media_id
        LEFT JOIN keyframe k ON r.target_kind = 'keyframe' AND k.id = r.target_id
        WHERE r.current = 1
        ORDER BY r.id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 统计记录数量，返回 (current, 已替换)
pub async fn count_records<'c, E>(executor: E) -> Result<(i64, i64)>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(current = 1), 0),
            COALESCE(SUM(current = 0), 0)
        FROM record
        "#,
    )
    .fetch_one(executor)
    .await
}

/// 找出没有对应媒体项或关键帧的记录，正常情况下应当为空
pub async fn get_orphan_records<'c, E>(executor: E) -> Result<Vec<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT r.id FROM record r
        LEFT JOIN keyframe k ON k.id = r.target_id
        WHERE r.target_kind = 'keyframe' AND k.id IS NULL
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
