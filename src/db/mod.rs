use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use sqlx::{SqlitePool, migrate::Migrator, sqlite::*};

pub mod crud;
pub mod model;

pub use model::*;

pub type Database = SqlitePool;

static MIGRATOR: Migrator = sqlx::migrate!();

/// 打开媒体库数据库，不存在时创建，并应用尚未执行的迁移
///
/// 关键帧和记录通过外键级联删除，因此每个连接都必须打开 foreign_keys。
pub async fn init_db(filename: impl AsRef<Path>) -> Result<Database, sqlx::Error> {
    let filename = filename.as_ref();
    info!("打开媒体库: {}", filename.display());

    let options = SqliteConnectOptions::new()
        .filename(filename)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        // 写入由索引写锁串行化，这里只需要容忍其他进程的短暂写锁
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(num_cpus::get().clamp(2, 16) as u32)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    debug!("数据库结构版本: {}", MIGRATOR.iter().map(|m| m.version).max().unwrap_or_default());

    Ok(pool)
}
