use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde_json::json;

use crate::cli::*;
use crate::config::Opts;
use crate::error::Error;
use crate::index::Metric;
use crate::library::Retention;
use crate::media::{ContentHash, DescriptiveRecord, Target};
use crate::query::{AggregateCache, format_timestamp};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 媒体项的内容哈希
    pub hash: String,
    /// 同时显示已被替换的记录
    #[arg(long)]
    pub all: bool,
    /// 以 JSON 格式输出
    #[arg(long)]
    pub json: bool,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let hash: ContentHash = self.hash.parse().map_err(Error::InvalidArgument)?;
        let library = open_library(opts, Metric::default(), Retention::default()).await?;

        let Some(item) = library.media_by_hash(&hash).await? else {
            return Err(Error::NotFound(format!("media {hash}")).into());
        };
        let keyframes = library.keyframes(item.id).await?;
        let records = library.media_records(item.id, !self.all).await?;
        let aggregate = AggregateCache::new().get(&library, item.id).await?;
        let preview = library.preview(&item).await;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "media": item,
                    "keyframes": keyframes,
                    "records": records,
                    "aggregate": aggregate.as_deref(),
                    "preview": preview,
                }))?
            );
            library.close().await;
            return Ok(());
        }

        println!("hash:     {}", item.hash);
        println!("kind:     {}", item.kind.as_str());
        println!("path:     {}", item.path);
        println!("size:     {}", item.size);
        println!("ingested: {}", format_time(item.ingested_at));
        if let Some(preview) = &preview {
            println!("preview:  {}", preview.display());
        }

        if !keyframes.is_empty() {
            println!("\nkeyframes:");
            for kf in &keyframes {
                println!("  #{:<3} {}  {}", kf.ordinal, format_timestamp(kf.timestamp_ms), kf.hash);
            }
        }

        println!("\nrecords:");
        for record in &records {
            print_record(record, &keyframes);
        }

        if let Some(aggregate) = aggregate {
            println!("\nsummary:\n{}", aggregate.summary);
        }
        library.close().await;
        Ok(())
    }
}

fn print_record(record: &DescriptiveRecord, keyframes: &[crate::media::Keyframe]) {
    let target = match record.target {
        Target::Media(_) => "whole".to_owned(),
        Target::Keyframe(id) => match keyframes.iter().find(|kf| kf.id == id) {
            Some(kf) => format!("keyframe #{}", kf.ordinal),
            None => format!("keyframe {id}"),
        },
    };
    let state = match record.superseded_at {
        Some(at) => format!("superseded {}", format_time(at)),
        None => "current".to_owned(),
    };
    println!(
        "  [{}] {target} ({}, {}, score {:.2}): {}",
        record.id, record.model_version, state, record.score, record.caption
    );
}

fn format_time(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
