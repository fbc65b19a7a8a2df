use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::{debug, info};

use crate::cli::*;
use crate::config::{ModelOptions, Opts, SearchOptions};
use crate::library::Retention;
use crate::query::{QueryEngine, QueryOptions, SearchResult, format_timestamp};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 查询文本
    pub query: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let library = open_library(opts, self.search.metric, Retention::default()).await?;
        let embedder = build_embedder(&self.model)?;
        let engine = QueryEngine::new(
            library.clone(),
            embedder,
            QueryOptions {
                fanout: self.search.fanout,
                tie_break: self.search.tie_break,
                timeout: self.model.timeout(),
            },
        );

        let result = engine.search(&self.query, self.search.k, self.search.scope).await?;
        if result.is_empty() {
            let stats = library.stats().await?;
            if stats.index_entries == 0 {
                info!("媒体库为空");
            }
        }
        debug!("{} 条结果", result.len());

        print_result(&result, self)?;
        library.close().await;
        Ok(())
    }
}

fn print_result(result: &[SearchResult], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for r in result {
                let source = match r.provenance.timestamp_ms {
                    Some(ts) => format!("@{}", format_timestamp(ts)),
                    None => "-".to_owned(),
                };
                println!("{:.4}\t{}\t{}\t{}\t{}", r.score, r.kind.as_str(), r.path, source, r.provenance.caption);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
