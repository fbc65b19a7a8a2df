use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::*;
use crate::config::Opts;
use crate::index::Metric;
use crate::library::Retention;

#[derive(Parser, Debug, Clone)]
pub struct CheckCommand {}

impl SubCommandExtend for CheckCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let library = open_library(opts, Metric::default(), Retention::default()).await?;
        info!("检查描述记录与索引……");
        let checked = library.check_consistency().await;
        let stats = library.stats().await?;
        library.close().await;

        let current = checked?;
        println!(
            "images: {}, videos: {}, current records: {}, superseded records: {}",
            stats.images, stats.videos, current, stats.superseded_records
        );
        println!("ok");
        Ok(())
    }
}
