use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::*;
use crate::config::Opts;
use crate::error::Error;
use crate::index::Metric;
use crate::library::Retention;
use crate::media::ContentHash;

#[derive(Parser, Debug, Clone)]
pub struct RemoveCommand {
    /// 媒体项的内容哈希，可以指定多个
    #[arg(required = true)]
    pub hash: Vec<String>,
}

impl SubCommandExtend for RemoveCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let hashes = self
            .hash
            .iter()
            .map(|s| s.parse::<ContentHash>().map_err(Error::InvalidArgument))
            .collect::<Result<Vec<_>, _>>()?;
        let library = open_library(opts, Metric::default(), Retention::default()).await?;

        for hash in hashes {
            match library.media_by_hash(&hash).await? {
                Some(item) => {
                    library.delete_cascade(item.id).await?;
                    println!("[OK] {hash} {}", item.path);
                }
                None => println!("[SKIP] {hash} not found"),
            }
        }
        info!("删除完成");
        library.close().await;
        Ok(())
    }
}
