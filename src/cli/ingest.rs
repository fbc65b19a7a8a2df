use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::info;

use crate::cli::*;
use crate::config::{IngestOptions, ModelOptions, Opts};
use crate::index::Metric;
use crate::media::KindMatcher;
use crate::pipeline::{IngestReport, IngestStatus};
use crate::utils::{pb_style, scan_media};

#[derive(Parser, Debug, Clone)]
pub struct IngestCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub ingest: IngestOptions,
    /// 媒体所在目录，也可以是单个文件
    pub path: PathBuf,
}

#[derive(Debug, Default)]
struct Summary {
    complete: usize,
    partial: usize,
    skipped: usize,
    failed: usize,
}

impl Summary {
    fn record(&mut self, pb: &ProgressBar, path: &Path, result: crate::Result<IngestReport>) {
        let path = path.display();
        match result {
            Ok(report) => match report.status {
                IngestStatus::Complete => {
                    self.complete += 1;
                    pb.suspend(|| println!("[OK] {path} ({} units)", report.succeeded));
                }
                IngestStatus::Skipped => {
                    self.skipped += 1;
                    pb.suspend(|| println!("[SKIP] {path}"));
                }
                IngestStatus::Partial | IngestStatus::Failed => {
                    let ok = report.succeeded + report.skipped;
                    if report.status == IngestStatus::Partial {
                        self.partial += 1;
                        pb.suspend(|| println!("[PARTIAL] {path} ({ok}/{} units)", report.units()));
                    } else {
                        self.failed += 1;
                        pb.suspend(|| println!("[ERR] {path} (0/{} units)", report.units()));
                    }
                    for failure in &report.failures {
                        pb.suspend(|| println!("    {} ({}): {}", failure.unit, failure.stage.as_str(), failure.error));
                    }
                }
            },
            Err(e) => {
                self.failed += 1;
                pb.suspend(|| println!("[ERR] {path}: {e}"));
            }
        }
    }
}

impl SubCommandExtend for IngestCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let kinds = KindMatcher::new(&self.ingest.image_suffix, &self.ingest.video_suffix)?;
        let entries = scan_media(&self.path, &kinds);
        if entries.is_empty() {
            info!("没有找到需要入库的媒体文件");
            return Ok(());
        }

        let library = open_library(opts, Metric::default(), self.ingest.retention).await?;
        let embedder = build_embedder(&self.model)?;
        let pipeline = build_pipeline(opts, library.clone(), embedder, &self.model, &self.ingest)?;

        let pb = ProgressBar::new(entries.len() as u64).with_style(pb_style());
        let mut summary = Summary::default();

        let pipeline = &pipeline;
        let mut results = futures::stream::iter(entries)
            .map(|(path, kind)| async move {
                let result = pipeline.ingest_as(&path, kind).await;
                (path, result)
            })
            .buffer_unordered(self.ingest.concurrency.max(1));
        while let Some((path, result)) = results.next().await {
            summary.record(&pb, &path, result);
            pb.inc(1);
        }

        pb.finish_with_message("入库完成");
        println!(
            "complete: {}, partial: {}, skipped: {}, failed: {}",
            summary.complete, summary.partial, summary.skipped, summary.failed
        );
        library.close().await;

        if summary.failed > 0 {
            anyhow::bail!("{} media items failed to ingest", summary.failed);
        }
        Ok(())
    }
}
