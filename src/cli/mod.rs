mod check;
mod ingest;
mod remove;
mod search;
pub mod server;
mod show;

use std::sync::Arc;

pub use check::*;
pub use ingest::*;
pub use remove::*;
pub use search::*;
pub use server::*;
pub use show::*;

use crate::config::{IngestOptions, ModelOptions, Opts};
use crate::error::Error;
use crate::index::Metric;
use crate::library::{MediaLibrary, MediaLibraryBuilder, Retention};
use crate::media::KindMatcher;
use crate::models::*;
use crate::pipeline::{IngestionPipeline, PipelineConfig};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 命令行使用的入库流程
pub type Pipeline = IngestionPipeline<CommandDescriptor, FfmpegExtractor, Embedders>;

pub(crate) async fn open_library(
    opts: &Opts,
    metric: Metric,
    retention: Retention,
) -> anyhow::Result<Arc<MediaLibrary>> {
    let library = MediaLibraryBuilder::new(opts.conf_dir.clone())
        .metric(metric)
        .retention(retention)
        .open()
        .await?;
    Ok(Arc::new(library))
}

pub(crate) fn build_embedder(model: &ModelOptions) -> anyhow::Result<Arc<Embedders>> {
    if model.embedding_dim == 0 {
        return Err(Error::InvalidArgument("embedding dimension must be positive".into()).into());
    }
    let embedder = Embedders::from_spec(&model.embedder, model.embedding_dim)
        .map_err(|e| Error::InvalidArgument(format!("--embedder: {e}")))?;
    Ok(Arc::new(embedder))
}

pub(crate) fn build_pipeline(
    opts: &Opts,
    library: Arc<MediaLibrary>,
    embedder: Arc<Embedders>,
    model: &ModelOptions,
    ingest: &IngestOptions,
) -> anyhow::Result<Pipeline> {
    let Some(descriptor) = &model.descriptor else {
        return Err(Error::InvalidArgument("--descriptor is required for ingestion".into()).into());
    };
    let descriptor = CommandLine::parse(descriptor)
        .map_err(|e| Error::InvalidArgument(format!("--descriptor: {e}")))?;
    let descriptor = CommandDescriptor::new(descriptor);
    let extractor = FfmpegExtractor::new(opts.conf_dir.frames()).with_program(&ingest.ffmpeg);
    let kinds = KindMatcher::new(&ingest.image_suffix, &ingest.video_suffix)
        .map_err(|e| Error::InvalidArgument(format!("invalid suffix list: {e}")))?;
    let config = PipelineConfig {
        model_version: model.model_version.clone(),
        extract: ExtractConfig {
            threshold: ingest.keyframe_threshold,
            max_keyframes: ingest.max_keyframes,
        },
        unit_concurrency: ingest.unit_concurrency,
        retry_limit: ingest.retry_limit,
        timeout: model.timeout(),
    };
    Ok(IngestionPipeline::new(library, descriptor, extractor, embedder, config, kinds))
}
