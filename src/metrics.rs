use std::sync::LazyLock;

use prometheus::*;

use crate::query::Scope;

static METRIC_INGEST_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("mediakb_ingest_count", "count of ingested media items", &["status"])
        .unwrap()
});

static METRIC_UNIT_FAILURE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "mediakb_unit_failure_count",
        "count of failed description units",
        &["stage"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "mediakb_search_duration",
        "duration of the per-query search in seconds",
        &["scope"]
    )
    .unwrap()
});

static METRIC_SEARCH_RESULTS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "mediakb_search_results",
        "number of results returned per query",
        &["scope"],
        vec![0., 1., 2., 5., 10., 20., 50., 100.]
    )
    .unwrap()
});

/// 按状态统计入库的媒体项
pub fn inc_ingest(status: &str) {
    METRIC_INGEST_COUNT.with_label_values(&[status]).inc();
}

/// 按阶段统计失败的单元
pub fn inc_unit_failure(stage: &str) {
    METRIC_UNIT_FAILURE_COUNT.with_label_values(&[stage]).inc();
}

pub fn observe_search(scope: Scope, duration: f64, results: usize) {
    let scope = match scope {
        Scope::Images => "images",
        Scope::Videos => "videos",
        Scope::All => "all",
    };
    METRIC_SEARCH_DURATION.with_label_values(&[scope]).observe(duration);
    METRIC_SEARCH_RESULTS.with_label_values(&[scope]).observe(results as f64);
}
