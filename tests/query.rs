mod common;

use std::sync::Arc;

use common::*;
use mediakb::error::Error;
use mediakb::media::{MediaKind, TargetKind, Target};
use mediakb::query::TieBreak;
use mediakb::{MediaLibrary, QueryEngine, QueryOptions, Retention, Scope};
use rstest::*;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    library: Arc<MediaLibrary>,
    embedder: Arc<FixedEmbedder>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let library = open_library(&dir, Retention::Keep).await;
        Self { _dir: dir, library, embedder: Arc::new(FixedEmbedder::new(vec![1., 0.])) }
    }

    fn engine(&self, tie_break: TieBreak) -> QueryEngine<FixedEmbedder> {
        let options = QueryOptions { tie_break, ..Default::default() };
        QueryEngine::new(self.library.clone(), self.embedder.clone(), options)
    }

    async fn image(&self, name: &str, cos: f32) -> i64 {
        let item = add_media(&self.library, name, MediaKind::Image).await;
        self.library.put(record(item.id, Target::Media(item.id), name, at(cos))).await.unwrap();
        item.id
    }

    /// 写入一个视频：整体描述以及每个关键帧 (时间戳, 描述, 相似度)
    async fn video(&self, name: &str, whole: f32, scenes: &[(i64, &str, f32)]) -> i64 {
        let item = add_media(&self.library, name, MediaKind::Video).await;
        let frames = scenes.iter().map(|(ts, caption, _)| (*ts, caption.to_string())).collect::<Vec<_>>();
        let keyframes = self.library.sync_keyframes(item.id, &frames).await.unwrap();
        self.library
            .put(record(item.id, Target::Media(item.id), &format!("{name} overall"), at(whole)))
            .await
            .unwrap();
        for (kf, (_, caption, cos)) in keyframes.iter().zip(scenes) {
            self.library.put(record(item.id, Target::Keyframe(kf.id), caption, at(*cos))).await.unwrap();
        }
        item.id
    }
}

#[tokio::test]
async fn empty_library_returns_nothing() {
    let fx = Fixture::new().await;
    let results = fx.engine(TieBreak::Video).search("anything", 5, Scope::All).await.unwrap();
    assert!(results.is_empty());
}

#[rstest]
#[case::zero(0, "a cat")]
#[case::negative(-1, "a cat")]
#[case::blank(3, "   ")]
#[tokio::test]
async fn invalid_queries_do_not_call_the_model(#[case] k: i64, #[case] query: &str) {
    let fx = Fixture::new().await;
    fx.image("cat.jpg", 0.9).await;

    let err = fx.engine(TieBreak::Video).search(query, k, Scope::All).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(fx.embedder.calls(), 0);
}

#[tokio::test]
async fn results_are_ranked_and_truncated() {
    let fx = Fixture::new().await;
    let low = fx.image("low.jpg", 0.4).await;
    let high = fx.image("high.jpg", 0.9).await;
    let mid = fx.image("mid.jpg", 0.6).await;

    let engine = fx.engine(TieBreak::Video);
    let results = engine.search("query", 10, Scope::All).await.unwrap();
    assert_eq!(results.iter().map(|r| r.media_id).collect::<Vec<_>>(), [high, mid, low]);
    assert!((results[0].score - 0.9).abs() < 1e-5);
    assert_eq!(results[0].path, "high.jpg");
    assert_eq!(results[0].provenance.target, TargetKind::Media);

    let results = engine.search("query", 2, Scope::All).await.unwrap();
    assert_eq!(results.iter().map(|r| r.media_id).collect::<Vec<_>>(), [high, mid]);
}

#[tokio::test]
async fn video_scores_by_best_keyframe() {
    let fx = Fixture::new().await;
    let image = fx.image("cat.jpg", 0.7).await;
    let video = fx.video("walk.mp4", 0.5, &[(0, "a street", 0.3), (4500, "a bicycle", 0.8)]).await;

    let results = fx.engine(TieBreak::Video).search("bicycle", 5, Scope::All).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].media_id, video);
    assert_eq!(results[0].kind, MediaKind::Video);
    assert!((results[0].score - 0.8).abs() < 1e-5);
    let provenance = &results[0].provenance;
    assert_eq!(provenance.target, TargetKind::Keyframe);
    assert_eq!(provenance.ordinal, Some(1));
    assert_eq!(provenance.timestamp_ms, Some(4500));
    assert_eq!(provenance.caption, "a bicycle");
    assert_eq!(results[1].media_id, image);
}

#[rstest]
#[case::video(TieBreak::Video, TargetKind::Media)]
#[case::keyframe(TieBreak::Keyframe, TargetKind::Keyframe)]
#[tokio::test]
async fn equal_scores_follow_tie_break(#[case] tie_break: TieBreak, #[case] expected: TargetKind) {
    let fx = Fixture::new().await;
    fx.video("walk.mp4", 0.6, &[(0, "a street", 0.6)]).await;

    let results = fx.engine(tie_break).search("street", 1, Scope::All).await.unwrap();
    assert_eq!(results[0].provenance.target, expected);
}

#[rstest]
#[case::images(Scope::Images, MediaKind::Image)]
#[case::videos(Scope::Videos, MediaKind::Video)]
#[tokio::test]
async fn scope_filters_media_kind(#[case] scope: Scope, #[case] kind: MediaKind) {
    let fx = Fixture::new().await;
    for i in 0..3 {
        fx.image(&format!("{i}.jpg"), 0.9).await;
    }
    fx.video("clip.mp4", 0.2, &[(0, "a frame", 0.1)]).await;

    let results = fx.engine(TieBreak::Video).search("query", 2, scope).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.kind == kind));

    let all = fx.engine(TieBreak::Video).search("query", 10, Scope::All).await.unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn only_current_records_are_visible() {
    let fx = Fixture::new().await;
    let item = add_media(&fx.library, "cat.jpg", MediaKind::Image).await;
    let target = Target::Media(item.id);
    let old = fx.library.put(record(item.id, target, "a dog", at(0.95))).await.unwrap();
    let new = fx.library.supersede(old.id, record(item.id, target, "a cat", at(0.3))).await.unwrap();

    let results = fx.engine(TieBreak::Video).search("dog", 5, Scope::All).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].provenance.record_id, new.id);
    assert_eq!(results[0].provenance.caption, "a cat");
    assert!((results[0].score - 0.3).abs() < 1e-5);
}

#[tokio::test]
async fn deleted_media_disappears_from_results() {
    let fx = Fixture::new().await;
    let gone = fx.video("clip.mp4", 0.9, &[(0, "a frame", 0.95)]).await;
    let kept = fx.image("cat.jpg", 0.2).await;

    assert!(fx.library.delete_cascade(gone).await.unwrap());
    let results = fx.engine(TieBreak::Video).search("frame", 5, Scope::All).await.unwrap();
    assert_eq!(results.iter().map(|r| r.media_id).collect::<Vec<_>>(), [kept]);
}

#[tokio::test]
async fn video_aggregate_follows_current_records() {
    let fx = Fixture::new().await;
    let image = fx.image("cat.jpg", 0.5).await;
    let video = fx
        .video(
            "walk.mp4",
            0.5,
            &[(0, "a street", 0.1), (1000, "a street", 0.2), (65_250, "a bicycle", 0.3)],
        )
        .await;
    let engine = fx.engine(TieBreak::Video);

    assert!(engine.video_aggregate(image).await.unwrap().is_none());
    assert!(engine.video_aggregate(9999).await.unwrap().is_none());

    let first = engine.video_aggregate(video).await.unwrap().unwrap();
    assert_eq!(first.caption.as_deref(), Some("walk.mp4 overall"));
    assert_eq!(first.scenes.len(), 3);
    assert_eq!(first.summary, "walk.mp4 overall\n[00:00.000] a street\n[01:05.250] a bicycle");

    let cached = engine.video_aggregate(video).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &cached));

    // 替换任意一条记录后缓存失效
    let keyframes = fx.library.keyframes(video).await.unwrap();
    let target = Target::Keyframe(keyframes[2].id);
    let old = fx.library.get_current(target).await.unwrap().unwrap();
    fx.library.supersede(old.id, record(video, target, "a red bicycle", at(0.3))).await.unwrap();

    let updated = engine.video_aggregate(video).await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&first, &updated));
    assert!(updated.summary.ends_with("[01:05.250] a red bicycle"));
}
