mod common;

use std::sync::Arc;

use common::*;
use mediakb::error::Error;
use mediakb::library::open_at;
use mediakb::media::{MediaKind, Target};
use mediakb::{MediaLibrary, Retention};
use rstest::*;
use tempfile::TempDir;

async fn search_ids(library: &MediaLibrary, vector: &[f32], k: usize) -> Vec<i64> {
    library.search_index(vector, k, |_| true).await.unwrap().into_iter().map(|h| h.record_id).collect()
}

#[tokio::test]
async fn put_then_get_current() {
    let dir = TempDir::new().unwrap();
    let library = open_library(&dir, Retention::Keep).await;
    let item = add_media(&library, "cat.jpg", MediaKind::Image).await;

    let target = Target::Media(item.id);
    assert!(library.get_current(target).await.unwrap().is_none());

    let stored = library.put(record(item.id, target, "a cat", at(0.9))).await.unwrap();
    let current = library.get_current(target).await.unwrap().unwrap();
    assert_eq!(current.id, stored.id);
    assert_eq!(current.caption, "a cat");
    assert_eq!(current.embedding.len(), 2);
    assert!(current.current);

    assert_eq!(search_ids(&library, &[1., 0.], 10).await, [stored.id]);
    assert_eq!(library.check_consistency().await.unwrap(), 1);
}

#[tokio::test]
async fn add_media_is_idempotent_by_hash() {
    let dir = TempDir::new().unwrap();
    let library = open_library(&dir, Retention::Keep).await;
    let first = add_media(&library, "cat.jpg", MediaKind::Image).await;
    let second = add_media(&library, "cat.jpg", MediaKind::Image).await;
    assert_eq!(first.id, second.id);
    assert_eq!(library.stats().await.unwrap().images, 1);
}

#[rstest]
#[case::keep(Retention::Keep, 1)]
#[case::purge(Retention::Purge, 0)]
#[tokio::test]
async fn supersede_swaps_current(#[case] retention: Retention, #[case] superseded: i64) {
    let dir = TempDir::new().unwrap();
    let library = open_library(&dir, retention).await;
    let item = add_media(&library, "cat.jpg", MediaKind::Image).await;
    let target = Target::Media(item.id);

    let old = library.put(record(item.id, target, "a cat", at(0.2))).await.unwrap();
    let new = library.supersede(old.id, record(item.id, target, "a tabby cat", at(0.8))).await.unwrap();

    assert_eq!(library.get_current(target).await.unwrap().unwrap().id, new.id);
    assert_eq!(search_ids(&library, &[1., 0.], 10).await, [new.id]);

    let stats = library.stats().await.unwrap();
    assert_eq!(stats.current_records, 1);
    assert_eq!(stats.superseded_records, superseded);
    assert_eq!(stats.index_entries, 1);

    let history = library.media_records(item.id, false).await.unwrap();
    assert_eq!(history.len() as i64, 1 + superseded);
    if retention == Retention::Keep {
        let old = library.record(old.id).await.unwrap().unwrap();
        assert!(!old.current);
        assert!(old.superseded_at.is_some());
    } else {
        assert!(library.record(old.id).await.unwrap().is_none());
    }
    library.check_consistency().await.unwrap();
}

#[tokio::test]
async fn stale_supersede_is_rejected() {
    let dir = TempDir::new().unwrap();
    let library = open_library(&dir, Retention::Keep).await;
    let item = add_media(&library, "cat.jpg", MediaKind::Image).await;
    let target = Target::Media(item.id);

    let old = library.put(record(item.id, target, "v1", at(0.1))).await.unwrap();
    let winner = library.supersede(old.id, record(item.id, target, "v2", at(0.2))).await.unwrap();

    let err = library.supersede(old.id, record(item.id, target, "v3", at(0.3))).await.unwrap_err();
    assert!(matches!(
        err,
        Error::SupersedeConflict { expected: Some(e), found: Some(f), .. } if e == old.id && f == winner.id
    ));

    let err = library.put(record(item.id, target, "v4", at(0.4))).await.unwrap_err();
    assert!(matches!(err, Error::SupersedeConflict { expected: None, .. }));

    assert_eq!(library.get_current(target).await.unwrap().unwrap().caption, "v2");
    assert_eq!(library.stats().await.unwrap().index_entries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_supersedes_have_one_winner() {
    let dir = TempDir::new().unwrap();
    let library = open_library(&dir, Retention::Keep).await;
    let item = add_media(&library, "cat.jpg", MediaKind::Image).await;
    let target = Target::Media(item.id);
    let old = library.put(record(item.id, target, "v1", at(0.1))).await.unwrap();

    let tasks = (0..8)
        .map(|i| {
            let library = library.clone();
            tokio::spawn(async move {
                library.supersede(old.id, record(item.id, target, &format!("v2-{i}"), at(0.5))).await
            })
        })
        .collect::<Vec<_>>();

    let mut won = vec![];
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(record) => won.push(record.id),
            Err(Error::SupersedeConflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won.len(), 1);
    assert_eq!(conflicts, 7);
    assert_eq!(library.get_current(target).await.unwrap().unwrap().id, won[0]);
    assert_eq!(library.check_consistency().await.unwrap(), 1);
}

#[tokio::test]
async fn mismatched_dimension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let library = open_library(&dir, Retention::Keep).await;
    let a = add_media(&library, "a.jpg", MediaKind::Image).await;
    let b = add_media(&library, "b.jpg", MediaKind::Image).await;
    library.put(record(a.id, Target::Media(a.id), "a", at(0.5))).await.unwrap();

    let err = library.put(record(b.id, Target::Media(b.id), "b", vec![1., 0., 0.])).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(library.get_current(Target::Media(b.id)).await.unwrap().is_none());
    library.check_consistency().await.unwrap();
}

#[tokio::test]
async fn delete_cascade_removes_everything() {
    let dir = TempDir::new().unwrap();
    let library = open_library(&dir, Retention::Keep).await;
    let video = add_media(&library, "clip.mp4", MediaKind::Video).await;
    let image = add_media(&library, "cat.jpg", MediaKind::Image).await;

    let keyframes = library
        .sync_keyframes(video.id, &[(0, "f0".into()), (1000, "f1".into())])
        .await
        .unwrap();
    assert_eq!(keyframes.len(), 2);
    library.put(record(video.id, Target::Media(video.id), "a clip", at(0.5))).await.unwrap();
    for kf in &keyframes {
        library.put(record(video.id, Target::Keyframe(kf.id), "a frame", at(0.6))).await.unwrap();
    }
    let kept = library.put(record(image.id, Target::Media(image.id), "a cat", at(0.1))).await.unwrap();

    assert!(library.delete_cascade(video.id).await.unwrap());
    assert!(!library.delete_cascade(video.id).await.unwrap());

    assert!(library.media(video.id).await.unwrap().is_none());
    assert!(library.keyframes(video.id).await.unwrap().is_empty());
    assert!(library.media_records(video.id, false).await.unwrap().is_empty());
    assert_eq!(search_ids(&library, &[1., 0.], 10).await, [kept.id]);
    assert_eq!(library.check_consistency().await.unwrap(), 1);
}

#[tokio::test]
async fn changed_keyframes_drop_their_records() {
    let dir = TempDir::new().unwrap();
    let library = open_library(&dir, Retention::Keep).await;
    let video = add_media(&library, "clip.mp4", MediaKind::Video).await;

    let first = library
        .sync_keyframes(video.id, &[(0, "f0".into()), (1000, "f1".into())])
        .await
        .unwrap();
    let r0 = library.put(record(video.id, Target::Keyframe(first[0].id), "f0", at(0.5))).await.unwrap();
    let r1 = library.put(record(video.id, Target::Keyframe(first[1].id), "f1", at(0.6))).await.unwrap();

    let second = library
        .sync_keyframes(video.id, &[(0, "f0".into()), (2000, "g1".into()), (3000, "g2".into())])
        .await
        .unwrap();
    assert_eq!(second.len(), 3);
    assert_eq!(second[0].id, first[0].id);
    assert_ne!(second[1].id, first[1].id);
    assert_eq!(second[1].timestamp_ms, 2000);

    assert!(library.record(r1.id).await.unwrap().is_none());
    assert_eq!(search_ids(&library, &[1., 0.], 10).await, [r0.id]);
    library.check_consistency().await.unwrap();
}

#[tokio::test]
async fn reopen_rebuilds_index() {
    let dir = TempDir::new().unwrap();
    let (stored, superseded) = {
        let library = open_library(&dir, Retention::Keep).await;
        let item = add_media(&library, "cat.jpg", MediaKind::Image).await;
        let target = Target::Media(item.id);
        let old = library.put(record(item.id, target, "v1", at(0.1))).await.unwrap();
        let new = library.supersede(old.id, record(item.id, target, "v2", at(0.7))).await.unwrap();
        library.close().await;
        (new, old)
    };

    let library = Arc::new(open_at(dir.path()).await.unwrap());
    assert_eq!(library.index_dim().await, Some(2));
    let hits = library.search_index(&[1., 0.], 10, |_| true).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record_id, stored.id);
    assert_ne!(hits[0].record_id, superseded.id);
    assert_eq!(hits[0].meta.caption, "v2");
    assert!((hits[0].score - 0.7).abs() < 1e-5);
    assert_eq!(library.check_consistency().await.unwrap(), 1);
}
