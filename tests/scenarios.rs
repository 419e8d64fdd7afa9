use std::{
    sync::{Arc, Mutex},
    thread,
};

use crossbeam_channel::{Receiver, Sender};
use gesture_matcher::{
    CancelToken, GestureMatcher, InMemoryTemplateStore, MatchError, MatchOptions, MatcherConfig,
    NoMatchReason, Template, TemplateEvent, TemplateId, TemplateStore,
    synthetic::{GestureShape, SyntheticGesture, template_library},
};

fn swipe(frames: usize) -> SyntheticGesture {
    SyntheticGesture::new(GestureShape::SwipeRight, frames)
}

fn single(template: Template) -> GestureMatcher {
    GestureMatcher::in_memory([template], MatcherConfig::default()).unwrap()
}

#[test]
fn test_self_match_scores_near_one() {
    let sequence = swipe(15).sequence();
    let matcher = single(Template::new(1, "swipe right", sequence.clone()));
    let result = matcher.match_sequence(&sequence).unwrap();
    assert_eq!(result.template_id, Some(TemplateId(1)));
    assert!(result.score >= 0.95, "self score {}", result.score);
}

#[test]
fn test_double_speed_performance_matches() {
    let matcher = single(Template::new(1, "swipe right", swipe(20).sequence()));
    let fast = swipe(10).sequence();
    assert!(fast.duration() < swipe(20).sequence().duration() / 2.0 + 1e-9);

    let result = matcher.match_sequence(&fast).unwrap();
    assert_eq!(result.template_id, Some(TemplateId(1)), "{}", result.display_text());
}

#[test]
fn test_mirrored_swipe_does_not_match() {
    let matcher = single(Template::new(1, "swipe right", swipe(15).sequence()));
    let left = SyntheticGesture::new(GestureShape::SwipeLeft, 15).sequence();

    let indexed = matcher.match_sequence(&left).unwrap();
    assert!(!indexed.is_match());

    let scanned = matcher
        .match_with(
            &left,
            &MatchOptions {
                full_scan: true,
                ..MatchOptions::default()
            },
        )
        .unwrap();
    assert!(!scanned.is_match());
    assert_eq!(scanned.reason, Some(NoMatchReason::BelowThreshold));
    assert!(scanned.score < 0.5, "mirrored score {}", scanned.score);
}

#[test]
fn test_index_prunes_without_losing_best_match() {
    let config = MatcherConfig {
        top_k: 500,
        ..MatcherConfig::default()
    };
    let matcher = GestureMatcher::in_memory(template_library(50, 7), config).unwrap();

    for (seed, shape) in [(99, GestureShape::SwipeRight), (98, GestureShape::CircleClockwise)] {
        let query = SyntheticGesture::new(shape, 15).jitter(0.002).seed(seed).sequence();

        let candidates = matcher.candidates(&query).unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.len() < 500, "index kept all {} templates", candidates.len());

        let full = matcher
            .match_with(
                &query,
                &MatchOptions {
                    full_scan: true,
                    ..MatchOptions::default()
                },
            )
            .unwrap();
        assert_eq!(full.candidates_evaluated, 500);
        assert_eq!(full.template_name.as_deref(), Some(shape.label()));
        for ranked in full.ranked.iter().filter(|c| c.score >= 0.8) {
            assert!(
                candidates.binary_search(&ranked.template_id).is_ok(),
                "template {} scoring {} was pruned",
                ranked.template_id,
                ranked.score
            );
        }

        let indexed = matcher.match_sequence(&query).unwrap();
        assert_eq!(indexed.template_id, full.template_id);
        assert_eq!(indexed.score, full.score);
        assert_eq!(indexed.candidates_evaluated, candidates.len());
    }
}

#[test]
fn test_three_frames_is_insufficient() {
    let matcher = single(Template::new(1, "swipe right", swipe(15).sequence()));
    let result = matcher.match_sequence(&swipe(3).sequence()).unwrap();
    assert!(!result.is_match());
    assert_eq!(result.reason, Some(NoMatchReason::InsufficientData));
}

#[test]
fn test_repeated_query_is_served_from_cache() {
    let matcher = GestureMatcher::in_memory(template_library(3, 11), MatcherConfig::default()).unwrap();
    let query = SyntheticGesture::new(GestureShape::VStroke, 15).jitter(0.002).seed(5).sequence();

    let first = matcher.match_sequence(&query).unwrap();
    assert!(first.is_match());
    assert!(!first.cache.result);

    let second = matcher.match_sequence(&query).unwrap();
    assert!(second.cache.result);
    assert_eq!(second.template_id, first.template_id);
    assert_eq!(second.score, first.score);
    assert_eq!(matcher.context().stats().caches.results.hits, 1);
    assert!(
        second.elapsed_ms < first.elapsed_ms / 2.0,
        "cached {:.3}ms vs computed {:.3}ms",
        second.elapsed_ms,
        first.elapsed_ms
    );
}

#[test]
fn test_cached_and_fresh_results_agree() {
    let library = template_library(3, 11);
    let warm = GestureMatcher::in_memory(library.clone(), MatcherConfig::default()).unwrap();
    let query = SyntheticGesture::new(GestureShape::SwipeDown, 16).jitter(0.002).seed(8).sequence();
    warm.match_sequence(&query).unwrap();
    let other = SyntheticGesture::new(GestureShape::SwipeDown, 13).seed(1).sequence();
    warm.match_sequence(&other).unwrap();

    let cached = warm.match_sequence(&query).unwrap();
    let fresh = GestureMatcher::in_memory(library, MatcherConfig::default())
        .unwrap()
        .match_sequence(&query)
        .unwrap();
    assert_eq!(cached.template_id, fresh.template_id);
    assert_eq!(cached.score, fresh.score);
    assert_eq!(cached.sub_scores, fresh.sub_scores);
}

#[test]
fn test_threshold_is_inclusive() {
    let matcher = single(Template::new(1, "swipe right", swipe(18).sequence()));
    let query = swipe(14).jitter(0.002).seed(3).sequence();
    let score = matcher
        .match_with(
            &query,
            &MatchOptions {
                threshold: Some(0.0),
                ..MatchOptions::default()
            },
        )
        .unwrap()
        .score;

    let at = matcher
        .match_with(
            &query,
            &MatchOptions {
                threshold: Some(score),
                ..MatchOptions::default()
            },
        )
        .unwrap();
    assert!(at.is_match());

    let above = matcher
        .match_with(
            &query,
            &MatchOptions {
                threshold: Some(f32::from_bits(score.to_bits() + 1)),
                ..MatchOptions::default()
            },
        )
        .unwrap();
    assert!(!above.is_match());
    assert_eq!(above.reason, Some(NoMatchReason::BelowThreshold));
    assert_eq!(above.score, score);
}

#[test]
fn test_stale_index_falls_back_to_linear_scan() {
    let matcher = Arc::new(GestureMatcher::in_memory(template_library(5, 3), MatcherConfig::default()).unwrap());
    let query = SyntheticGesture::new(GestureShape::SwipeUp, 15).jitter(0.002).seed(4).sequence();

    let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let rebuilding = {
        let matcher = Arc::clone(&matcher);
        thread::spawn(move || {
            let config = matcher.config().index.clone();
            matcher.context().index.rebuild_with(&config, || {
                entered_tx.send(()).ok();
                release_rx.recv().ok();
                Err(MatchError::Internal("rebuild abandoned".into()))
            })
        })
    };

    entered_rx.recv().unwrap();
    let during = matcher.match_sequence(&query).unwrap();
    assert!(during.is_match());
    assert_eq!(during.candidates_evaluated, 50);
    assert_eq!(during.template_name.as_deref(), Some(GestureShape::SwipeUp.label()));

    release_tx.send(()).unwrap();
    assert!(rebuilding.join().unwrap().is_err());
    assert!(matcher.context().index.needs_rebuild());

    let after = matcher
        .match_with(
            &query,
            &MatchOptions {
                threshold: Some(0.5),
                ..MatchOptions::default()
            },
        )
        .unwrap();
    assert!(!matcher.context().index.needs_rebuild());
    assert!(after.candidates_evaluated < 50);
    assert_eq!(after.template_id, during.template_id);
}

#[test]
fn test_cancelled_query_leaves_no_trace() {
    let matcher = single(Template::new(1, "swipe right", swipe(15).sequence()));
    let query = swipe(15).sequence();
    let token = CancelToken::new();
    token.cancel();

    let cancelled = matcher.match_with(
        &query,
        &MatchOptions {
            cancel: Some(token),
            ..MatchOptions::default()
        },
    );
    assert!(matches!(cancelled, Err(MatchError::Cancelled)));

    let result = matcher.match_sequence(&query).unwrap();
    assert!(result.is_match());
    assert!(!result.cache.result);
}

#[test]
fn test_concurrent_queries_agree() {
    let matcher = GestureMatcher::in_memory(template_library(4, 21), MatcherConfig::default()).unwrap();
    let queries: Vec<_> = GestureShape::ALL
        .iter()
        .map(|shape| SyntheticGesture::new(*shape, 15).jitter(0.002).seed(6).sequence())
        .collect();
    let expected: Vec<_> = queries
        .iter()
        .map(|q| matcher.match_sequence(q).unwrap().template_id)
        .collect();
    matcher.context().clear();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    queries
                        .iter()
                        .map(|q| matcher.match_sequence(q).unwrap().template_id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

/// Holds the first `active_templates` read open until released, after the templates were read.
struct GatedStore {
    inner: InMemoryTemplateStore,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl TemplateStore for GatedStore {
    fn active_templates(&self) -> Vec<Template> {
        let templates = self.inner.active_templates();
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        templates
    }

    fn get(&self, id: TemplateId) -> Option<Template> {
        self.inner.get(id)
    }

    fn upsert(&self, template: Template) -> TemplateEvent {
        self.inner.upsert(template)
    }

    fn remove(&self, id: TemplateId) -> Option<TemplateEvent> {
        self.inner.remove(id)
    }
}

#[test]
fn test_removal_during_query_is_not_cached() {
    let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded(1);
    let store = GatedStore {
        inner: InMemoryTemplateStore::from_templates([Template::new(1, "swipe right", swipe(15).sequence())]),
        gate: Mutex::new(Some((entered_tx, release_rx))),
    };
    let mut config = MatcherConfig::default();
    config.index.enabled = false;
    let matcher = GestureMatcher::new(Arc::new(store), config).unwrap();
    let query = swipe(14).jitter(0.002).seed(12).sequence();

    thread::scope(|scope| {
        let in_flight = scope.spawn(|| matcher.match_sequence(&query).unwrap());
        entered_rx.recv().unwrap();
        assert!(matcher.remove_template(TemplateId(1)).is_some());
        release_tx.send(()).unwrap();

        // It read the template set before the removal, so it may still name template 1.
        let stale = in_flight.join().unwrap();
        assert_eq!(stale.template_id, Some(TemplateId(1)));
    });

    assert!(matcher.store().get(TemplateId(1)).is_none());
    assert!(matcher.context().caches.results.is_empty());
    assert!(matcher.context().caches.distances.is_empty());

    let after = matcher.match_sequence(&query).unwrap();
    assert!(!after.cache.result);
    assert_eq!(after.template_id, None);
    assert_eq!(after.reason, Some(NoMatchReason::NoCandidates));
}

#[test]
fn test_update_during_query_is_not_cached() {
    let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded(1);
    let store = GatedStore {
        inner: InMemoryTemplateStore::from_templates([Template::new(1, "swipe right", swipe(15).sequence())]),
        gate: Mutex::new(Some((entered_tx, release_rx))),
    };
    let mut config = MatcherConfig::default();
    config.index.enabled = false;
    let matcher = GestureMatcher::new(Arc::new(store), config).unwrap();
    let query = swipe(14).jitter(0.002).seed(12).sequence();

    thread::scope(|scope| {
        let in_flight = scope.spawn(|| matcher.match_sequence(&query).unwrap());
        entered_rx.recv().unwrap();
        let replacement = Template::new(1, "swipe left", SyntheticGesture::new(GestureShape::SwipeLeft, 15).sequence());
        matcher.update_template(replacement).unwrap();
        release_tx.send(()).unwrap();
        assert!(in_flight.join().unwrap().is_match());
    });

    let after = matcher.match_sequence(&query).unwrap();
    assert!(!after.cache.result);
    assert!(!after.is_match());
    assert_eq!(after.reason, Some(NoMatchReason::BelowThreshold));
}
