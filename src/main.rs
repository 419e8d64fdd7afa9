use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use gesture_matcher::{
    GestureMatcher, InMemoryTemplateStore, MatcherConfig, Sequence,
    synthetic::{GestureShape, SyntheticGesture, template_library},
};

const USAGE: &str = "usage:
  gesture-matcher demo
  gesture-matcher library <out.json> [per_shape]
  gesture-matcher match <templates.json> <query.json> [config.json]
  gesture-matcher bench [per_shape] [seconds]";

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("demo") | None => run_demo(),
        Some("library") => {
            let out = args.next().map(PathBuf::from).context(USAGE)?;
            let per_shape = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);
            write_library(out, per_shape)
        }
        Some("match") => {
            let templates = args.next().map(PathBuf::from).context(USAGE)?;
            let query = args.next().map(PathBuf::from).context(USAGE)?;
            let config = args.next().map(PathBuf::from);
            run_match(templates, query, config)
        }
        Some("bench") => {
            let per_shape = args.next().and_then(|s| s.parse().ok()).unwrap_or(50);
            let secs = args.next().and_then(|s| s.parse::<u64>().ok()).unwrap_or(1);
            run_bench(per_shape, secs)
        }
        Some(other) => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

fn run_demo() -> Result<()> {
    let matcher = GestureMatcher::in_memory(template_library(5, 7), MatcherConfig::default())?;

    for shape in GestureShape::ALL {
        let query = SyntheticGesture::new(shape, 15).jitter(0.002).seed(99).sequence();
        let result = matcher.match_sequence(&query)?;
        println!("{:<20} -> {}", shape.label(), result.display_text());
    }

    let short = SyntheticGesture::new(GestureShape::SwipeRight, 3).sequence();
    println!("{:<20} -> {}", "3 frames", matcher.match_sequence(&short)?.display_text());
    println!("{}", serde_json::to_string_pretty(&matcher.context().stats())?);
    Ok(())
}

fn write_library(out: PathBuf, per_shape: usize) -> Result<()> {
    let library = template_library(per_shape, 7);
    let json = serde_json::to_string_pretty(&library)?;
    fs::write(&out, json).with_context(|| format!("failed to write {}", out.display()))?;
    println!("Wrote {} templates to {}", library.len(), out.display());
    Ok(())
}

fn run_match(templates: PathBuf, query: PathBuf, config: Option<PathBuf>) -> Result<()> {
    let config = match config {
        Some(path) => MatcherConfig::from_path(&path)?,
        None => MatcherConfig::default(),
    };
    let store = InMemoryTemplateStore::from_json_file(&templates)?;
    let raw = fs::read_to_string(&query)
        .with_context(|| format!("failed to read query {}", query.display()))?;
    let sequence: Sequence = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse query {}", query.display()))?;

    let matcher = GestureMatcher::new(Arc::new(store), config)?;
    let result = matcher.match_sequence(&sequence)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_bench(per_shape: usize, secs: u64) -> Result<()> {
    let matcher = GestureMatcher::in_memory(template_library(per_shape, 7), MatcherConfig::default())?;
    let queries: Vec<Sequence> = GestureShape::ALL
        .iter()
        .enumerate()
        .map(|(i, shape)| {
            SyntheticGesture::new(*shape, 15)
                .jitter(0.002)
                .seed(i as u64)
                .sequence()
        })
        .collect();

    // First pass builds the index and fills the feature cache.
    for query in &queries {
        matcher.match_sequence(query)?;
    }
    matcher.context().caches.results.clear();
    matcher.context().caches.distances.clear();

    let duration = Duration::from_secs(secs.max(1));
    let start = Instant::now();
    let mut iterations: u64 = 0;
    while start.elapsed() < duration {
        let query = &queries[iterations as usize % queries.len()];
        matcher.match_sequence(query)?;
        matcher.context().caches.results.clear();
        matcher.context().caches.distances.clear();
        iterations += 1;
    }
    let elapsed = start.elapsed();

    println!(
        "Matched {} queries against {} templates in {:.3}s -> {:.2}ms per query",
        iterations,
        per_shape * GestureShape::ALL.len(),
        elapsed.as_secs_f64(),
        elapsed.as_secs_f64() * 1000.0 / iterations.max(1) as f64
    );
    Ok(())
}
