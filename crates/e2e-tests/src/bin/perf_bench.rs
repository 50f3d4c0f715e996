use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use e2e_tests::{admin_auth, ask_request, passage, TestHarness, DIMENSION};
use rag_embeddings::{EmbeddingModel, HashingEmbedder};
use rag_retrieval::Deduplicator;
use rag_types::Passage;
use rag_vector::{RetrievalCandidate, VectorIndex};

const SMALL_PASSAGE_COUNT: usize = 200;
const MEDIUM_PASSAGE_COUNT: usize = 2_000;
const DEFAULT_ITERATIONS: usize = 3;
const QUERIES_PER_ITERATION: usize = 50;

const WORDS: &[&str] = &[
    "refund", "policy", "shipping", "order", "invoice", "warranty", "return", "days",
    "customer", "support", "account", "payment", "delivery", "product", "exchange",
    "receipt", "store", "online", "credit", "purchase", "damaged", "replacement",
];

#[derive(Parser, Debug)]
#[command(name = "perf_bench", about = "RAG query service benchmark harness")]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    #[arg(long, value_enum, default_value = "cold")]
    mode: RunMode,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    /// Requests in flight for the concurrent step
    #[arg(long, default_value_t = 16)]
    concurrency: usize,
    #[arg(long, default_value = "crates/e2e-tests/benchmarks")]
    out_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
}

impl DatasetTier {
    fn passages(&self) -> usize {
        match self {
            DatasetTier::Small => SMALL_PASSAGE_COUNT,
            DatasetTier::Medium => MEDIUM_PASSAGE_COUNT,
        }
    }
}

/// Cold disables the result cache; warm repeats queries against it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum RunMode {
    Cold,
    Warm,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StepMetrics {
    p50_ms: f64,
    p90_ms: f64,
    p99_ms: f64,
    samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    throughput_qps: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BenchmarkOutput {
    tier: DatasetTier,
    mode: RunMode,
    iterations: usize,
    concurrency: usize,
    generated_at: String,
    steps: BTreeMap<String, StepMetrics>,
}

#[derive(Default)]
struct SampleCollector {
    durations: BTreeMap<String, Vec<f64>>,
    throughput: BTreeMap<String, Vec<f64>>,
}

impl SampleCollector {
    fn duration(&mut self, step: &str, elapsed: Duration) {
        self.durations
            .entry(step.to_string())
            .or_default()
            .push(elapsed.as_secs_f64() * 1000.0);
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();
    fs::create_dir_all(&args.out_dir).map_err(|e| format!("Failed to create out dir: {e}"))?;

    let mut rng = StdRng::seed_from_u64(42);
    let corpus = synthetic_passages(&mut rng, args.tier.passages());
    let queries: Vec<String> = (0..QUERIES_PER_ITERATION)
        .map(|_| sentence(&mut rng, 6))
        .collect();

    let mut collector = SampleCollector::default();

    for _ in 0..args.iterations {
        let started = Instant::now();
        let harness = build_harness(&corpus, args.mode);
        collector.duration("index_build", started.elapsed());

        run_sequential(&harness, &queries, &mut collector).await?;
        run_concurrent(&harness, &queries, args.concurrency, &mut collector).await?;
        run_dedup(&harness, &queries, &mut collector);
    }

    let output = BenchmarkOutput {
        tier: args.tier,
        mode: args.mode,
        iterations: args.iterations,
        concurrency: args.concurrency,
        generated_at: Utc::now().to_rfc3339(),
        steps: build_metrics(&collector),
    };

    let json = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    let table = render_table(&output);
    write_outputs(&args.out_dir, &json, &table)?;

    println!("{}", table);
    println!("\n{}", json);
    Ok(())
}

fn build_harness(corpus: &[Passage], mode: RunMode) -> TestHarness {
    let cache_ttl = match mode {
        RunMode::Cold => Duration::ZERO,
        RunMode::Warm => Duration::from_secs(300),
    };
    TestHarness::builder()
        .passages(corpus.to_vec())
        .requests_per_minute(1_000_000)
        .result_cache_ttl(cache_ttl)
        .build()
}

async fn run_sequential(
    harness: &TestHarness,
    queries: &[String],
    collector: &mut SampleCollector,
) -> Result<(), String> {
    let auth = admin_auth();
    for query in queries {
        let started = Instant::now();
        harness
            .service
            .ask(Some(&auth), ask_request(query, 5))
            .await
            .map_err(|e| format!("ask failed: {e}"))?;
        collector.duration("ask_single", started.elapsed());
    }
    Ok(())
}

async fn run_concurrent(
    harness: &TestHarness,
    queries: &[String],
    concurrency: usize,
    collector: &mut SampleCollector,
) -> Result<(), String> {
    let started = Instant::now();
    let mut completed = 0usize;

    for batch in queries.chunks(concurrency.max(1)) {
        let tasks: Vec<_> = batch
            .iter()
            .map(|query| {
                let service = Arc::clone(&harness.service);
                let request = ask_request(query, 5);
                tokio::spawn(async move {
                    let started = Instant::now();
                    service
                        .ask(Some(&admin_auth()), request)
                        .await
                        .map(|_| started.elapsed())
                })
            })
            .collect();

        for task in tasks {
            let elapsed = task
                .await
                .map_err(|e| format!("task failed: {e}"))?
                .map_err(|e| format!("ask failed: {e}"))?;
            collector.duration("ask_concurrent", elapsed);
            completed += 1;
        }
    }

    let qps = completed as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
    collector
        .throughput
        .entry("ask_concurrent".to_string())
        .or_default()
        .push(qps);
    Ok(())
}

fn run_dedup(harness: &TestHarness, queries: &[String], collector: &mut SampleCollector) {
    let dedup = Deduplicator::default();
    let model = HashingEmbedder::new(DIMENSION);
    for query in queries {
        let Ok(embedding) = model.embed(query) else {
            continue;
        };
        let candidates: Vec<RetrievalCandidate> =
            harness.index.search(&embedding, 20).unwrap_or_default();

        let started = Instant::now();
        let kept = dedup.dedup(candidates);
        collector.duration("dedup_20", started.elapsed());
        std::hint::black_box(kept);
    }
}

fn synthetic_passages(rng: &mut StdRng, count: usize) -> Vec<Passage> {
    let mut passages: Vec<Passage> = Vec::with_capacity(count);
    for i in 0..count {
        let text = if i % 10 == 9 {
            // Near-duplicate of the previous passage
            format!("{} again", passages[i - 1].text)
        } else {
            sentence(rng, 18)
        };
        passages.push(passage(&format!("doc-{i:05}"), &text));
    }
    passages
}

fn sentence(rng: &mut StdRng, words: usize) -> String {
    (0..words)
        .map(|_| WORDS[rng.random_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_metrics(collector: &SampleCollector) -> BTreeMap<String, StepMetrics> {
    let mut steps = BTreeMap::new();
    for (step, durations) in &collector.durations {
        let mut sorted = durations.clone();
        sorted.sort_by(f64::total_cmp);

        let throughput = collector.throughput.get(step).map(|values| {
            let mut values = values.clone();
            values.sort_by(f64::total_cmp);
            percentile(&values, 50.0)
        });

        steps.insert(
            step.clone(),
            StepMetrics {
                p50_ms: percentile(&sorted, 50.0),
                p90_ms: percentile(&sorted, 90.0),
                p99_ms: percentile(&sorted, 99.0),
                samples: durations.len(),
                throughput_qps: throughput,
            },
        );
    }
    steps
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let rank = (percentile / 100.0) * (values.len() as f64 - 1.0);
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        values[low]
    } else {
        let weight = rank - low as f64;
        values[low] + (values[high] - values[low]) * weight
    }
}

fn render_table(output: &BenchmarkOutput) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Benchmark Results (tier={:?}, mode={:?}, iterations={}, concurrency={})",
        output.tier, output.mode, output.iterations, output.concurrency
    ));
    lines.push("step\tp50_ms\tp90_ms\tp99_ms\tqps".to_string());

    for (step, metrics) in &output.steps {
        let qps = metrics
            .throughput_qps
            .map(|t| format!("{t:.1}"))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{}\t{:.3}\t{:.3}\t{:.3}\t{}",
            step, metrics.p50_ms, metrics.p90_ms, metrics.p99_ms, qps
        ));
    }
    lines.join("\n")
}

fn write_outputs(out_dir: &Path, json: &str, table: &str) -> Result<(), String> {
    fs::write(out_dir.join("latest.json"), json).map_err(|e| e.to_string())?;
    fs::write(out_dir.join("latest.txt"), table).map_err(|e| e.to_string())?;
    Ok(())
}
