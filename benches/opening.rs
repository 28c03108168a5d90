use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion};
use polyprep::{Config, OpeningMode, field::Mersenne61, player::simulate, session::Session};
use tokio::runtime::Runtime;

pub fn opening_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let count = 10_000;

    let mut g = c.benchmark_group("opening");
    g.throughput(criterion::Throughput::Elements(count as u64));
    for mode in [OpeningMode::Tree, OpeningMode::Direct] {
        let bench_id = BenchmarkId::new(format!("{mode:?} open and check"), 5);
        g.bench_function(bench_id, |b| {
            b.to_async(&rt).iter_custom(|iters| {
                let config = Config {
                    opening: mode,
                    ..Config::default()
                };
                async move {
                    let mut elapsed = Duration::default();
                    for _ in 0..iters {
                        let timings = simulate(5, async |p| {
                            let mut session =
                                Session::<_, Mersenne61>::setup(p, config.clone()).await?;
                            let shares = session.random(count).await?;
                            // only the opening and its check are timed
                            let now = Instant::now();
                            session.open(&shares).await?;
                            session.check().await?;
                            Ok(now.elapsed())
                        })
                        .await
                        .expect("opening failed");
                        elapsed += timings.into_iter().max().unwrap_or_default();
                    }
                    elapsed
                }
            })
        });
    }
}
