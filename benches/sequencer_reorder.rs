use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::{Duration, Instant};
use voxline::pipeline::{PlaybackSequencer, Release, RenderedFragment};

/// Completion orders a reply's fragments might arrive in.
fn arrival_orders(count: u64) -> Vec<(&'static str, Vec<u64>)> {
    let in_order: Vec<u64> = (0..count).collect();
    let reversed: Vec<u64> = (0..count).rev().collect();
    // Pairs swapped: 1, 0, 3, 2, ...
    let pairwise: Vec<u64> = (0..count).map(|i| i ^ 1).filter(|&i| i < count).collect();
    vec![
        ("in_order", in_order),
        ("reversed", reversed),
        ("pairwise", pairwise),
    ]
}

fn run(order: &[u64], now: Instant) -> usize {
    let mut sequencer = PlaybackSequencer::new(Duration::from_secs(4));
    for &index in order {
        sequencer.expect(index, now);
    }
    let mut played = 0;
    for &index in order {
        let releases = sequencer.accept(
            RenderedFragment {
                index,
                turn: 1,
                audio: vec![0xff; 160],
            },
            now,
        );
        played += releases
            .iter()
            .filter(|r| matches!(r, Release::Play { .. }))
            .count();
    }
    played
}

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequencer_reorder");
    let now = Instant::now();

    for count in [8u64, 64, 512] {
        for (name, order) in arrival_orders(count) {
            group.bench_with_input(BenchmarkId::new(name, count), &order, |b, order| {
                b.iter(|| black_box(run(black_box(order), now)));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_reorder);
criterion_main!(benches);
