use std::cmp::Ordering;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::Memtable;
use table::Table;

const COMMIT_COUNT_MAX: usize = 4096;

#[derive(Clone, Copy, Default)]
struct Slot {
    key: u64,
    live: bool,
    payload: u64,
}

struct SlotTable;

impl Table for SlotTable {
    type Key = u64;
    type Value = Slot;

    const DATA_BLOCK_VALUE_COUNT_MAX: usize = 512;
    const DATA_BLOCK_COUNT_MAX: usize = 32;

    fn key_of(value: &Slot) -> u64 {
        value.key
    }

    fn compare(a: &u64, b: &u64) -> Ordering {
        a.cmp(b)
    }

    fn tombstone(key: u64) -> Slot {
        Slot {
            key,
            live: false,
            payload: 0,
        }
    }

    fn is_tombstone(value: &Slot) -> bool {
        !value.live
    }
}

/// Scrambles sequential indices so inserts arrive in hash, not key, order.
fn mixed_key(i: u64) -> u64 {
    i.wrapping_mul(0x9e3779b97f4a7c15)
}

fn filled_memtable() -> Memtable<SlotTable> {
    let mut mem = Memtable::new(COMMIT_COUNT_MAX).unwrap();
    for i in 0..mem.value_count_max() as u64 {
        mem.put(Slot {
            key: mixed_key(i),
            live: true,
            payload: i,
        });
    }
    mem
}

fn memtable_put_benchmark(c: &mut Criterion) {
    c.bench_function("memtable_put_fill_16k", |b| {
        b.iter_batched(
            || Memtable::<SlotTable>::new(COMMIT_COUNT_MAX).unwrap(),
            |mut mem| {
                for i in 0..mem.value_count_max() as u64 {
                    mem.put(Slot {
                        key: mixed_key(i),
                        live: true,
                        payload: i,
                    });
                }
                mem
            },
            BatchSize::LargeInput,
        );
    });
}

fn memtable_coalesce_benchmark(c: &mut Criterion) {
    c.bench_function("memtable_put_coalesce_16k_over_1k_keys", |b| {
        b.iter_batched(
            || Memtable::<SlotTable>::new(COMMIT_COUNT_MAX).unwrap(),
            |mut mem| {
                for i in 0..16_384u64 {
                    mem.put(Slot {
                        key: mixed_key(i % 1_024),
                        live: true,
                        payload: i,
                    });
                }
                mem
            },
            BatchSize::LargeInput,
        );
    });
}

fn memtable_get_benchmark(c: &mut Criterion) {
    let mem = filled_memtable();
    c.bench_function("memtable_get_hit_16k", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for i in 0..mem.value_count_max() as u64 {
                if let Some(v) = mem.get(black_box(mixed_key(i))) {
                    sum = sum.wrapping_add(v.payload);
                }
            }
            black_box(sum)
        });
    });
}

fn memtable_drain_benchmark(c: &mut Criterion) {
    c.bench_function("memtable_sort_into_values_and_clear_16k", |b| {
        b.iter_batched(
            || {
                let mem = filled_memtable();
                let scratch = vec![Slot::default(); mem.value_count_max()];
                (mem, scratch)
            },
            |(mut mem, mut scratch)| {
                let sorted = mem.sort_into_values_and_clear(&mut scratch);
                black_box(sorted.len());
                (mem, scratch)
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    memtable_put_benchmark,
    memtable_coalesce_benchmark,
    memtable_get_benchmark,
    memtable_drain_benchmark
);
criterion_main!(benches);
