//! 数组与请求堆的基准测试
//!
//! Run with: cargo bench --bench array_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qvm_core::mm::with_heap;
use qvm_core::vm::array::{Array, SortFlags};
use qvm_core::vm::iter::iterate_v;
use qvm_core::Variant;

fn bench_array_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_insert");

    for n in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("append", n), &n, |b, &n| {
            b.iter(|| {
                let mut arr = Array::new();
                for i in 0..n {
                    arr.append(i as i64);
                }
                black_box(arr)
            });
        });
        group.bench_with_input(BenchmarkId::new("string_keys", n), &n, |b, &n| {
            let keys: Vec<String> = (0..n).map(|i| format!("key_{i}")).collect();
            b.iter(|| {
                let mut arr = Array::with_capacity(n);
                for (i, k) in keys.iter().enumerate() {
                    arr.set(k.as_str(), i as i64);
                }
                black_box(arr)
            });
        });
    }

    group.finish();
}

fn bench_array_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_lookup");

    let mut arr = Array::new();
    for i in 0..1024i64 {
        arr.set(format!("k{i}").as_str(), i);
    }

    group.bench_function("hit", |b| {
        b.iter(|| black_box(arr.exists(black_box("k512"))));
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(arr.exists(black_box("absent"))));
    });

    group.finish();
}

fn bench_copy_on_write(c: &mut Criterion) {
    let source = Array::from_values(0..1024i64);

    c.bench_function("cow_escalate_1024", |b| {
        b.iter(|| {
            let mut copy = source.clone();
            copy.set(0, -1);
            black_box(copy)
        });
    });
}

fn bench_iterate_and_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_walk");
    let values: Vec<i64> = (0..4096).map(|i| (i * 7919) % 4096).collect();
    let arr = Array::from_values(values.iter().copied());

    group.throughput(Throughput::Elements(values.len() as u64));
    group.bench_function("iterate_v", |b| {
        b.iter(|| {
            let mut sum = 0i64;
            iterate_v(&arr.to_tv(), |v| {
                sum = sum.wrapping_add(v.num());
                false
            });
            black_box(sum)
        });
    });
    group.bench_function("sort_numeric", |b| {
        b.iter(|| {
            let mut copy = arr.clone();
            copy.sort(SortFlags::Numeric, true);
            black_box(copy)
        });
    });
    group.bench_function("usort", |b| {
        b.iter(|| {
            let mut copy = arr.clone();
            copy.usort(|a, b| a.num().cmp(&b.num()));
            black_box(copy)
        });
    });

    group.finish();
}

fn bench_small_alloc(c: &mut Criterion) {
    c.bench_function("req_malloc_free_64", |b| {
        b.iter(|| {
            with_heap(|mm| {
                let p = mm.req_malloc(black_box(64));
                unsafe { mm.req_free(p) };
            })
        });
    });

    c.bench_function("variant_string", |b| {
        b.iter(|| black_box(Variant::from(black_box("hello world"))));
    });
}

criterion_group!(
    benches,
    bench_array_insert,
    bench_array_lookup,
    bench_copy_on_write,
    bench_iterate_and_sort,
    bench_small_alloc,
);
criterion_main!(benches);
