use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use strata_core::{
    dialect, generate_record_id, partition_key, plan_partitions, plan_scan, Paging, QueryKind,
};

fn bench_partition_key(c: &mut Criterion) {
    let ids: Vec<String> = (0..1_000).map(|_| generate_record_id()).collect();

    c.bench_function("partition/key_1k_ids", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for id in &ids {
                acc += u64::from(partition_key(black_box(id), 100));
            }
            black_box(acc);
        });
    });
}

fn bench_planning(c: &mut Criterion) {
    c.bench_function("partition/plan_100_by_16", |b| {
        b.iter(|| black_box(plan_partitions(black_box(100), black_box(16))));
    });

    let paged = Paging::new(50, Some(25));
    c.bench_function("partition/plan_scan_paged", |b| {
        b.iter(|| black_box(plan_scan(100, 16, black_box(&paged))));
    });
}

fn bench_template_resolution(c: &mut Criterion) {
    let set = dialect::postgresql();

    c.bench_function("query/resolve_ids_500", |b| {
        b.iter(|| {
            let sql = set
                .resolve_with_id_count(QueryKind::RetrievalByIds, black_box(7), "events", 500)
                .expect("resolve ids query");
            black_box(sql.len());
        });
    });
}

criterion_group!(
    benches,
    bench_partition_key,
    bench_planning,
    bench_template_resolution
);
criterion_main!(benches);
