//! Benchmarks for scheduler status parsing using criterion.
//!
//! A busy cluster returns thousands of jobs per query, and every poll parses
//! the whole listing. These benchmarks measure:
//! - PBS `qstat -f -F json` parsing
//! - Grid Engine `qstat -r` parsing

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use sortie::backend::pbs::parse_qstat_json;
use sortie::backend::sge::parse_qstat_r;
use sortie_testkit::fixtures::{FakeJob, pbs_query, sge_query};

const STATES: [&str; 4] = ["Q", "R", "F", "H"];
const SGE_STATES: [&str; 4] = ["qw", "r", "Eqw", "hqw"];

fn pbs_jobs(count: usize) -> Vec<FakeJob> {
    (0..count)
        .map(|i| {
            let job = FakeJob::new(&format!("{i}.server"), &format!("job_{i}"), STATES[i % 4]);
            if i % 4 == 2 { job.exited((i % 3) as i32) } else { job }
        })
        .collect()
}

fn sge_jobs(count: usize) -> Vec<FakeJob> {
    (0..count)
        .map(|i| FakeJob::new(&i.to_string(), &format!("job_{i}"), SGE_STATES[i % 4]))
        .collect()
}

fn bench_pbs(c: &mut Criterion) {
    let mut group = c.benchmark_group("qstat_json");
    group.sample_size(50);

    for size in [10usize, 1_000, 10_000] {
        let output = pbs_query(&pbs_jobs(size));
        let ids: Vec<String> = (0..size).step_by(7).map(|i| format!("{i}.server")).collect();
        group.throughput(Throughput::Bytes(output.stdout.len() as u64));
        group.bench_function(format!("{size}_jobs"), |b| {
            b.iter(|| parse_qstat_json(black_box(&output), black_box(&ids)))
        });
    }

    group.finish();
}

fn bench_sge(c: &mut Criterion) {
    let mut group = c.benchmark_group("qstat_r");
    group.sample_size(50);

    for size in [10usize, 1_000, 10_000] {
        let output = sge_query(&sge_jobs(size));
        let ids: Vec<String> = (0..size).step_by(7).map(|i| i.to_string()).collect();
        group.throughput(Throughput::Bytes(output.stdout.len() as u64));
        group.bench_function(format!("{size}_jobs"), |b| {
            b.iter(|| parse_qstat_r(black_box(&output), black_box(&ids)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pbs, bench_sge);
criterion_main!(benches);
