//! Transform execution benchmarks
//!
//! - `execute_native/*`: full lifecycle of a one-segment native transform
//!   (negotiate, queue on the pool, run, stop)
//! - `execute_script/*`: same lifecycle through the script functional
//! - `execute_parallel/*`: N transforms started together, then waited on
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench transform_execute
//! cargo bench --bench transform_execute -- "execute_parallel"
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nirva::{
    AttrDef, AttrMap, BundleLike, CapSet, Contract, Functional, Intent, Runtime, RuntimeConfig, Segment,
    StrandType, Trajectory, TxResult,
};
use std::sync::Arc;

fn bench_runtime() -> Arc<Runtime> {
    Runtime::with_config(RuntimeConfig {
        pool_min_threads: 4,
        pool_max_threads: 16,
        ..RuntimeConfig::default()
    })
    .expect("runtime")
}

fn adder() -> Arc<Contract> {
    Contract::builder("add", Intent::PROCESS)
        .input(AttrDef::with_default("a", 0))
        .input(AttrDef::with_default("b", 0))
        .output(AttrDef::new("out", StrandType::Int))
        .trajectory(Trajectory::new("sum").segment(
            Segment::new("compute").functional(
                Functional::native("add", |call| {
                    let sum = call.int(0)? + call.int(1)?;
                    call.set_param(2, vec![sum.into()])
                })
                .map(AttrMap::input("a", StrandType::Int))
                .map(AttrMap::input("b", StrandType::Int))
                .map(AttrMap::output("out", StrandType::Int)),
            ),
        ))
        .build()
        .expect("adder contract")
}

fn scripted() -> Arc<Contract> {
    Contract::builder("area", Intent::PROCESS)
        .input(AttrDef::with_default("w", 0))
        .input(AttrDef::with_default("h", 0))
        .output(AttrDef::new("area", StrandType::Int))
        .trajectory(Trajectory::new("calc").segment(
            Segment::new("calc")
                .functional(Functional::script("area", "area = w * h").expect("script")),
        ))
        .build()
        .expect("area contract")
}

fn execute_native(c: &mut Criterion) {
    let rt = bench_runtime();
    let contract = adder();
    let mut group = c.benchmark_group("execute_native");
    group.throughput(Throughput::Elements(1));
    group.bench_function("add", |b| {
        b.iter(|| {
            let tx = contract.action(CapSet::new());
            tx.set_input("a", 3).expect("a");
            tx.set_input("b", 4).expect("b");
            assert_eq!(tx.execute(&rt), TxResult::Success);
            black_box(tx.attrs().get_int("out").expect("out"))
        })
    });
    group.bench_function("breach", |b| {
        b.iter(|| {
            let tx = contract.action(CapSet::new());
            tx.set_input("a", 3).expect("a");
            black_box(tx.execute(&rt))
        })
    });
    group.finish();
    rt.shutdown();
}

fn execute_script(c: &mut Criterion) {
    let rt = bench_runtime();
    let contract = scripted();
    let mut group = c.benchmark_group("execute_script");
    group.throughput(Throughput::Elements(1));
    group.bench_function("area", |b| {
        b.iter(|| {
            let tx = contract.action(CapSet::new());
            tx.set_input("w", 6).expect("w");
            tx.set_input("h", 7).expect("h");
            assert_eq!(tx.execute(&rt), TxResult::Success);
            black_box(tx.attrs().get_int("area").expect("area"))
        })
    });
    group.finish();
    rt.shutdown();
}

fn execute_parallel(c: &mut Criterion) {
    let rt = bench_runtime();
    let contract = adder();
    let mut group = c.benchmark_group("execute_parallel");
    for n in [4usize, 16, 64] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let txs: Vec<_> = (0..n)
                    .map(|i| {
                        let tx = contract.action(CapSet::new());
                        tx.set_input("a", i as i32).expect("a");
                        tx.set_input("b", 1).expect("b");
                        tx.start(&rt).expect("start");
                        tx
                    })
                    .collect();
                for tx in &txs {
                    assert_eq!(tx.wait(), TxResult::Success);
                }
            })
        });
    }
    group.finish();
    rt.shutdown();
}

criterion_group!(benches, execute_native, execute_script, execute_parallel);
criterion_main!(benches);
