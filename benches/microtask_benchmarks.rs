use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use zonal_promise::{Promise, Value, h, pump};

fn then_chain(depth: usize) {
    let mut promise = Promise::resolved(Value::from(0.0));
    for _ in 0..depth {
        promise = promise.then(
            Some(h(|v| match v {
                Value::Number(n) => Ok(Value::from(n + 1.0)),
                other => Ok(other),
            })),
            None,
        );
    }
    pump();
    black_box(promise);
}

fn fan_out(width: usize) {
    let (promise, resolve, _reject) = Promise::deferred();
    for _ in 0..width {
        promise.then(Some(h(|v| Ok(v))), None);
    }
    resolve.resolve(Value::Undefined);
    pump();
}

fn bench_then_chain(c: &mut Criterion) {
    c.bench_function("then_chain_100", |b| b.iter(|| then_chain(black_box(100))));
}

fn bench_fan_out(c: &mut Criterion) {
    c.bench_function("fan_out_100", |b| b.iter(|| fan_out(black_box(100))));
}

criterion_group!(benches, bench_then_chain, bench_fan_out);
criterion_main!(benches);
