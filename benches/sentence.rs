use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use voicesvc::sentence;

fn bench_split(c: &mut Criterion) {
    let paragraph = "Dr. Smith arrived at 3.15 in the afternoon. \
        Everyone waited for him! Was the meeting still on? \
        He said \"yes.\" The agenda covered e.g. budgets, staffing, etc. \
        你好世界。今天天气很好！"
        .repeat(8);

    c.bench_function("split_paragraph", |b| {
        b.iter(|| sentence::split(black_box(&paragraph)))
    });

    c.bench_function("split_no_terminators", |b| {
        let run_on = "word ".repeat(400);
        b.iter(|| sentence::split(black_box(&run_on)))
    });
}

criterion_group!(benches, bench_split);
criterion_main!(benches);
