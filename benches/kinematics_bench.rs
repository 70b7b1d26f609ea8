// Benchmark for inverse kinematics and command parsing
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use arm_rs::command::parse_command;
use arm_rs::config::ArmConfig;
use arm_rs::motion::{solve, SafetyEnvelope};

fn bench_solve(c: &mut Criterion) {
    let envelope = SafetyEnvelope::new(&ArmConfig::default());
    let targets: Vec<(f64, f64)> = (0..1000)
        .map(|i| {
            let angle = (i as f64) * 0.09_f64.to_radians() + 0.3;
            let dist = 4.0 + (i % 190) as f64 * 0.1;
            (dist * angle.cos(), dist * angle.sin())
        })
        .collect();
    c.bench_function("solve 1k targets", |b| {
        b.iter(|| {
            let mut ok = 0;
            for &(x, y) in &targets {
                if solve(&envelope, black_box(x), black_box(y)).is_ok() {
                    ok += 1;
                }
            }
            black_box(ok)
        });
    });
}

fn bench_parse(c: &mut Criterion) {
    let lines: Vec<String> = (0..1000)
        .map(|i| format!("x:{}.5,y:{}.25,z:{}", i % 20, i % 15, i % 30))
        .collect();
    c.bench_function("parse 1k move commands", |b| {
        b.iter(|| {
            let parsed = lines.iter().filter(|l| parse_command(l).is_ok()).count();
            assert_eq!(parsed, 1000);
        });
    });
}

criterion_group!(benches, bench_solve, bench_parse);
criterion_main!(benches);
