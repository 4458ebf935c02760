use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use fabric_emu::{DropTailConfig, Emulation, EmulationConfig, HullConfig, RedConfig, RouterPolicy};

fn emulation(racks: u16, policy: RouterPolicy) -> Emulation {
    let cfg = EmulationConfig::default()
        .with_racks(racks)
        .with_endpoints_per_rack(32)
        .with_packet_pool_size(1 << 14)
        .with_router(policy);
    Emulation::new(cfg).expect("valid bench config")
}

/// Keep every endpoint busy: top up backlog towards the next rack over and
/// release the admitted records.
fn step_loaded(emu: &mut Emulation, round: u64) {
    let n = emu.config().num_endpoints() as u16;
    if round % 16 == 0 {
        for src in 0..n {
            emu.add_backlog(src, (src + 32) % n, 0, 16, 0, &[]);
        }
    }
    emu.step();
    emu.handle().drain_admitted(|record| {
        black_box(record.entries.len());
    });
}

fn benchmark_timeslot(c: &mut Criterion) {
    let mut group = c.benchmark_group("timeslot");

    let policies = [
        ("drop_tail", RouterPolicy::DropTail(DropTailConfig::default())),
        ("red", RouterPolicy::Red(RedConfig::default())),
        ("hull", RouterPolicy::Hull(HullConfig::default())),
    ];
    for (name, policy) in policies {
        for racks in [2u16, 4] {
            group.bench_with_input(BenchmarkId::new(name, racks), &racks, |b, &racks| {
                let mut emu = emulation(racks, policy.clone());
                let mut round = 0;
                b.iter(|| {
                    step_loaded(&mut emu, round);
                    round += 1;
                });
            });
        }
    }

    group.bench_function("idle", |b| {
        let mut emu = emulation(1, RouterPolicy::default());
        b.iter(|| {
            emu.step();
            emu.handle().drain_admitted(|_| {});
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_timeslot);
criterion_main!(benches);
