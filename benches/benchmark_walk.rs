use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::net::IpAddr;

use tlsreach::address::{parse_target, step, Direction, Target};
use tlsreach::scanner::Frontier;

fn bench_step(c: &mut Criterion) {
    let v4: IpAddr = "10.0.0.1".parse().unwrap();
    let v6: IpAddr = "2001:db8::1".parse().unwrap();

    c.bench_function("step ipv4", |b| {
        b.iter(|| step(black_box(v4), black_box(Direction::Increment)))
    });
    c.bench_function("step ipv6", |b| {
        b.iter(|| step(black_box(v6), black_box(Direction::Decrement)))
    });
}

fn bench_frontier(c: &mut Criterion) {
    c.bench_function("frontier advance 1k both ways", |b| {
        b.iter(|| {
            let frontier = Frontier::new(None);
            frontier.claim("10.128.0.0".parse().unwrap());
            for _ in 0..500 {
                black_box(frontier.advance(Direction::Increment));
                black_box(frontier.advance(Direction::Decrement));
            }
        })
    });
}

fn bench_cidr_expansion(c: &mut Criterion) {
    c.bench_function("expand /20", |b| {
        b.iter(|| match parse_target(black_box("172.16.0.0/20"), false) {
            Some(Target::Cidr(cidr)) => cidr.iter().count(),
            _ => 0,
        })
    });
}

criterion_group!(benches, bench_step, bench_frontier, bench_cidr_expansion);
criterion_main!(benches);
