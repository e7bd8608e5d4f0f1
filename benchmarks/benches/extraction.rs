//! Checksum and extraction benchmarks using Criterion

use cartographer_benchmarks::{generate_map, generate_rooms};
use cartographer_core::script::{extract, AddressMode};
use cartographer_core::{validate_room, RoomRecord};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

fn extraction_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");
    let rooms = generate_rooms(1_000, 8);
    group.throughput(Throughput::Elements(rooms.len() as u64));

    group.bench_function("checksum_1000_rooms", |b| {
        b.iter(|| {
            for room in &rooms {
                black_box(room.checksum());
            }
        })
    });

    group.bench_function("extract_tree_mode", |b| {
        b.iter_batched(
            || rooms.clone(),
            |mut rooms| {
                for room in &mut rooms {
                    black_box(extract(room, AddressMode::Tree));
                }
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("extract_bundle_mode", |b| {
        b.iter_batched(
            || rooms.clone(),
            |mut rooms| {
                for room in &mut rooms {
                    black_box(extract(room, AddressMode::Bundle));
                }
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("room_record_new", |b| {
        b.iter_batched(
            || rooms.clone(),
            |rooms| black_box(rooms.into_iter().map(RoomRecord::new).collect::<Vec<_>>()),
            BatchSize::LargeInput,
        )
    });

    let raw = generate_map(1_000, 8);
    group.bench_function("validate_1000_rooms", |b| {
        b.iter(|| {
            for room in &raw {
                let _ = black_box(validate_room(room));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, extraction_benchmarks);
criterion_main!(benches);
