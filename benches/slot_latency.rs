// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slot allocation and reference/dereference latency.
//!
//! Measures the hot-path CAS loops in isolation: `allocate_next_slot` under
//! an empty and a fully-occupied event, and the reference/dereference pair
//! a subscriber exercises on every delivered sample.

#![allow(clippy::uninlined_format_args)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lola_shm::event_data_control::EventDataControl;
use std::hint::black_box as bb;

/// Allocate-publish-dereference cycles on an otherwise idle event, across
/// a range of slot-array sizes.
fn bench_allocate_publish_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_publish_cycle");

    for &slot_count in &[4usize, 16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(slot_count), &slot_count, |b, &slot_count| {
            let data = EventDataControl::new(slot_count, 8);
            let mut ts = 0u32;
            b.iter(|| {
                ts += 1;
                let slot = data.allocate_next_slot().expect("slot available");
                data.event_ready(slot, bb(ts));
            });
        });
    }

    group.finish();
}

/// Reference/dereference latency for a single subscriber consuming every
/// publication in order.
fn bench_reference_dereference_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_dereference_cycle");

    let data = EventDataControl::new(16, 8);
    let log_index = data.transaction_log_set().register_proxy_element(1).expect("registration");
    let mut ts = 0u32;

    group.bench_function("single_subscriber", |b| {
        b.iter(|| {
            ts += 1;
            let slot = data.allocate_next_slot().expect("slot available");
            data.event_ready(slot, ts);
            let referenced = data
                .reference_next_event(bb(ts - 1), log_index, lola_shm::ids::TIMESTAMP_MAX)
                .expect("new sample available");
            data.dereference_event(referenced, log_index);
        });
    });

    group.finish();
}

/// Allocation latency under contention from outstanding references held by
/// several subscribers, forcing the eviction scan to skip referenced slots.
fn bench_allocate_under_subscriber_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_under_subscriber_load");

    for &held_refs in &[0usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(held_refs), &held_refs, |b, &held_refs| {
            let data = EventDataControl::new(16, 8);
            let log_index = data.transaction_log_set().register_proxy_element(1).expect("registration");
            let mut ts = 0u32;

            // Prime `held_refs` permanently-referenced slots that the
            // allocator must scan past on every call.
            for _ in 0..held_refs {
                ts += 1;
                let slot = data.allocate_next_slot().expect("slot available");
                data.event_ready(slot, ts);
                data.reference_next_event(ts - 1, log_index, lola_shm::ids::TIMESTAMP_MAX).expect("reference");
            }

            b.iter(|| {
                ts += 1;
                let slot = data.allocate_next_slot().expect("slot available");
                data.event_ready(slot, bb(ts));
            });
        });
    }

    group.finish();
}

criterion_group!(
    slot_latency,
    bench_allocate_publish_cycle,
    bench_reference_dereference_cycle,
    bench_allocate_under_subscriber_load
);
criterion_main!(slot_latency);
