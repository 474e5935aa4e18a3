//! Criterion micro-benchmarks for node allocation, editing and rollback.

use canopy_core::{PoolError, TypeTag};
use canopy_pool::{Handle, PoolConfig, TreePool};
use canopy_test_utils::{balanced_sum, fixture_pool, integer};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const LEAF: TypeTag = TypeTag(1);

/// A 64 KiB pool whose first node is a parent of 64 leaves, followed by
/// `trailing` bytes of unrelated roots that every edit of the parent shifts.
fn make_shifting_pool(trailing: u32) -> (TreePool, Handle, Vec<Handle>) {
    let mut pool = TreePool::new(PoolConfig::new(1 << 16)).unwrap();
    let leaves: Vec<Handle> = (0..64u8)
        .map(|i| pool.create_node(LEAF, &[i; 8], &[]).unwrap())
        .collect();
    let refs: Vec<&Handle> = leaves.iter().collect();
    let parent = pool.create_node(LEAF, &[], &refs).unwrap();
    for leaf in leaves {
        pool.release(leaf).unwrap();
    }
    let mut filler = Vec::new();
    let mut used = 0;
    while used < trailing {
        filler.push(pool.create_node(LEAF, &[0; 236], &[]).unwrap());
        used += 256;
    }
    (pool, parent, filler)
}

/// Benchmark: create a leaf and release it again.
fn bench_create_release(c: &mut Criterion) {
    let mut pool = TreePool::with_capacity(4096).unwrap();
    let payload = [7u8; 16];
    c.bench_function("create_release_leaf", |b| {
        b.iter(|| {
            let h = pool.create_node(LEAF, black_box(&payload[..]), &[]).unwrap();
            pool.release(h).unwrap();
        });
    });
}

/// Benchmark: build a 256-leaf balanced tree, then drop it.
fn bench_build_balanced(c: &mut Criterion) {
    let mut pool = fixture_pool(1 << 16);
    c.bench_function("build_balanced_256", |b| {
        b.iter(|| {
            let tree = balanced_sum(&mut pool, 8).unwrap();
            black_box(tree.id());
            pool.release(tree).unwrap();
        });
    });
}

/// Benchmark: deep-copy a 256-leaf tree.
fn bench_clone_balanced(c: &mut Criterion) {
    let mut pool = fixture_pool(1 << 16);
    let tree = balanced_sum(&mut pool, 8).unwrap();
    c.bench_function("clone_balanced_256", |b| {
        b.iter(|| {
            let copy = pool.clone_node(&tree).unwrap();
            pool.release(copy).unwrap();
        });
    });
}

/// Benchmark: insert a root at the front of a parent and take it out again,
/// shifting 32 KiB of trailing roots both ways.
fn bench_insert_remove_front(c: &mut Criterion) {
    let (mut pool, parent, _filler) = make_shifting_pool(32 * 1024);
    let child = pool.create_node(LEAF, &[1; 8], &[]).unwrap();
    c.bench_function("insert_remove_front_32k", |b| {
        b.iter(|| {
            pool.insert_child(&parent, 0, &child).unwrap();
            pool.remove_child(&parent, 0).unwrap();
        });
    });
}

/// Benchmark: grow and shrink the first leaf's payload under 32 KiB of
/// trailing data.
fn bench_resize_shift(c: &mut Criterion) {
    let (mut pool, parent, _filler) = make_shifting_pool(32 * 1024);
    let first = pool.child_at(&parent, 0).unwrap();
    c.bench_function("resize_shift_32k", |b| {
        b.iter(|| {
            pool.resize_node(&first, 64).unwrap();
            pool.resize_node(&first, 8).unwrap();
        });
    });
}

/// Benchmark: open a checkpoint, allocate 64 literals, roll back.
fn bench_checkpoint_rollback(c: &mut Criterion) {
    let mut pool = fixture_pool(1 << 16);
    let _base = balanced_sum(&mut pool, 6).unwrap();
    c.bench_function("checkpoint_rollback_64", |b| {
        b.iter(|| {
            let cp = pool.open_checkpoint();
            for i in 0..64 {
                let _ = integer(&mut pool, i).unwrap();
            }
            pool.rollback(cp).unwrap();
        });
    });
}

/// Benchmark: exhaust a small pool inside a guarded body and unwind.
fn bench_guarded_unwind(c: &mut Criterion) {
    let mut pool = TreePool::with_capacity(1024).unwrap();
    c.bench_function("guarded_unwind_1k", |b| {
        b.iter(|| {
            let result = pool.run_guarded(|pool| -> Result<(), PoolError> {
                loop {
                    let _ = pool.create_node(LEAF, &[0; 44], &[])?;
                }
            });
            black_box(result.is_err());
        });
    });
}

criterion_group!(
    benches,
    bench_create_release,
    bench_build_balanced,
    bench_clone_balanced,
    bench_insert_remove_front,
    bench_resize_shift,
    bench_checkpoint_rollback,
    bench_guarded_unwind
);
criterion_main!(benches);
