//! Benchmarks for preprocessing and compositing.
//!
//! Run with: cargo bench --bench vision_ops

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use cxr_vision::{composite, OverlayOptions, Preprocessor, RawImage};

/// Create a synthetic grayscale radiograph with noise.
fn create_synthetic_image(height: usize, width: usize) -> RawImage {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let data: Vec<u8> = (0..height * width)
        .map(|i| {
            let y = (i / width) as f32 / height as f32;
            (y * 180.0 + rng.gen::<f32>() * 40.0) as u8
        })
        .collect();
    RawImage::from_raw(&[height, width], data).unwrap()
}

fn bench_preprocess(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocess");
    let preprocessor = Preprocessor::new();

    for size in [224usize, 512, 1024].iter() {
        let image = create_synthetic_image(*size, *size);
        group.bench_with_input(BenchmarkId::new("to_chw", size), size, |b, _| {
            b.iter(|| black_box(preprocessor.to_chw(black_box(&image))))
        });
    }

    group.finish();
}

fn bench_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");
    let options = OverlayOptions::default();

    for size in [224usize, 512, 1024].iter() {
        let image = create_synthetic_image(*size, *size);
        let map = Array2::from_shape_fn((*size, *size), |(y, x)| {
            ((x + y) as f32 / (2 * size) as f32).min(1.0)
        });
        group.bench_with_input(BenchmarkId::new("overlay", size), size, |b, _| {
            b.iter(|| black_box(composite(&image, map.view(), &options).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_preprocess, bench_composite);
criterion_main!(benches);
