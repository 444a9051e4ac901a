//! Stitch and encode performance benchmarks
//!
//! Measures tile blitting into a raw composite buffer and encoding of the
//! finished composite. Both sit on the critical path of large captures.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use pagestitch::{
    capture::CompositeBuffer,
    deliver::encode_composite,
    model::{CaptureRequest, OutputFormat, Preferences, Region, Size, TabId},
    plan::{CompositeKind, Tile, TileLimits, TilePlan},
};

fn test_tile_image(width: u32, height: u32) -> image::RgbaImage {
    image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 251) as u8, (y % 241) as u8, ((x + y) % 253) as u8, 255])
    })
}

fn bench_plan_large_region(c: &mut Criterion) {
    let limits = TileLimits::derive(1.0, None);

    c.bench_function("plan_5000x20000", |b| {
        b.iter(|| TilePlan::compute(black_box(5000), black_box(20000), black_box(&limits)));
    });
}

fn bench_blit_full_width_tiles(c: &mut Criterion) {
    // One viewport-sized tile column stitched down a tall buffer
    let src = test_tile_image(1280, 720);
    let rows: Vec<Tile> = (0..10)
        .map(|i| Tile {
            x:      0,
            y:      i * 720,
            width:  1280,
            height: 720,
        })
        .collect();

    c.bench_function("blit_1280x720_x10_full_width", |b| {
        b.iter(|| {
            let mut buf = CompositeBuffer::allocate(CompositeKind::RawBuffer, 1280, 7200).unwrap();
            for tile in &rows {
                buf.write_tile(black_box(tile), black_box(&src), (0, 0)).unwrap();
            }
            buf
        });
    });
}

fn bench_blit_partial_width_tiles(c: &mut Criterion) {
    // Offset columns force the row-by-row copy path
    let src = test_tile_image(640, 720);
    let tiles: Vec<Tile> = (0..2)
        .flat_map(|col| {
            (0..10).map(move |row| Tile {
                x:      col * 640,
                y:      row * 720,
                width:  640,
                height: 720,
            })
        })
        .collect();

    c.bench_function("blit_640x720_x20_partial_width", |b| {
        b.iter(|| {
            let mut buf = CompositeBuffer::allocate(CompositeKind::RawBuffer, 1280, 7200).unwrap();
            for tile in &tiles {
                buf.write_tile(black_box(tile), black_box(&src), (0, 0)).unwrap();
            }
            buf
        });
    });
}

fn filled_composite(width: u32, height: u32) -> CompositeBuffer {
    let mut buf = CompositeBuffer::allocate(CompositeKind::RawBuffer, width, height).unwrap();
    let src = test_tile_image(width, height);
    let tile = Tile {
        x: 0,
        y: 0,
        width,
        height,
    };
    buf.write_tile(&tile, &src, (0, 0)).unwrap();
    buf
}

fn bench_encode_png_composite(c: &mut Criterion) {
    let request = CaptureRequest::builder(TabId(1))
        .region(Region::new(0, 0, 1920, 4320))
        .viewport(Size::new(1920, 1080))
        .page(Size::new(1920, 8000))
        .format(OutputFormat::Png)
        .page_title("Benchmark Page")
        .page_url("https://example.com/bench")
        .build();
    let prefs = Preferences::default();

    c.bench_function("encode_png_1920x4320", |b| {
        b.iter(|| {
            encode_composite(black_box(filled_composite(1920, 4320)), &request, &prefs).unwrap()
        });
    });
}

fn bench_encode_jpeg_composite(c: &mut Criterion) {
    let request = CaptureRequest::builder(TabId(1))
        .region(Region::new(0, 0, 1920, 4320))
        .viewport(Size::new(1920, 1080))
        .page(Size::new(1920, 8000))
        .format(OutputFormat::Jpeg)
        .build();
    let prefs = Preferences::default();

    c.bench_function("encode_jpeg_1920x4320", |b| {
        b.iter(|| {
            encode_composite(black_box(filled_composite(1920, 4320)), &request, &prefs).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_plan_large_region,
    bench_blit_full_width_tiles,
    bench_blit_partial_width_tiles,
    bench_encode_png_composite,
    bench_encode_jpeg_composite
);
criterion_main!(benches);
