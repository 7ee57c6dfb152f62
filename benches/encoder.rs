use criterion::{criterion_group, criterion_main, Criterion};

use pixbadge::{
    models::{Color, GridSequence},
    raster::{Pattern, Text},
    wire,
};

fn pattern_sequence() -> GridSequence {
    let frames = (0..Pattern::FRAME_COUNT)
        .map(|t| Pattern.render_frame(t))
        .collect();

    GridSequence::new(frames, Pattern::FPS).unwrap()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function(&format!("pattern {} frames", Pattern::FRAME_COUNT), |b| {
        b.iter(pattern_sequence)
    });

    let mut text = Text::new(
        "Positive Hack Days".to_owned(),
        Color::new(255, 255, 255),
        Color::new(0, 0, 0),
    );
    text.prepare();
    c.bench_function(&format!("text {} frames", text.frame_count()), |b| {
        b.iter(|| (0..text.frame_count()).map(|t| text.render_frame(t)).count())
    });

    let sequence = pattern_sequence();
    c.bench_function(&format!("encode {} frames", sequence.len()), |b| {
        b.iter(|| wire::encode(&sequence))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
