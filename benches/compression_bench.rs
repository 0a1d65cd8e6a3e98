use criterion::{black_box, criterion_group, criterion_main, Criterion};
use muxdemux::codec::{Codec, ZstdCodec};
use muxdemux::hash::{digest, HashAlgorithm};
use muxdemux::{StreamReader, StreamWriter, WriterOptions};

fn container(data: &[u8], compress: bool) -> Vec<u8> {
    let opts = WriterOptions { write_hash: true, compress, ..WriterOptions::default() };
    let mut writer = StreamWriter::with_options(Vec::new(), opts);
    writer.copy_from(data, 64 * 1024).unwrap();
    writer.finish().unwrap();
    writer.into_inner()
}

fn bench_compression(c: &mut Criterion) {
    let data = vec![0u8; 1024 * 1024];
    let zstd = ZstdCodec;

    c.bench_function("zstd_compress_1mb", |b| b.iter(|| zstd.compress(black_box(&data), 3)));
}

fn bench_digest(c: &mut Criterion) {
    let data = vec![7u8; 1024 * 1024];

    for algo in [HashAlgorithm::Sha256, HashAlgorithm::Blake3] {
        c.bench_function(&format!("{}_1mb", algo.name()), |b| {
            b.iter(|| digest(algo, black_box(&data)))
        });
    }
}

fn bench_mux(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("mux_1mb_plain", |b| b.iter(|| container(black_box(&data), false)));
    c.bench_function("mux_1mb_zstd", |b| b.iter(|| container(black_box(&data), true)));
}

fn bench_demux(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];
    let plain = container(&data, false);
    let packed = container(&data, true);

    for (label, bytes) in [("demux_1mb_plain", &plain), ("demux_1mb_zstd", &packed)] {
        c.bench_function(label, |b| {
            b.iter(|| {
                let mut reader = StreamReader::new(black_box(&bytes[..]));
                let mut part = reader.next_part().unwrap().unwrap();
                part.drain().unwrap()
            })
        });
    }
}

criterion_group!(benches, bench_compression, bench_digest, bench_mux, bench_demux);
criterion_main!(benches);
