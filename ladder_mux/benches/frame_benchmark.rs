use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ladder_mux::{
	mux::{FrameMetadata, SessionStatus},
	Destination, SocksAddr, SocksDestination,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::net::Ipv4Addr;

fn generate_metas(size: usize, seed: u64) -> Vec<FrameMetadata> {
	let rng = &mut StdRng::seed_from_u64(seed);
	(0..size)
		.map(|_| {
			let id = rng.gen();
			if rng.gen_bool(0.2) {
				let mut meta = FrameMetadata::new(id, SessionStatus::New);
				let dest = if rng.gen_bool(0.5) {
					SocksDestination::new_domain("some.domain.example.com").unwrap()
				} else {
					SocksDestination::Ip(Ipv4Addr::from(rng.gen::<u32>()).into())
				};
				meta.target = Some(Destination::tcp(SocksAddr::new(dest, rng.gen())));
				meta
			} else {
				FrameMetadata::new(id, SessionStatus::Keep)
			}
		})
		.collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
	let metas = generate_metas(1000, 0);
	let mut buf = BytesMut::with_capacity(64 * 1024);
	c.bench_function("frame_metadata_encode_1k", |b| {
		b.iter(|| {
			buf.clear();
			for meta in &metas {
				black_box(meta).write_to(&mut buf).unwrap();
			}
		});
	});

	let encoded: Vec<BytesMut> = metas
		.iter()
		.map(|meta| {
			let mut buf = BytesMut::new();
			meta.write_to(&mut buf).unwrap();
			buf
		})
		.collect();
	c.bench_function("frame_metadata_decode_1k", |b| {
		b.iter(|| {
			for buf in &encoded {
				// Skip the length prefix.
				let _meta = FrameMetadata::decode(black_box(&buf[2..])).unwrap();
			}
		});
	});
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
