use parsec_crypto::{open, seal, tokenize, MasterKey};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [64, 1024, 65536])]
fn bench_seal(bencher: divan::Bencher, size: usize) {
    let key = [0xABu8; 32];
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| seal(divan::black_box(&key), divan::black_box(&data), b"entry").unwrap());
}

#[divan::bench(args = [64, 1024, 65536])]
fn bench_open(bencher: divan::Bencher, size: usize) {
    let key = [0xABu8; 32];
    let sealed = seal(&key, &make_data(size), b"entry").unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| open(divan::black_box(&key), divan::black_box(&sealed), b"entry").unwrap());
}

#[divan::bench]
fn bench_tokenize(bencher: divan::Bencher) {
    let key = MasterKey::from_bytes([7u8; 32]);
    bencher.bench(|| tokenize(divan::black_box("lighthouse"), "edb2", &key));
}

#[divan::bench(args = [1, 16, 256])]
fn bench_entry_keys(bencher: divan::Bencher, run: u64) {
    let token = tokenize("lighthouse", "edb", &MasterKey::from_bytes([7u8; 32]));
    bencher.bench(|| {
        for counter in 0..run {
            divan::black_box(token.entry_key(counter));
        }
    });
}

fn main() {
    divan::main();
}
