use vspace_crypto::{
    derive_folder_key, encrypt_folder_name, generate_vaultspace_key, unwrap_key, wrap_key,
    ExportableKey, FolderPath, MasterSecret,
};

fn make_path(depth: usize) -> FolderPath {
    FolderPath::new((0..depth).map(|i| format!("folder-{i:04}"))).unwrap()
}

#[divan::bench(args = [1, 8, 32])]
fn bench_derive_folder_key(bencher: divan::Bencher, depth: usize) {
    let master = MasterSecret::from_bytes([0xABu8; 32]);
    let path = make_path(depth);
    bencher.bench(|| derive_folder_key(divan::black_box(&master), divan::black_box(&path)).unwrap());
}

#[divan::bench]
fn bench_encrypt_folder_name(bencher: divan::Bencher) {
    let master = MasterSecret::from_bytes([0xABu8; 32]);
    let key = derive_folder_key(&master, &make_path(4)).unwrap();
    bencher.bench(|| encrypt_folder_name(divan::black_box("Quarterly Reports"), &key).unwrap());
}

#[divan::bench]
fn bench_wrap_key(bencher: divan::Bencher) {
    let wrapping = ExportableKey::from_bytes([0x42u8; 32]);
    let payload = generate_vaultspace_key();
    bencher.bench(|| wrap_key(divan::black_box(&wrapping), divan::black_box(&payload)).unwrap());
}

#[divan::bench]
fn bench_unwrap_key(bencher: divan::Bencher) {
    let wrapping = ExportableKey::from_bytes([0x42u8; 32]);
    let envelope = wrap_key(&wrapping, &generate_vaultspace_key()).unwrap();
    bencher.bench(|| unwrap_key(divan::black_box(&wrapping), divan::black_box(&envelope)).unwrap());
}

fn main() {
    divan::main();
}
