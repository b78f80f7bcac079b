use bytes::Bytes;
use lanvan_core::config::AppConfig;
use lanvan_upload::{Environment, SessionHandle, UploadCoordinator, UploadReport};
use tempfile::TempDir;

/// Coordinator over a fresh temp directory. Keep the `TempDir` alive.
pub async fn setup_coordinator(
    configure: impl FnOnce(&mut AppConfig),
) -> (TempDir, UploadCoordinator) {
    let temp = TempDir::new().unwrap();
    let mut config = AppConfig::for_testing(temp.path().join("uploads"));
    configure(&mut config);
    let env = Environment::for_app(&config);
    let coordinator = UploadCoordinator::new(&config, env).await.unwrap();
    (temp, coordinator)
}

/// Send `data` in `chunk_len` pieces, marking the final piece as last.
///
/// Empty `data` is sent as a single empty closing chunk.
pub async fn send_in_chunks(handle: &SessionHandle, data: &[u8], chunk_len: usize) -> UploadReport {
    let pieces: Vec<&[u8]> = if data.is_empty() {
        vec![&[][..]]
    } else {
        data.chunks(chunk_len).collect()
    };
    let last = pieces.len() - 1;
    for (i, piece) in pieces.into_iter().enumerate() {
        let report = handle
            .send_chunk(Bytes::copy_from_slice(piece), i == last)
            .await
            .unwrap();
        if i == last {
            return report.expect("closing chunk returns a report");
        }
    }
    unreachable!("loop returns on the last piece")
}

/// Names of the visible files, sorted.
pub async fn visible_names(coordinator: &UploadCoordinator) -> Vec<String> {
    coordinator
        .directory()
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect()
}

/// Generate deterministic test data using a seeded pseudo-random generator
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}
