use lanvan_storage::{StagedFile, UploadDirectory};
use tempfile::TempDir;

/// Fresh upload directory inside a temp dir. Keep the `TempDir` alive.
pub async fn setup_directory() -> (TempDir, UploadDirectory) {
    let temp = TempDir::new().unwrap();
    let uploads = UploadDirectory::new(temp.path().join("uploads"))
        .await
        .unwrap();
    (temp, uploads)
}

/// Create a temp file for `name` with a random session id and write `data`.
pub async fn stage(uploads: &UploadDirectory, name: &str, data: &[u8]) -> StagedFile {
    let session = uuid::Uuid::new_v4().to_string();
    let mut staged = uploads.create_temp(name, &session).await.unwrap();
    staged.write(data).await.unwrap();
    staged
}

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}
