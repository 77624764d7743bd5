//! Streaming SHA-256 over local files.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

/// Hash a local file, reading it in chunks rather than loading it whole.
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn hashes_match_in_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let data = b"hello deltaglider";
        let mut f = File::create(&path).await.unwrap();
        f.write_all(data).await.unwrap();
        f.flush().await.unwrap();

        let expected = hex::encode(Sha256::digest(data));
        let actual = sha256_file(&path).await.unwrap();
        assert_eq!(actual, expected);
    }
}
