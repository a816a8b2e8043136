use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::info;

pub async fn client() -> aws_sdk_s3::Client {
    let config = aws_config::load_from_env().await;
    aws_sdk_s3::Client::new(&config)
}

/// Object key for an exported file: `<prefix>/<file name>`, with `.gz`
/// appended when compressed.
pub fn object_key(prefix: &str, path: &Path, gzip: bool) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("no file name in {}", path.display()))?;
    let prefix = prefix.trim_matches('/');
    let mut key = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    };
    if gzip {
        key.push_str(".gz");
    }
    Ok(key)
}

pub fn gzip_bytes(contents: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(contents)?;
    Ok(encoder.finish()?)
}

/// Uploads local files to `bucket` under `prefix`, optionally gzip-compressed.
#[tracing::instrument(skip(client, paths), fields(files = paths.len()))]
pub async fn upload_files(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    prefix: &str,
    paths: &[std::path::PathBuf],
    gzip: bool,
) -> Result<()> {
    for path in paths {
        let contents =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let body = if gzip { gzip_bytes(&contents)? } else { contents };
        let key = object_key(prefix, path, gzip)?;

        client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("failed to upload s3://{bucket}/{key}"))?;

        info!(bucket, key = %key, "Uploaded to S3");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_object_key() {
        let path = Path::new("outputs_full/jams_full.json");
        assert_eq!(object_key("waze/2025", path, false).unwrap(), "waze/2025/jams_full.json");
        assert_eq!(object_key("", path, true).unwrap(), "jams_full.json.gz");
        assert_eq!(object_key("/x/", path, false).unwrap(), "x/jams_full.json");
    }

    #[test]
    fn test_gzip_bytes_decompresses() {
        let compressed = gzip_bytes(b"[1,2,3]").unwrap();
        let mut out = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "[1,2,3]");
    }
}
