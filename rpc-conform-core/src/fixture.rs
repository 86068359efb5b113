//! Fixture loading
//!
//! A test file holds an ordered sequence of `{request, response}` pairs.
//! The file extension selects the decoder from a small strategy table:
//! plain JSON, a single-member tar archive, or a gzip/bzip2 stream that
//! wraps either of those.

use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors from fixture loading
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Unsupported fixture file: {0}")]
    UnsupportedExtension(PathBuf),

    #[error("Archive {path} must contain exactly one member, found {count}")]
    ArchiveMembers { path: PathBuf, count: usize },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} holds no fixtures")]
    Empty(PathBuf),

    #[error("Fixture {index} of {path} has no expected response")]
    MissingResponse { path: PathBuf, index: usize },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FixtureError {
    /// Configuration errors end the run whatever the failure policy says
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FixtureError::UnsupportedExtension(_) | FixtureError::ArchiveMembers { .. }
        )
    }
}

/// One request/expected-response pair
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Fixture {
    pub request: Value,
    /// Stored expected response. Optional because cross-compare runs only
    /// need the request. A present `null` is `Some(Value::Null)`.
    #[serde(default, deserialize_with = "present")]
    pub response: Option<Value>,
}

/// Missing field stays `None` through `default`; anything present is kept
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Fixture {
    /// Method name used for routing. Batches route on their first call.
    pub fn method(&self) -> Option<&str> {
        let call = match &self.request {
            Value::Array(batch) => batch.first()?,
            single => single,
        };
        call.get("method")?.as_str()
    }
}

type Decoder = fn(&Path) -> Result<Vec<u8>, FixtureError>;

/// Extension → decoder. Add a row to support a new container format.
const DECODERS: &[(&str, Decoder)] = &[
    ("json", read_plain),
    ("tar", read_tar),
    ("gz", read_gzip),
    ("gzip", read_gzip),
    ("tgz", read_gzip),
    ("bz2", read_bzip2),
];

fn decoder_for(path: &Path) -> Option<Decoder> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    DECODERS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, decoder)| *decoder)
}

/// Whether the loader knows how to decode this file
pub fn is_fixture_file(path: &Path) -> bool {
    decoder_for(path).is_some()
}

/// Load every fixture of a test file, in container order
pub fn load(path: &Path) -> Result<Vec<Fixture>, FixtureError> {
    let decoder =
        decoder_for(path).ok_or_else(|| FixtureError::UnsupportedExtension(path.to_path_buf()))?;
    let bytes = decoder(path)?;
    let fixtures = parse_fixtures(path, &bytes)?;
    if fixtures.is_empty() {
        return Err(FixtureError::Empty(path.to_path_buf()));
    }
    debug!("Loaded {} fixture(s) from {}", fixtures.len(), path.display());
    Ok(fixtures)
}

fn parse_fixtures(path: &Path, bytes: &[u8]) -> Result<Vec<Fixture>, FixtureError> {
    let decode = |source| FixtureError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let document: Value = serde_json::from_slice(bytes).map_err(decode)?;
    match document {
        Value::Array(_) => serde_json::from_value::<Vec<Fixture>>(document).map_err(decode),
        single => serde_json::from_value::<Fixture>(single)
            .map(|fixture| vec![fixture])
            .map_err(decode),
    }
}

fn io_error(path: &Path) -> impl Fn(io::Error) -> FixtureError + '_ {
    move |source| FixtureError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn open(path: &Path) -> Result<BufReader<File>, FixtureError> {
    File::open(path).map(BufReader::new).map_err(io_error(path))
}

fn read_plain(path: &Path) -> Result<Vec<u8>, FixtureError> {
    std::fs::read(path).map_err(io_error(path))
}

fn read_tar(path: &Path) -> Result<Vec<u8>, FixtureError> {
    single_member(path, open(path)?)
}

fn read_gzip(path: &Path) -> Result<Vec<u8>, FixtureError> {
    let stream = flate2::read::GzDecoder::new(open(path)?);
    unwrap_stream(path, stream)
}

fn read_bzip2(path: &Path) -> Result<Vec<u8>, FixtureError> {
    let stream = bzip2::read::BzDecoder::new(open(path)?);
    unwrap_stream(path, stream)
}

/// A compressed stream carries either a tar archive or a bare document
fn unwrap_stream<R: Read>(path: &Path, mut stream: R) -> Result<Vec<u8>, FixtureError> {
    let mut payload = Vec::new();
    stream.read_to_end(&mut payload).map_err(io_error(path))?;

    if looks_like_tar(&payload) {
        single_member(path, payload.as_slice())
    } else {
        Ok(payload)
    }
}

fn looks_like_tar(payload: &[u8]) -> bool {
    payload.len() >= 262 && &payload[257..262] == b"ustar"
}

fn single_member<R: Read>(path: &Path, reader: R) -> Result<Vec<u8>, FixtureError> {
    let mut archive = tar::Archive::new(reader);
    let mut count = 0;
    let mut content = Vec::new();

    for entry in archive.entries().map_err(io_error(path))? {
        let mut entry = entry.map_err(io_error(path))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        count += 1;
        if count == 1 {
            entry.read_to_end(&mut content).map_err(io_error(path))?;
        }
    }

    if count != 1 {
        return Err(FixtureError::ArchiveMembers {
            path: path.to_path_buf(),
            count,
        });
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    const NET_VERSION: &str = r#"[{"request":{"jsonrpc":"2.0","method":"net_version","params":[],"id":1},"response":{"jsonrpc":"2.0","result":"5","id":1}}]"#;

    fn tar_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_load_plain_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.json");
        std::fs::write(&path, NET_VERSION).unwrap();

        let fixtures = load(&path).unwrap();
        assert_eq!(fixtures.len(), 1);
        assert_eq!(fixtures[0].method(), Some("net_version"));
        assert_eq!(fixtures[0].response, Some(json!({"jsonrpc":"2.0","result":"5","id":1})));
    }

    #[test]
    fn test_single_object_is_one_fixture() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.json");
        std::fs::write(&path, r#"{"request":{"method":"eth_chainId"}}"#).unwrap();

        let fixtures = load(&path).unwrap();
        assert_eq!(fixtures.len(), 1);
        assert!(fixtures[0].response.is_none());
    }

    #[test]
    fn test_null_response_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.json");
        std::fs::write(
            &path,
            r#"[{"request":{"method":"eth_x"},"response":null},{"request":{"method":"eth_y"}}]"#,
        )
        .unwrap();

        let fixtures = load(&path).unwrap();
        assert_eq!(fixtures[0].response, Some(Value::Null));
        assert_eq!(fixtures[1].response, None);
    }

    #[test]
    fn test_load_tar() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.tar");
        std::fs::write(&path, tar_bytes(&[("test_01.json", NET_VERSION.as_bytes())])).unwrap();

        let fixtures = load(&path).unwrap();
        assert_eq!(fixtures[0].method(), Some("net_version"));
    }

    #[test]
    fn test_tar_with_two_members_is_configuration_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.tar");
        let bytes = tar_bytes(&[
            ("a.json", NET_VERSION.as_bytes()),
            ("b.json", NET_VERSION.as_bytes()),
        ]);
        std::fs::write(&path, bytes).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, FixtureError::ArchiveMembers { count: 2, .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_gzip_wrapping_tar() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.tar.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(&tar_bytes(&[("test_01.json", NET_VERSION.as_bytes())]))
            .unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let fixtures = load(&path).unwrap();
        assert_eq!(fixtures[0].method(), Some("net_version"));
    }

    #[test]
    fn test_load_bzip2_bare_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.bz2");
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(NET_VERSION.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let fixtures = load(&path).unwrap();
        assert_eq!(fixtures.len(), 1);
    }

    #[test]
    fn test_malformed_content_is_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.json");
        std::fs::write(&path, "[{\"request\": ").unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, FixtureError::Decode { .. }));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_empty_container() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_01.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(load(&path), Err(FixtureError::Empty(_))));
    }

    #[test]
    fn test_unknown_extension() {
        assert!(!is_fixture_file(Path::new("README.md")));
        assert!(is_fixture_file(Path::new("test_07.JSON")));
        assert!(matches!(
            load(Path::new("notes.txt")),
            Err(FixtureError::UnsupportedExtension(_))
        ));
    }

    #[test]
    fn test_batch_routes_on_first_call() {
        let fixture = Fixture {
            request: json!([{"method": "engine_getPayloadV1"}, {"method": "eth_chainId"}]),
            response: None,
        };
        assert_eq!(fixture.method(), Some("engine_getPayloadV1"));
    }
}
