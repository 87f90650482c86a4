use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::SerializeError;
use crate::value::Value;

/// Moves values in and out of exchange files.
///
/// The protocol never looks inside an exchange file; it only hands paths to
/// an implementation of this trait.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value, path: &Utf8Path) -> Result<(), SerializeError>;

    fn deserialize(&self, path: &Utf8Path) -> Result<Value, SerializeError>;
}

/// CBOR exchange files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborSerializer;

impl Serializer for CborSerializer {
    fn serialize(&self, value: &Value, path: &Utf8Path) -> Result<(), SerializeError> {
        let io_err = |e| SerializeError::Io(path.to_path_buf(), e);

        if let Some(dir) = path.parent().filter(|dir| !dir.as_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);

        ciborium::into_writer(value, &mut writer)
            .map_err(|e| SerializeError::Encode(path.to_path_buf(), e.to_string()))?;

        writer.flush().map_err(io_err)
    }

    fn deserialize(&self, path: &Utf8Path) -> Result<Value, SerializeError> {
        let file = File::open(path).map_err(|e| SerializeError::Io(path.to_path_buf(), e))?;
        let reader = BufReader::new(file);

        ciborium::from_reader(reader)
            .map_err(|e| SerializeError::Decode(path.to_path_buf(), e.to_string()))
    }
}

/// Strips the `location:` prefix the engine may put in front of a path.
pub fn exchange_path(raw: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(raw.rsplit(':').next().unwrap_or(raw))
}

/// Copies `from` over `to` byte for byte.
pub(crate) fn copy_file(from: &Utf8Path, to: &Utf8Path) -> std::io::Result<()> {
    if let Some(dir) = to.parent().filter(|dir| !dir.as_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    fs::copy(from, to).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_path() {
        assert_eq!(exchange_path("/tmp/d1v2"), Utf8PathBuf::from("/tmp/d1v2"));
        assert_eq!(
            exchange_path("worker01:/tmp/d1v2"),
            Utf8PathBuf::from("/tmp/d1v2")
        );
    }

    #[test]
    fn test_cbor_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/obj")).unwrap();

        let value = Value::Dict(vec![
            ("k".into(), Value::List(vec![1.into(), 2.5.into()])),
            ("p".into(), Value::persistent("id-1", Value::Null)),
        ]);

        CborSerializer.serialize(&value, &path).unwrap();
        assert_eq!(CborSerializer.deserialize(&path).unwrap(), value);
    }

    #[test]
    fn test_missing_file() {
        let err = CborSerializer
            .deserialize(Utf8Path::new("/nonexistent/taskwire/obj"))
            .unwrap_err();
        assert!(matches!(err, SerializeError::Io(..)));
    }

    #[test]
    fn test_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("garbage")).unwrap();
        fs::write(&path, [0xffu8, 0x00, 0x13]).unwrap();

        let err = CborSerializer.deserialize(&path).unwrap_err();
        assert!(matches!(err, SerializeError::Decode(..)));
    }
}
