//! Collection manifests: one `<type> <path> <content-type>` line per element.

use std::fmt;
use std::fs;

use camino::Utf8Path;

use crate::core::DataType;
use crate::error::ManifestError;

/// One line of a collection manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub data_type: DataType,
    /// Exchange file of the element, or its literal for scalar types.
    pub value: String,
    pub content_type: String,
}

impl ManifestEntry {
    pub fn new(data_type: DataType, value: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            data_type,
            value: value.into(),
            content_type: content_type.into(),
        }
    }

    fn parse(number: usize, line: &str) -> Result<Self, ManifestError> {
        let fields: Vec<&str> = line.split_whitespace().collect();

        let [data_type, value, content_type] = fields[..] else {
            return Err(ManifestError::Fields {
                line: number,
                found: fields.len(),
            });
        };

        Ok(Self::new(data_type.parse()?, value, content_type))
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.data_type, self.value, self.content_type)
    }
}

/// Parses manifest text, skipping blank lines. Line numbers start at 1.
pub fn parse(text: &str) -> Result<Vec<ManifestEntry>, ManifestError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| ManifestEntry::parse(i + 1, line))
        .collect()
}

/// Reads the manifest of a collection.
pub fn read(path: &Utf8Path) -> Result<Vec<ManifestEntry>, ManifestError> {
    parse(&fs::read_to_string(path)?)
}

/// Reads the manifest of a keyed collection: a key line followed by a value
/// line for every entry.
pub fn read_pairs(path: &Utf8Path) -> Result<Vec<(ManifestEntry, ManifestEntry)>, ManifestError> {
    let entries = read(path)?;

    if entries.len() % 2 != 0 {
        return Err(ManifestError::DanglingKey(entries.len()));
    }

    let mut pairs = Vec::with_capacity(entries.len() / 2);
    let mut iter = entries.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((key, value));
    }

    Ok(pairs)
}

/// Writes a collection manifest.
pub fn write<'a>(
    path: &Utf8Path,
    entries: impl IntoIterator<Item = &'a ManifestEntry>,
) -> Result<(), ManifestError> {
    let mut text = String::new();
    for entry in entries {
        text.push_str(&entry.to_string());
        text.push('\n');
    }

    if let Some(dir) = path.parent().filter(|dir| !dir.as_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, text)?;
    Ok(())
}
