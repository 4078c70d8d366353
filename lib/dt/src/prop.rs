use utils::endian::{BigEndian32, BigEndian64, EndianData, read_array};

/// A named, untyped property value. Interpretation (string, cell, cell array) is contextual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: Box<str>,
    pub data: Box<[u8]>,
}

impl Property {
    pub fn new(name: impl AsRef<str>, data: impl Into<Box<[u8]>>) -> Property {
        Property {
            name: Box::from(name.as_ref()),
            data: data.into(),
        }
    }

    /// A property without a value, used as a boolean flag.
    pub fn empty(name: impl AsRef<str>) -> Property {
        Property::new(name, Vec::new())
    }

    /// A NUL-terminated string property.
    pub fn from_string(name: impl AsRef<str>, value: &str) -> Property {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        Property::new(name, data)
    }

    /// A string-list property, each entry NUL-terminated.
    pub fn from_strlist(name: impl AsRef<str>, values: &[&str]) -> Property {
        let mut data = Vec::new();
        for value in values {
            data.extend_from_slice(value.as_bytes());
            data.push(0);
        }
        Property::new(name, data)
    }

    /// An array of big-endian 32-bit cells.
    pub fn from_cells(name: impl AsRef<str>, cells: &[u32]) -> Property {
        let data: Vec<u8> = cells
            .iter()
            .flat_map(|c| BigEndian32::from_value(*c).to_bytes())
            .collect();
        Property::new(name, data)
    }

    pub fn from_u32(name: impl AsRef<str>, value: u32) -> Property {
        Property::from_cells(name, &[value])
    }

    pub fn from_u64(name: impl AsRef<str>, value: u64) -> Property {
        Property::new(name, BigEndian64::from_value(value).to_bytes())
    }
}

impl Property {
    fn format_error(&self) -> PropertyError {
        PropertyError::InvalidPropFormat {
            name: self.name.to_string(),
            len: self.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn value_as_u32(&self) -> Result<u32, PropertyError> {
        BigEndian32::from_slice(&self.data)
            .map(|v| v.value())
            .ok_or_else(|| self.format_error())
    }

    pub fn value_as_u64(&self) -> Result<u64, PropertyError> {
        BigEndian64::from_slice(&self.data)
            .map(|v| v.value())
            .ok_or_else(|| self.format_error())
    }

    /// The `idx`-th 32-bit cell, if the property is long enough.
    pub fn cell(&self, idx: usize) -> Option<u32> {
        let start = idx.checked_mul(4)?;
        BigEndian32::from_slice(self.data.get(start..)?).map(|v| v.value())
    }

    /// All complete 32-bit cells; trailing bytes are ignored.
    pub fn value_as_cells(&self) -> Vec<u32> {
        read_array::<u32, BigEndian32>(&self.data)
    }

    pub fn value_as_str(&self) -> Result<&str, PropertyError> {
        let end = self
            .data
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.data.len());
        core::str::from_utf8(&self.data[..end]).map_err(|_| self.format_error())
    }

    pub fn value_as_strlist(&self) -> Result<Vec<&str>, PropertyError> {
        let mut data: &[u8] = &self.data;
        if let Some((0, rest)) = data.split_last() {
            data = rest;
        }
        if data.is_empty() {
            return Ok(vec![]);
        }
        data.split(|b| *b == 0)
            .map(|s| core::str::from_utf8(s).map_err(|_| self.format_error()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("property '{name}' has an invalid format ({len} bytes)")]
    InvalidPropFormat { name: String, len: usize },
    #[error("property '{name}' not found on '{path}'")]
    PropNotFound { path: String, name: String },
}
