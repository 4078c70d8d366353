//! Fixed byte-order integers.
//!
//! Each wrapper holds the raw bytes of an integer as they sit in a blob or in guest memory.
//! [EndianData::value] converts to the host's order and [EndianData::from_value] goes back.
//! Wrappers are only ever built from slices or values, never by casting pointers into a blob.

/// Big-endian `u32`, the cell type of flattened trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigEndian32(u32);

/// Big-endian `u64`, used by reservation entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigEndian64(u64);

/// Little-endian `u32`, the layout of ARM instruction words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LittleEndian32(u32);

/// An integer stored in a fixed byte order.
pub trait EndianData<T>: Copy {
    /// Stored width in bytes.
    const WIDTH: usize;

    fn value(&self) -> T;

    /// Reads the leading [Self::WIDTH] bytes. [None] when `bytes` is shorter.
    fn from_slice(bytes: &[u8]) -> Option<Self>;

    fn from_value(value: T) -> Self;

    fn to_bytes(&self) -> Vec<u8>;
}

macro_rules! endian_wrapper {
    ($wrapper:ident, $int:ty, $from:ident, $to:ident) => {
        impl EndianData<$int> for $wrapper {
            const WIDTH: usize = size_of::<$int>();

            #[inline]
            fn value(&self) -> $int {
                <$int>::$from(self.0)
            }

            fn from_slice(bytes: &[u8]) -> Option<Self> {
                let raw: [u8; size_of::<$int>()] = bytes.get(..Self::WIDTH)?.try_into().ok()?;
                Some(Self(<$int>::from_ne_bytes(raw)))
            }

            #[inline]
            fn from_value(value: $int) -> Self {
                Self(value.$to())
            }

            fn to_bytes(&self) -> Vec<u8> {
                self.0.to_ne_bytes().to_vec()
            }
        }
    };
}

endian_wrapper!(BigEndian32, u32, from_be, to_be);
endian_wrapper!(BigEndian64, u64, from_be, to_be);
endian_wrapper!(LittleEndian32, u32, from_le, to_le);

/// Decodes `bytes` as consecutive `D` values. A trailing partial element is dropped.
pub fn read_array<T, D: EndianData<T>>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(D::WIDTH)
        .filter_map(D::from_slice)
        .map(|d| d.value())
        .collect()
}
