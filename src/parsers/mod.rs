pub mod blend;
pub mod dna;
pub mod field;
pub mod primitive;

#[doc(hidden)]
pub mod test_support;

use crate::parsers::blend::BlockCode;
use nom::{
    error::{ErrorKind, ParseError},
    number::Endianness as NomEndianness,
    Err, IResult,
};
use std::{io, num::NonZeroU64};
use thiserror::Error;

pub(crate) type Result<'a, T> = IResult<&'a [u8], T, BlendParseError>;

/// Size of a pointer on the machine used to create the .blend file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PointerSize {
    Bits32,
    Bits64,
}

impl PointerSize {
    /// Returns the pointer size in bytes.
    pub fn bytes_num(self) -> usize {
        match self {
            PointerSize::Bits32 => 4,
            PointerSize::Bits64 => 8,
        }
    }

    /// The header byte announcing this pointer size.
    pub fn marker(self) -> u8 {
        match self {
            PointerSize::Bits32 => b'_',
            PointerSize::Bits64 => b'-',
        }
    }
}

/// Endianness of the machine used to create the .blend file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// The header byte announcing this byte order.
    pub fn marker(self) -> u8 {
        match self {
            Endianness::Little => b'v',
            Endianness::Big => b'V',
        }
    }
}

impl From<Endianness> for NomEndianness {
    fn from(e: Endianness) -> NomEndianness {
        match e {
            Endianness::Little => NomEndianness::Little,
            Endianness::Big => NomEndianness::Big,
        }
    }
}

/// Errors that can happen while reading the header, the block catalog or the DNA of a .blend file.
/// Offsets are absolute positions in the file, except for `SchemaCorrupt` where they are relative
/// to the start of the DNA block payload.
#[derive(Debug, Error)]
pub enum BlendParseError {
    #[error("parse error ({kind:?}) with {remaining} bytes left")]
    NomError {
        kind: ErrorKind,
        remaining: usize,
        other: Option<Box<BlendParseError>>,
    },
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    /// Returned when a parser ran out of input without a more specific diagnosis.
    #[error("not enough data")]
    NotEnoughData,
    /// The file is shorter than the 12 byte header.
    #[error("malformed header: expected 12 bytes, found {available}")]
    MalformedHeader { available: usize },
    /// The file doesn't start with `b"BLENDER"`. Compressed files end up here too.
    #[error("invalid identifier: expected \"BLENDER\", found {found:?}")]
    InvalidIdentifier { found: Vec<u8> },
    #[error("invalid header field '{field}' at offset {offset}: found byte {found:#04x}")]
    InvalidHeaderField {
        offset: usize,
        field: &'static str,
        found: u8,
    },
    /// A block header declares more payload bytes than the file holds.
    #[error("block '{code}' at offset {offset} declares {declared} bytes but only {available} remain")]
    TruncatedBlock {
        offset: usize,
        code: BlockCode,
        declared: usize,
        available: usize,
    },
    /// The file ended before the terminal `ENDB` block.
    #[error("file ends at offset {offset} without an ENDB block (last block: {last_code:?})")]
    TruncatedFile {
        offset: usize,
        last_code: Option<BlockCode>,
    },
    /// Two blocks claim the same memory address.
    #[error("block at offset {offset} reuses memory address {address:#x} of block at offset {first_offset}")]
    CorruptCatalog {
        offset: usize,
        first_offset: usize,
        address: NonZeroU64,
    },
    #[error("no DNA1 block found")]
    MissingSchema,
    #[error("corrupt DNA at payload offset {offset}: {reason}")]
    SchemaCorrupt { offset: usize, reason: String },
}

impl BlendParseError {
    pub(crate) fn schema(offset: usize, reason: impl Into<String>) -> Self {
        BlendParseError::SchemaCorrupt {
            offset,
            reason: reason.into(),
        }
    }
}

impl ParseError<&[u8]> for BlendParseError {
    fn from_error_kind(input: &[u8], kind: ErrorKind) -> Self {
        BlendParseError::NomError {
            kind,
            remaining: input.len(),
            other: None,
        }
    }

    fn append(input: &[u8], kind: ErrorKind, other: Self) -> Self {
        BlendParseError::NomError {
            kind,
            remaining: input.len(),
            other: Some(Box::new(other)),
        }
    }
}

/// Unwraps the result of a top level parser into its value or its error.
pub(crate) fn finish<T>(res: Result<'_, T>) -> std::result::Result<T, BlendParseError> {
    match res {
        Ok((_, value)) => Ok(value),
        Err(Err::Failure(e)) | Err(Err::Error(e)) => Err(e),
        Err(Err::Incomplete(..)) => Err(BlendParseError::NotEnoughData),
    }
}
