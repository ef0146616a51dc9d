use super::{Endianness, PointerSize, Result};
use nom::number::complete as number;

/// Reads a `u16` in the file's byte order.
pub(crate) fn read_u16(input: &[u8], endianness: Endianness) -> Result<'_, u16> {
    number::u16(endianness.into())(input)
}

/// Reads a `u32` in the file's byte order.
pub(crate) fn read_u32(input: &[u8], endianness: Endianness) -> Result<'_, u32> {
    number::u32(endianness.into())(input)
}

/// Reads a pointer-sized address, widened to `u64`.
pub(crate) fn read_address(
    input: &[u8],
    endianness: Endianness,
    pointer_size: PointerSize,
) -> Result<'_, u64> {
    match pointer_size {
        PointerSize::Bits32 => {
            let (input, address) = read_u32(input, endianness)?;
            Ok((input, u64::from(address)))
        }
        PointerSize::Bits64 => number::u64(endianness.into())(input),
    }
}

/// A primitive Blender type that can be read straight from a slice of block data.
pub trait BlendPrimitive: Sized {
    /// Parses `Self` from the start of `data`. Returns `None` if `data` is too short.
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self>;
    /// The name the DNA uses for this type.
    fn blender_name() -> &'static str;
}

impl BlendPrimitive for u8 {
    fn parse(data: &[u8], _endianness: Endianness) -> Option<Self> {
        data.first().copied()
    }
    fn blender_name() -> &'static str {
        "char"
    }
}

impl BlendPrimitive for i8 {
    fn parse(data: &[u8], _endianness: Endianness) -> Option<Self> {
        data.first().map(|b| *b as i8)
    }
    fn blender_name() -> &'static str {
        "int8_t"
    }
}

impl BlendPrimitive for u16 {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
        number::u16::<_, ()>(endianness.into())(data).ok().map(|(_, v)| v)
    }
    fn blender_name() -> &'static str {
        "ushort"
    }
}

impl BlendPrimitive for i16 {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
        number::i16::<_, ()>(endianness.into())(data).ok().map(|(_, v)| v)
    }
    fn blender_name() -> &'static str {
        "short"
    }
}

impl BlendPrimitive for u32 {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
        number::u32::<_, ()>(endianness.into())(data).ok().map(|(_, v)| v)
    }
    fn blender_name() -> &'static str {
        "uint"
    }
}

impl BlendPrimitive for i32 {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
        number::i32::<_, ()>(endianness.into())(data).ok().map(|(_, v)| v)
    }
    fn blender_name() -> &'static str {
        "int"
    }
}

impl BlendPrimitive for f32 {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
        number::f32::<_, ()>(endianness.into())(data).ok().map(|(_, v)| v)
    }
    fn blender_name() -> &'static str {
        "float"
    }
}

impl BlendPrimitive for f64 {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
        number::f64::<_, ()>(endianness.into())(data).ok().map(|(_, v)| v)
    }
    fn blender_name() -> &'static str {
        "double"
    }
}

impl BlendPrimitive for u64 {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
        number::u64::<_, ()>(endianness.into())(data).ok().map(|(_, v)| v)
    }
    fn blender_name() -> &'static str {
        "uint64_t"
    }
}

impl BlendPrimitive for i64 {
    fn parse(data: &[u8], endianness: Endianness) -> Option<Self> {
        number::i64::<_, ()>(endianness.into())(data).ok().map(|(_, v)| v)
    }
    fn blender_name() -> &'static str {
        "int64_t"
    }
}
