use crate::{
    parsers::{
        blend::{Block, BlockCatalog},
        field::FieldInfo,
    },
    runtime::{layout::StructLayout, DecodeError},
};
use linked_hash_map::LinkedHashMap;
use std::{
    fmt::{self, Debug, Display, Formatter},
    num::NonZeroU64,
};

/// A decoded field. Everything borrows from the `File` it was read from.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Fixed size arrays. Multi dimensional arrays nest, outermost dimension first.
    Array(Vec<Value<'a>>),
    Struct(StructValue<'a>),
    Pointer(Pointer<'a>),
    /// Bytes of a type the decoder can't interpret.
    Raw(&'a [u8]),
}

impl<'a> Value<'a> {
    /// Any integer that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v.into()),
            Value::U8(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
            Value::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v.into()),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Reads a `char` array as a NUL terminated string. Invalid UTF-8 is replaced.
    pub fn as_str(&self) -> Option<String> {
        let items = match self {
            Value::Array(items) => items,
            _ => return None,
        };

        let mut bytes = Vec::with_capacity(items.len());
        for item in items {
            let byte = match *item {
                Value::U8(b) => b,
                Value::I8(b) => b as u8,
                _ => return None,
            };
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }

        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn as_struct(&self) -> Option<&StructValue<'a>> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<Pointer<'a>> {
        match self {
            Value::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value<'a>]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&'a [u8]> {
        match *self {
            Value::Raw(data) => Some(data),
            _ => None,
        }
    }
}

/// One decoded struct instance: its fields by name, in storage order.
#[derive(Clone)]
pub struct StructValue<'a> {
    pub(crate) layout: &'a StructLayout,
    pub(crate) fields: LinkedHashMap<&'a str, Value<'a>>,
}

impl<'a> PartialEq for StructValue<'a> {
    fn eq(&self, other: &StructValue<'a>) -> bool {
        self.layout.struct_index == other.layout.struct_index && self.fields == other.fields
    }
}

impl<'a> StructValue<'a> {
    pub fn type_name(&self) -> &'a str {
        &self.layout.type_name
    }

    pub fn layout(&self) -> &'a StructLayout {
        self.layout
    }

    pub fn get(&self, name: &str) -> Option<&Value<'a>> {
        self.fields.get(name)
    }

    /// Follows nested struct fields, e.g. `"id.name"`. Pointers are not followed.
    pub fn get_path(&self, path: &str) -> Option<&Value<'a>> {
        let mut parts = path.split('.');
        let mut value = self.get(parts.next()?)?;
        for part in parts {
            value = value.as_struct()?.get(part)?;
        }
        Some(value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'a str, &Value<'a>)> + '_ {
        self.fields.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'a> Debug for StructValue<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut s = f.debug_struct(self.type_name());
        for (name, value) in &self.fields {
            s.field(name, value);
        }
        s.finish()
    }
}

impl<'a> Display for StructValue<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        fmt_struct(f, self, 0)
    }
}

fn fmt_struct(f: &mut Formatter, value: &StructValue, ident: usize) -> fmt::Result {
    let ident_str: String = " ".repeat(4 * ident);

    writeln!(f, "{} {{", value.type_name())?;

    for field in value.layout.fields.iter().filter(|t| !t.name.starts_with("_pad")) {
        let field_value = match value.get(&field.name) {
            Some(v) => v,
            None => continue,
        };

        write!(f, "{}    {}: ", ident_str, field.name)?;
        match (&field.info, field_value) {
            (_, Value::Struct(inner)) => {
                fmt_struct(f, inner, ident + 1)?;
            }
            (FieldInfo::ValueArray { .. }, array) if field.type_name == "char" => {
                let s = array.as_str().unwrap_or_default();
                writeln!(f, "char{} = {:?};", fmt_dimensions(field.info.dimensions()), s)?;
            }
            (FieldInfo::FnPointer, v) => {
                writeln!(f, "fn() = {};", ValueDisplay(v))?;
            }
            (FieldInfo::Pointer { indirection_count }, v)
            | (FieldInfo::PointerArray { indirection_count, .. }, v) => {
                writeln!(
                    f,
                    "{}{}{} = {};",
                    "*".repeat(*indirection_count),
                    field.type_name,
                    fmt_dimensions(field.info.dimensions()),
                    ValueDisplay(v)
                )?;
            }
            (_, v) => {
                writeln!(
                    f,
                    "{}{} = {};",
                    field.type_name,
                    fmt_dimensions(field.info.dimensions()),
                    ValueDisplay(v)
                )?;
            }
        }
    }

    writeln!(f, "{}}}", ident_str)
}

fn fmt_dimensions(dimensions: &[usize]) -> String {
    dimensions.iter().map(|d| format!("[{}]", d)).collect()
}

/// Single line rendering of leaf values and arrays.
struct ValueDisplay<'v, 'a>(&'v Value<'a>);

impl<'v, 'a> Display for ValueDisplay<'v, 'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.0 {
            Value::I8(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{:.3}", v),
            Value::F64(v) => write!(f, "{:.3}", v),
            Value::Pointer(p) => write!(f, "{}", p),
            Value::Raw(data) => write!(f, "<{} bytes>", data.len()),
            Value::Struct(s) => write!(f, "{} {{..}}", s.type_name()),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ValueDisplay(item))?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A pointer read from a record. It keeps a reference to the catalog so it can be resolved later.
#[derive(Clone, Copy)]
pub struct Pointer<'a> {
    pub address: u64,
    /// Type of the pointee as declared by the field, an index into `Dna::types`.
    pub type_index: usize,
    /// Number of `*` in the declaration. `**mat` has 2.
    pub indirection: usize,
    pub is_function: bool,
    pub(crate) catalog: &'a BlockCatalog,
}

impl<'a> Pointer<'a> {
    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// Looks up the block the pointer refers to. Null pointers never touch the catalog.
    pub fn resolve(&self) -> Resolved<'a> {
        self.catalog.resolve(self.address)
    }
}

impl<'a> PartialEq for Pointer<'a> {
    fn eq(&self, other: &Pointer<'a>) -> bool {
        self.address == other.address
            && self.type_index == other.type_index
            && self.indirection == other.indirection
            && self.is_function == other.is_function
    }
}

impl<'a> Debug for Pointer<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Pointer")
            .field("address", &format_args!("{:#x}", self.address))
            .field("type_index", &self.type_index)
            .field("indirection", &self.indirection)
            .finish()
    }
}

impl<'a> Display for Pointer<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "@{:#x}", self.address)
        }
    }
}

/// Outcome of a pointer lookup.
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    Null,
    Block(&'a Block),
    /// Non zero address that no block starts at.
    Dangling(NonZeroU64),
}

impl<'a> Resolved<'a> {
    /// `Ok(None)` for null, an error for dangling pointers.
    pub fn into_result(self) -> Result<Option<&'a Block>, DecodeError> {
        match self {
            Resolved::Null => Ok(None),
            Resolved::Block(block) => Ok(Some(block)),
            Resolved::Dangling(address) => Err(DecodeError::DanglingPointer { address }),
        }
    }
}

impl BlockCatalog {
    /// Resolves a raw address against the catalog.
    pub fn resolve(&self, address: u64) -> Resolved<'_> {
        match NonZeroU64::new(address) {
            None => Resolved::Null,
            Some(non_zero) => match self.by_address(address) {
                Some(block) => Resolved::Block(block),
                None => Resolved::Dangling(non_zero),
            },
        }
    }
}
