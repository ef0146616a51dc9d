use crate::{
    parsers::{
        dna::Dna,
        field::{parse_field, FieldInfo},
        primitive::BlendPrimitive,
        BlendParseError, Endianness, PointerSize,
    },
    runtime::value::Value,
};
use std::collections::HashMap;

/// Primitive types a field can hold, named after the Rust type they decode to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Primitive {
    /// Maps a DNA type to a primitive. The width comes from the type table rather than from the name so that
    /// `long` follows whatever the writing machine used. `char` is read as unsigned, like strings are.
    pub fn from_type(name: &str, bytes_len: usize) -> Option<Primitive> {
        let signed = match name {
            "char" | "uchar" | "uint8_t" | "bool" | "ushort" | "uint16_t" | "uint" | "uint32_t"
            | "ulong" | "uint64_t" => false,
            "int8_t" | "short" | "int16_t" | "int" | "int32_t" | "long" | "int64_t" => true,
            "float" if bytes_len == 4 => return Some(Primitive::F32),
            "double" if bytes_len == 8 => return Some(Primitive::F64),
            _ => return None,
        };

        match (bytes_len, signed) {
            (1, true) => Some(Primitive::I8),
            (1, false) => Some(Primitive::U8),
            (2, true) => Some(Primitive::I16),
            (2, false) => Some(Primitive::U16),
            (4, true) => Some(Primitive::I32),
            (4, false) => Some(Primitive::U32),
            (8, true) => Some(Primitive::I64),
            (8, false) => Some(Primitive::U64),
            _ => None,
        }
    }

    pub(crate) fn decode<'a>(self, data: &[u8], endianness: Endianness) -> Option<Value<'a>> {
        Some(match self {
            Primitive::I8 => Value::I8(i8::parse(data, endianness)?),
            Primitive::U8 => Value::U8(u8::parse(data, endianness)?),
            Primitive::I16 => Value::I16(i16::parse(data, endianness)?),
            Primitive::U16 => Value::U16(u16::parse(data, endianness)?),
            Primitive::I32 => Value::I32(i32::parse(data, endianness)?),
            Primitive::U32 => Value::U32(u32::parse(data, endianness)?),
            Primitive::I64 => Value::I64(i64::parse(data, endianness)?),
            Primitive::U64 => Value::U64(u64::parse(data, endianness)?),
            Primitive::F32 => Value::F32(f32::parse(data, endianness)?),
            Primitive::F64 => Value::F64(f64::parse(data, endianness)?),
        })
    }
}

/// What a single element of a field is made of. For pointer fields this describes the pointee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Primitive(Primitive),
    /// A struct, by its index in `Dna::structs`.
    Struct(usize),
    /// `void` and any other type the decoder has no reading for; kept as raw bytes.
    Opaque,
}

/// Represents a field inside a struct. The data `FieldTemplate` keeps is used to interpret the raw bytes of the block.
#[derive(Debug, Clone)]
pub struct FieldTemplate {
    /// The bare field name, without pointer or array syntax.
    pub name: String,
    pub info: FieldInfo,
    /// The index of this field's type inside the `Dna::types` array.
    pub type_index: usize,
    /// The type name of this field. Used for pretty printing.
    pub type_name: String,
    pub element: ElementKind,
    /// Bytes per element. Pointer sized for pointer fields.
    pub element_len: usize,
    /// The index of the data in the instance owned by this field.
    pub data_start: usize,
    /// The length in bytes of the data in the instance owned by this field.
    pub data_len: usize,
}

/// The decoding plan for one struct: every field with its resolved offset and length.
#[derive(Debug, Clone)]
pub struct StructLayout {
    pub struct_index: usize,
    pub type_index: usize,
    pub type_name: String,
    /// Size in bytes of one instance.
    pub size: usize,
    /// Fields in storage order.
    pub fields: Vec<FieldTemplate>,
    field_index: HashMap<String, usize>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldTemplate> {
        self.field_index.get(name).map(|i| &self.fields[*i])
    }
}

#[derive(Clone, Copy, PartialEq)]
enum SizeState {
    Pending,
    Visiting,
    Done(usize),
}

struct LayoutBuilder<'a> {
    dna: &'a Dna,
    pointer_size: PointerSize,
    sizes: Vec<SizeState>,
    declarations: HashMap<usize, (String, FieldInfo)>,
}

impl<'a> LayoutBuilder<'a> {
    fn declaration(&mut self, name_index: usize) -> Result<(String, FieldInfo), BlendParseError> {
        if let Some(declaration) = self.declarations.get(&name_index) {
            return Ok(declaration.clone());
        }

        let full_name = &self.dna.names[name_index];
        let (name, info) = parse_field(full_name).map_err(|e| {
            BlendParseError::schema(0, format!("field name '{}': {}", full_name, e))
        })?;
        let declaration = (name.to_string(), info);
        self.declarations.insert(name_index, declaration.clone());

        Ok(declaration)
    }

    fn element(&self, type_index: usize) -> ElementKind {
        if let Some((struct_index, _)) = self.dna.struct_for_type(type_index) {
            return ElementKind::Struct(struct_index);
        }
        let dna_type = &self.dna.types[type_index];
        match Primitive::from_type(&dna_type.name, dna_type.bytes_len) {
            Some(primitive) => ElementKind::Primitive(primitive),
            None => ElementKind::Opaque,
        }
    }

    /// Size of one instance of a struct, summing its fields. Structs can't contain themselves by value, so
    /// meeting a struct that is still being measured means the DNA is corrupt.
    fn struct_size(&mut self, struct_index: usize) -> Result<usize, BlendParseError> {
        match self.sizes[struct_index] {
            SizeState::Done(size) => return Ok(size),
            SizeState::Visiting => {
                return Err(BlendParseError::schema(
                    0,
                    format!(
                        "struct '{}' contains itself by value",
                        self.dna.types[self.dna.structs[struct_index].type_index].name
                    ),
                ))
            }
            SizeState::Pending => {}
        }
        self.sizes[struct_index] = SizeState::Visiting;

        let mut size = 0;
        for i in 0..self.dna.structs[struct_index].fields.len() {
            let field = &self.dna.structs[struct_index].fields[i];
            let (type_index, name_index) = (field.type_index, field.name_index);
            let (_, info) = self.declaration(name_index)?;
            let field_len = self.field_len(type_index, &info)?.1;
            size = add_len(size, field_len, &self.dna.types[self.dna.structs[struct_index].type_index].name)?;
        }

        self.sizes[struct_index] = SizeState::Done(size);
        Ok(size)
    }

    /// Returns the element length and the total length of a field.
    fn field_len(
        &mut self,
        type_index: usize,
        info: &FieldInfo,
    ) -> Result<(usize, usize), BlendParseError> {
        let element_len = if info.is_pointer() {
            self.pointer_size.bytes_num()
        } else {
            match self.element(type_index) {
                ElementKind::Struct(struct_index) => self.struct_size(struct_index)?,
                _ => self.dna.types[type_index].bytes_len,
            }
        };

        let len = element_len.checked_mul(info.len()).ok_or_else(|| {
            BlendParseError::schema(0, format!("array of {} elements is too large", info.len()))
        })?;
        Ok((element_len, len))
    }

    fn layout(&mut self, struct_index: usize, strict_sizes: bool) -> Result<StructLayout, BlendParseError> {
        let dna_struct = &self.dna.structs[struct_index];
        let dna_type = &self.dna.types[dna_struct.type_index];

        let mut fields = Vec::with_capacity(dna_struct.fields.len());
        let mut field_index = HashMap::with_capacity(dna_struct.fields.len());
        let mut data_start = 0;

        for (position, field) in dna_struct.fields.iter().enumerate() {
            let (mut name, info) = self.declaration(field.name_index)?;
            let (element_len, data_len) = self.field_len(field.type_index, &info)?;

            if field_index.contains_key(&name) {
                tracing::debug!(type_name = %dna_type.name, field = %name, "duplicate field name");
                name = format!("{}#{}", name, position);
            }
            field_index.insert(name.clone(), fields.len());

            fields.push(FieldTemplate {
                name,
                info,
                type_index: field.type_index,
                type_name: self.dna.types[field.type_index].name.clone(),
                element: self.element(field.type_index),
                element_len,
                data_start,
                data_len,
            });

            data_start = add_len(data_start, data_len, &dna_type.name)?;
        }

        if dna_type.bytes_len != 0 && dna_type.bytes_len != data_start {
            if strict_sizes {
                return Err(BlendParseError::schema(
                    0,
                    format!(
                        "struct '{}' fields add up to {} bytes, the type table says {}",
                        dna_type.name, data_start, dna_type.bytes_len
                    ),
                ));
            }
            tracing::warn!(
                type_name = %dna_type.name,
                fields = data_start,
                table = dna_type.bytes_len,
                "struct size disagrees with the type table, using the field sum"
            );
        }

        Ok(StructLayout {
            struct_index,
            type_index: dna_struct.type_index,
            type_name: dna_type.name.clone(),
            size: data_start,
            fields,
            field_index,
        })
    }
}

fn add_len(total: usize, len: usize, type_name: &str) -> Result<usize, BlendParseError> {
    total
        .checked_add(len)
        .ok_or_else(|| BlendParseError::schema(0, format!("struct '{}' is too large", type_name)))
}

/// Resolves the layout of every struct in the DNA, in `Dna::structs` order.
pub fn build_layouts(
    dna: &Dna,
    pointer_size: PointerSize,
    strict_sizes: bool,
) -> Result<Vec<StructLayout>, BlendParseError> {
    let mut builder = LayoutBuilder {
        dna,
        pointer_size,
        sizes: vec![SizeState::Pending; dna.structs.len()],
        declarations: HashMap::new(),
    };

    (0..dna.structs.len())
        .map(|struct_index| builder.layout(struct_index, strict_sizes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::DnaBuilder;

    fn dna(builder: DnaBuilder) -> Dna {
        Dna::parse(&builder.build(Endianness::Little), Endianness::Little).unwrap()
    }

    fn sample() -> DnaBuilder {
        DnaBuilder {
            names: vec!["*next", "*prev", "name[8]", "loc[3]", "link", "flag", "mat[2][2]", "(*cb)()"],
            types: vec![("char", 1), ("float", 4), ("short", 2), ("Link", 16), ("Thing", 0)],
            structs: vec![
                (3, vec![(3, 0), (3, 1)]),
                (4, vec![(3, 4), (0, 2), (1, 3), (2, 5), (1, 6), (4, 0), (0, 7)]),
            ],
        }
    }

    #[test]
    fn offsets_follow_declaration_order() {
        let dna = dna(sample());
        let layouts = build_layouts(&dna, PointerSize::Bits64, true).unwrap();

        let link = &layouts[0];
        assert_eq!(link.size, 16);

        let thing = &layouts[1];
        let offsets: Vec<(&str, usize, usize)> = thing
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.data_start, f.data_len))
            .collect();
        assert_eq!(
            offsets,
            [
                ("link", 0, 16),
                ("name", 16, 8),
                ("loc", 24, 12),
                ("flag", 36, 2),
                ("mat", 38, 16),
                ("next", 54, 8),
                ("cb", 62, 8),
            ]
        );
        assert_eq!(thing.size, 70);
        assert_eq!(thing.field("link").unwrap().element, ElementKind::Struct(0));
        assert_eq!(
            thing.field("loc").unwrap().element,
            ElementKind::Primitive(Primitive::F32)
        );
        // A pointer's element describes the pointee.
        assert_eq!(thing.field("next").unwrap().element, ElementKind::Struct(1));
        assert_eq!(thing.field("next").unwrap().element_len, 8);
    }

    #[test]
    fn pointer_width_changes_layout() {
        let dna = dna(sample());
        let layouts = build_layouts(&dna, PointerSize::Bits32, false).unwrap();
        assert_eq!(layouts[0].size, 8);
        assert_eq!(layouts[1].size, 8 + 8 + 12 + 2 + 16 + 4 + 4);
    }

    #[test]
    fn strict_sizes() {
        let mut builder = sample();
        builder.types[3] = ("Link", 12);
        let dna = dna(builder);

        assert!(build_layouts(&dna, PointerSize::Bits64, false).is_ok());
        assert!(matches!(
            build_layouts(&dna, PointerSize::Bits64, true),
            Err(BlendParseError::SchemaCorrupt { .. })
        ));
    }

    #[test]
    fn self_containing_struct() {
        let dna = dna(DnaBuilder {
            names: vec!["inner"],
            types: vec![("Loop", 0)],
            structs: vec![(0, vec![(0, 0)])],
        });

        match build_layouts(&dna, PointerSize::Bits64, false) {
            Err(BlendParseError::SchemaCorrupt { reason, .. }) => {
                assert!(reason.contains("contains itself"), "{}", reason)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn oversized_structs() {
        let names = vec!["a[9223372036854775807]", "b[9223372036854775807]", "c[4]", "huge"];

        // Fields that add up past usize::MAX.
        let flat = dna(DnaBuilder {
            names: names.clone(),
            types: vec![("char", 1), ("Huge", 0)],
            structs: vec![(1, vec![(0, 0), (0, 1), (0, 2)])],
        });
        assert!(matches!(
            build_layouts(&flat, PointerSize::Bits64, false),
            Err(BlendParseError::SchemaCorrupt { .. })
        ));

        // The same struct reached through a field of another struct.
        let nested = dna(DnaBuilder {
            names,
            types: vec![("char", 1), ("Outer", 0), ("Huge", 0)],
            structs: vec![(1, vec![(2, 3)]), (2, vec![(0, 0), (0, 1), (0, 2)])],
        });
        assert!(matches!(
            build_layouts(&nested, PointerSize::Bits64, false),
            Err(BlendParseError::SchemaCorrupt { .. })
        ));
    }

    #[test]
    fn oversized_array_name() {
        let dna = dna(DnaBuilder {
            names: vec!["a[4294967295][4294967295][4294967295]"],
            types: vec![("char", 1), ("Thing", 0)],
            structs: vec![(1, vec![(0, 0)])],
        });
        match build_layouts(&dna, PointerSize::Bits64, false) {
            Err(BlendParseError::SchemaCorrupt { reason, .. }) => {
                assert!(reason.contains("too large"), "{}", reason)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn primitive_mapping() {
        assert_eq!(Primitive::from_type("char", 1), Some(Primitive::U8));
        assert_eq!(Primitive::from_type("short", 2), Some(Primitive::I16));
        assert_eq!(Primitive::from_type("long", 4), Some(Primitive::I32));
        assert_eq!(Primitive::from_type("uint64_t", 8), Some(Primitive::U64));
        assert_eq!(Primitive::from_type("double", 8), Some(Primitive::F64));
        assert_eq!(Primitive::from_type("void", 0), None);
        assert_eq!(Primitive::from_type("Object", 1200), None);
    }
}
