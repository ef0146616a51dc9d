use crate::{
    parsers::{
        blend::{Block, BlockCatalog},
        field::FieldInfo,
        primitive::read_address,
        Endianness, PointerSize,
    },
    runtime::{
        layout::{ElementKind, FieldTemplate, StructLayout},
        value::{Pointer, StructValue, Value},
        DecodeError,
    },
};
use linked_hash_map::LinkedHashMap;

/// Everything needed to turn bytes into values. Cheap to copy.
#[derive(Clone, Copy)]
pub(crate) struct DecodeContext<'a> {
    pub layouts: &'a [StructLayout],
    pub catalog: &'a BlockCatalog,
    pub endianness: Endianness,
    pub pointer_size: PointerSize,
}

impl<'a> DecodeContext<'a> {
    /// Decodes one instance from the start of `data`. Returns `None` if `data` is shorter than the layout.
    pub fn instance(&self, layout: &'a StructLayout, data: &'a [u8]) -> Option<StructValue<'a>> {
        let data = data.get(..layout.size)?;

        let mut fields = LinkedHashMap::with_capacity(layout.fields.len());
        for field in &layout.fields {
            let bytes = data.get(field.data_start..field.data_start + field.data_len)?;
            let value = self.array(field, field.info.dimensions(), bytes)?;
            fields.insert(field.name.as_str(), value);
        }

        Some(StructValue { layout, fields })
    }

    fn array(&self, field: &'a FieldTemplate, dimensions: &[usize], data: &'a [u8]) -> Option<Value<'a>> {
        let (len, inner) = match dimensions.split_first() {
            Some((len, inner)) => (*len, inner),
            None => return self.element(field, data),
        };
        if len == 0 {
            return Some(Value::Array(Vec::new()));
        }

        let stride = inner
            .iter()
            .try_fold(field.element_len, |stride, dimension| stride.checked_mul(*dimension))?;
        (0..len)
            .map(|i| {
                let start = i.checked_mul(stride)?;
                self.array(field, inner, data.get(start..start.checked_add(stride)?)?)
            })
            .collect::<Option<Vec<_>>>()
            .map(Value::Array)
    }

    fn element(&self, field: &'a FieldTemplate, data: &'a [u8]) -> Option<Value<'a>> {
        if field.info.is_pointer() {
            let indirection = match field.info {
                FieldInfo::Pointer { indirection_count }
                | FieldInfo::PointerArray { indirection_count, .. } => indirection_count,
                _ => 1,
            };
            let address = self.address(data)?;
            return Some(Value::Pointer(Pointer {
                address,
                type_index: field.type_index,
                indirection,
                is_function: field.info == FieldInfo::FnPointer,
                catalog: self.catalog,
            }));
        }

        match field.element {
            ElementKind::Primitive(primitive) => primitive.decode(data, self.endianness),
            ElementKind::Struct(struct_index) => {
                let layout = self.layouts.get(struct_index)?;
                self.instance(layout, data).map(Value::Struct)
            }
            ElementKind::Opaque => Some(Value::Raw(data)),
        }
    }

    /// Reads one pointer sized address.
    pub fn address(&self, data: &[u8]) -> Option<u64> {
        read_address(data, self.endianness, self.pointer_size)
            .ok()
            .map(|(_, address)| address)
    }
}

/// Iterator over the instances of a block, decoded lazily.
///
/// A block too short for its declared count yields every complete instance, then one `RecordTruncated` error,
/// then nothing.
pub struct Records<'a> {
    ctx: DecodeContext<'a>,
    layout: &'a StructLayout,
    block: &'a Block,
    index: usize,
    failed: bool,
}

impl<'a> Records<'a> {
    pub(crate) fn new(ctx: DecodeContext<'a>, layout: &'a StructLayout, block: &'a Block) -> Self {
        let expected = layout.size.saturating_mul(block.count);
        if block.data.len() > expected {
            tracing::warn!(
                code = %block.code,
                offset = block.offset,
                type_name = %layout.type_name,
                extra = block.data.len() - expected,
                "block payload is longer than its records, ignoring the rest"
            );
        }

        Records {
            ctx,
            layout,
            block,
            index: 0,
            failed: false,
        }
    }

    /// The layout every instance is decoded with.
    pub fn layout(&self) -> &'a StructLayout {
        self.layout
    }

    pub fn block(&self) -> &'a Block {
        self.block
    }

    fn truncated(&mut self, start: usize) -> DecodeError {
        self.failed = true;
        DecodeError::RecordTruncated {
            code: self.block.code,
            instance: self.index,
            type_name: self.layout.type_name.clone(),
            offset: start,
            needed: self.layout.size,
            available: self.block.data.len().saturating_sub(start),
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<StructValue<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.block.count {
            return None;
        }

        let start = self.index.saturating_mul(self.layout.size);
        let block_data: &'a [u8] = &self.block.data;
        let instance = block_data
            .get(start..)
            .and_then(|data| self.ctx.instance(self.layout, data));

        match instance {
            Some(instance) => {
                self.index += 1;
                Some(Ok(instance))
            }
            None => Some(Err(self.truncated(start))),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.block.count.saturating_sub(self.index)))
        }
    }
}
