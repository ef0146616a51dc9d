//! Builders for synthetic .blend data, shared by the unit and integration tests. Not part of the public API.

use super::{Endianness, PointerSize};

pub struct ByteWriter {
    pub endianness: Endianness,
    pub pointer_size: PointerSize,
    pub bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new(endianness: Endianness, pointer_size: PointerSize) -> Self {
        Self {
            endianness,
            pointer_size,
            bytes: Vec::new(),
        }
    }

    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        match self.endianness {
            Endianness::Little => self.raw(&v.to_le_bytes()),
            Endianness::Big => self.raw(&v.to_be_bytes()),
        }
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        match self.endianness {
            Endianness::Little => self.raw(&v.to_le_bytes()),
            Endianness::Big => self.raw(&v.to_be_bytes()),
        }
    }

    pub fn address(&mut self, v: u64) -> &mut Self {
        match (self.pointer_size, self.endianness) {
            (PointerSize::Bits32, _) => self.u32(v as u32),
            (PointerSize::Bits64, Endianness::Little) => self.raw(&v.to_le_bytes()),
            (PointerSize::Bits64, Endianness::Big) => self.raw(&v.to_be_bytes()),
        }
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        match self.endianness {
            Endianness::Little => self.raw(&v.to_le_bytes()),
            Endianness::Big => self.raw(&v.to_be_bytes()),
        }
    }

    pub fn align4(&mut self) -> &mut Self {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        self
    }
}

/// Writes a header and a sequence of blocks.
pub struct FileBuilder {
    writer: ByteWriter,
}

impl FileBuilder {
    pub fn new(endianness: Endianness, pointer_size: PointerSize) -> Self {
        let mut writer = ByteWriter::new(endianness, pointer_size);
        writer
            .raw(b"BLENDER")
            .raw(&[pointer_size.marker(), endianness.marker()])
            .raw(b"280");
        Self { writer }
    }

    pub fn block(
        &mut self,
        code: &[u8],
        address: u64,
        dna_index: u32,
        count: u32,
        data: &[u8],
    ) -> &mut Self {
        let mut padded = [0u8; 4];
        padded[..code.len()].copy_from_slice(code);
        self.writer
            .raw(&padded)
            .u32(data.len() as u32)
            .address(address)
            .u32(dna_index)
            .u32(count)
            .raw(data);
        self
    }

    pub fn end(&mut self) -> &mut Self {
        self.block(b"ENDB", 0, 0, 0, &[])
    }

    pub fn build(&self) -> Vec<u8> {
        self.writer.bytes.clone()
    }

    /// Overwrites the three version digits of the header.
    pub fn version(&mut self, version: &[u8; 3]) -> &mut Self {
        self.writer.bytes[9..12].copy_from_slice(version);
        self
    }
}

/// Writes the payload of a DNA1 block.
pub struct DnaBuilder {
    pub names: Vec<&'static str>,
    pub types: Vec<(&'static str, u16)>,
    pub structs: Vec<(u16, Vec<(u16, u16)>)>,
}

impl DnaBuilder {
    pub fn build(&self, endianness: Endianness) -> Vec<u8> {
        let mut w = ByteWriter::new(endianness, PointerSize::Bits64);
        w.raw(b"SDNA").raw(b"NAME").u32(self.names.len() as u32);
        for name in &self.names {
            w.raw(name.as_bytes()).raw(&[0]);
        }
        w.align4().raw(b"TYPE").u32(self.types.len() as u32);
        for (name, _) in &self.types {
            w.raw(name.as_bytes()).raw(&[0]);
        }
        w.align4().raw(b"TLEN");
        for (_, len) in &self.types {
            w.u16(*len);
        }
        w.align4().raw(b"STRC").u32(self.structs.len() as u32);
        for (type_index, fields) in &self.structs {
            w.u16(*type_index).u16(fields.len() as u16);
            for (field_type, field_name) in fields {
                w.u16(*field_type).u16(*field_name);
            }
        }
        w.bytes
    }
}
