//! Small synthetic .blend files. Real files carry personal data so none are shipped.

use blendfile::{
    parsers::test_support::{ByteWriter, DnaBuilder, FileBuilder},
    Endianness, PointerSize,
};

/// A scene with one mesh whose vertices live in a `DATA` block.
///
/// Structs: 0 `ID { void *next, *prev; char name[16]; }`, 1 `MVert { float co[3]; short flag; char _pad[2]; }`,
/// 2 `Mesh { ID id; MVert *mvert; int totvert; }`.
pub fn mesh_file(endianness: Endianness, pointer_size: PointerSize) -> Vec<u8> {
    let pointer_64 = pointer_size == PointerSize::Bits64;
    let dna = DnaBuilder {
        names: vec!["*next", "*prev", "name[16]", "co[3]", "flag", "_pad[2]", "id", "*mvert", "totvert"],
        types: vec![
            ("char", 1),
            ("short", 2),
            ("int", 4),
            ("float", 4),
            ("void", 0),
            ("ID", if pointer_64 { 32 } else { 24 }),
            ("MVert", 16),
            ("Mesh", if pointer_64 { 44 } else { 32 }),
        ],
        structs: vec![
            (5, vec![(4, 0), (4, 1), (0, 2)]),
            (6, vec![(3, 3), (1, 4), (0, 5)]),
            (7, vec![(5, 6), (6, 7), (2, 8)]),
        ],
    }
    .build(endianness);

    let mut mesh = ByteWriter::new(endianness, pointer_size);
    let mut name = [0u8; 16];
    name[..6].copy_from_slice(b"MECube");
    mesh.address(0).address(0).raw(&name).address(0x2000).u32(2);

    let mut verts = ByteWriter::new(endianness, pointer_size);
    for (i, co) in [[0.0, 1.0, 2.0], [-1.0, -2.0, 0.5]].iter().enumerate() {
        verts.f32(co[0]).f32(co[1]).f32(co[2]).u16(i as u16).raw(&[0, 0]);
    }

    FileBuilder::new(endianness, pointer_size)
        .version(b"293")
        .block(b"ME", 0x1000, 2, 1, &mesh.bytes)
        .block(b"DATA", 0x2000, 1, 2, &verts.bytes)
        .block(b"DNA1", 0x3000, 0, 1, &dna)
        .end()
        .build()
}
