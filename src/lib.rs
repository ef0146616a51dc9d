//! # blendfile - A decoder for the .blend files saved by Blender
//!
//! ## Example
//!
//! ```no_run
//! use blendfile::{File, Value};
//!
//! /// Prints the name and position of every object
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data = std::fs::read("file.blend")?;
//!     let file = File::from_data(&data)?;
//!
//!     for block in file.blocks_by_code("OB") {
//!         for obj in file.records(block)? {
//!             let obj = obj?;
//!             let name = obj.get_path("id.name").and_then(Value::as_str).unwrap_or_default();
//!             let loc = obj.get("loc").and_then(Value::as_array).unwrap_or(&[]);
//!
//!             println!("{:?} at {:?}", name, loc);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## The .blend file
//!
//! Blender creates the save file by dumping its memory to the disk, this means that a .blend file is a list of
//! C-like structs which can contain primitives, arrays, pointers and other structs. The file is made of:
//!
//! * a 12 byte header telling the pointer width, the byte order and the version of Blender that wrote it;
//! * a sequence of blocks. Each block has a four letter code, the memory address its data had when the file was
//!   written, the index of the struct it holds and how many of them;
//! * one `DNA1` block describing every struct: its fields, their types and their names;
//! * an `ENDB` block closing the sequence.
//!
//! Pointers inside records are those old memory addresses. They are resolved by looking up the block that was
//! stored at that address, they are never followed as real pointers.
//!
//! The following is how a Camera looks once decoded and printed with `Display`:
//!
//! ```text
//! Camera {
//!     id: ID {
//!         name: char[66] = "CACamera";
//!         //[... other omitted properties ...]
//!     }
//!     adt: *AnimData = null;
//!     type: char = 0;
//!     clipsta: float = 0.100;
//!     lens: float = 50.000;
//!     dof_ob: *Object = null;
//!     //[... other omitted properties ...]
//! }
//! ```
//!
//! ### Learn more
//!
//! Documentation on the .blend file is a bit sparse, but the most common source is the
//! [Mystery of the Blend](https://github.com/fschutt/mystery-of-the-blend-backup).
//!
//! ## This crate
//!
//! The `parsers` module reads the header, frames the blocks into a `BlockCatalog` and parses the DNA. The
//! `runtime` module turns the DNA into struct layouts and decodes block data into `Value`s.
//!
//! Decoding is lazy. Opening a file frames every block and prepares the layouts, the binary data of a block is not
//! decoded until you ask for its records. Once opened a `File` is never modified, so it can be shared between
//! threads.
//!
//! Nothing here panics on a malformed file. Problems with the header, the framing or the DNA are
//! `BlendParseError`s, problems with a single record are `DecodeError`s and only affect that record.
//!
//! ### Supported versions
//!
//! As the .blend file is self-describing it should be possible to read files from every Blender version. Primitive
//! types are mapped by name and their width is taken from the file itself.
//!
//! ### Limitations
//!
//! Compressed files must be uncompressed before being passed to `File::from_data`, see the `print_blend` demo.
//! Writing .blend files is not supported.

pub mod parsers;
pub mod runtime;

pub use parsers::{
    blend::{Block, BlockCatalog, BlockCode, BlockKind, Header},
    dna::Dna,
    primitive::BlendPrimitive,
    BlendParseError, Endianness, PointerSize,
};
pub use runtime::{
    decode::Records,
    value::{Pointer, Resolved, StructValue, Value},
    DecodeError, File, ListIter, OpenOptions, Pointee,
};
