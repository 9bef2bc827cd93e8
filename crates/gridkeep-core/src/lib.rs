// File: `crates/gridkeep-core/src/lib.rs`
pub mod id_sequence;
pub mod lattice;
pub mod lww_map;
pub mod stamp;

pub use id_sequence::{IdSequence, SeqOp};
pub use lattice::{Lattice, OpCrdt};
pub use lww_map::{LwwMap, MapOp};
pub use stamp::{LamportClock, Stamp};
