// mod.rs - Storage module exports

mod archetypes;
mod chunk;
mod chunk_pool;

pub use archetypes::{Archetype, ChunkWalk};
pub use chunk::{Chunk, ChunkId, CHUNK_BYTES, CHUNK_DATA_BYTES, CHUNK_HEADER_BYTES};
pub use chunk_pool::ChunkPool;
