//! Components A–C: read and validate a feed file, apply filters and
//! canonicalization, accumulate into the append-only raw table.

pub mod feed;
pub mod normalize;
pub mod raw_store;
