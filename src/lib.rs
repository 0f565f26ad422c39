//! This crate has no code of its own — the workspace root package exists only to host the
//! end-to-end integration suite under `tests/`, which exercises `allreduce-types`,
//! `allreduce-transport`, and `allreduce-core` together the way a real caller would.
