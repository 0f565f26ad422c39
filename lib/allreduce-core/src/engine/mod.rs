//! The two algorithm engines (§4.4, §4.5): stateless topology metadata plus per-step handlers,
//! with all per-instance state held externally in the [`StateStore`](crate::store::StateStore).

pub mod rabenseifner;
pub mod recursive_doubling;
