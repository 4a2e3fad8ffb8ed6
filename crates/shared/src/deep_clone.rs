//! Deep-clone helper for the max-errors hook.
//!
//! The max-errors hook must observe a snapshot of the event, not the
//! authoritative in-progress record. Rust's `Clone` already does this for
//! value types with no interior mutability, which `outbox_core::Event` is, so this
//! is a thin named wrapper rather than a bespoke recursive copier — it exists so
//! call sites read as "snapshot for the hook" rather than an unglossed `.clone()`.

/// Produce an owned snapshot of `value` that is independent of any future
/// mutation to the original.
pub fn snapshot<T: Clone>(value: &T) -> T {
    value.clone()
}
