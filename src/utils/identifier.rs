//! Identifier generation.
//!
//! WAMP session, request and subscription ids are random integers drawn
//! from `[1, 2^53]` so they stay exactly representable in JSON. The node
//! identity is a process-wide random token used to tell "a message this
//! process just published" apart from one published by another broker node.

use once_cell::sync::Lazy;
use rand::Rng;
use uuid::Uuid;

/// Upper bound (inclusive) of the WAMP global id range.
pub const MAX_ID: u64 = 1 << 53;

/// Process-wide node identity, stable for the process lifetime.
pub static NODE_ID: Lazy<String> = Lazy::new(|| Uuid::new_v4().simple().to_string());

/// Generate a random id in `[1, MAX_ID]`.
pub fn create_global_id() -> u64 {
    rand::thread_rng().gen_range(1..=MAX_ID)
}
