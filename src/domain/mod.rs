// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing the classification task.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, constants and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// The 22-role catalog and the shared task instruction
pub mod roles;

// Raw, formatted and encoded examples
pub mod example;

// ChatML messages and rendering
pub mod chat;

// Core abstractions (traits) that other layers implement
pub mod traits;
