// src/config/mod.rs
// Manifest parsing, validation and the tree-level operations applied before parsing.

pub mod anchor; // Anchor prior parsing and formatting
pub(crate) mod choice; // Closed string vocabularies
pub mod overrides; // Dotted `key=value` overrides and tree merging
pub mod processed; // Validated, fully defaulted experiment
pub mod raw; // Structs directly mapping to the YAML structure
pub mod restrictions; // Cross-field `a.b != None` style checks
