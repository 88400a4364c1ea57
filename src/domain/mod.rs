// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure data types shared across the system. Rules:
//   - no burn types
//   - no file I/O
//   - no tensor math
// Everything here is plain structs and enums with serde derives
// where an artifact round-trips through disk.

// Diagnosis table: patient → visits → codes
pub mod patient;

// Train/val/test phase assignment
pub mod split;
