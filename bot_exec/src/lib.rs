//! # Herbot Control Library
//!
//! Library backing the `bot_exec` executable. The modules here implement the
//! three axis controllers and gripper (`mech`), the capture and inference
//! adapter (`percep`), and the scan orchestration state machine (`scan_mgr`),
//! along with the command definitions (`tc`) shared between the CLI and any
//! external presentation layer.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod mech;
pub mod percep;
pub mod scan_mgr;
pub mod tc;
