// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// Attach sources.
pub mod common_enums;
pub mod decl_macros;
pub mod fd_io;
pub mod temp_dir;

// Re-export.
pub use common_enums::*;
pub use fd_io::*;
pub use temp_dir::*;
