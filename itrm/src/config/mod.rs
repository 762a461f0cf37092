// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// Attach sources.
pub mod itrm_config;
pub mod scheduler_config;

// Re-export.
pub use itrm_config::*;
pub use scheduler_config::*;
