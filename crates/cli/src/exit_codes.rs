//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing URL)  |
//! | 3       | Universal        | I/O error (cannot write output or cache) |
//! | 50-59   | crm              | CRM connection and data codes            |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

// =============================================================================
// Universal (0-3)
// =============================================================================

/// Success - command completed without errors.
/// Partial results still exit 0; diagnostics go to stderr.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, invalid dates, no base URL configured.
pub const EXIT_USAGE: u8 = 2;

/// I/O error - output file, export or cache directory not writable.
pub const EXIT_IO: u8 = 3;

// =============================================================================
// CRM (50-59)
// =============================================================================

/// No CRM token in the keychain or BITRIX_TOKEN.
pub const EXIT_CRM_NOT_AUTH: u8 = 50;

/// The pipeline produced no rows and `--fail-on-empty` was given.
/// Covers unreachable endpoints and upstream rejections, which the
/// pipeline reports as diagnostics instead of errors.
pub const EXIT_CRM_NO_DATA: u8 = 54;
