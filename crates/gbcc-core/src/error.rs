use std::io;

use thiserror::Error;

/// Failures surfaced by [`crate::gameboy::Core::initialise`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("couldn't read ROM file: {0}")]
    Io(#[from] io::Error),
    #[error("ROM image is empty")]
    RomTooSmall,
    #[error("{0} not yet supported.")]
    UnsupportedMbc(&'static str),
    #[error("invalid ram size flag 0x{0:02X}")]
    InvalidRamSize(u8),
    #[error("unknown palette \"{0}\"")]
    UnknownPalette(String),
}

/// Reasons a savestate is declined. The running core is never touched when
/// one of these is returned.
#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("savestate version {found} does not match expected version {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("not a savestate file")]
    BadMagic,
    #[error("savestate is truncated")]
    Truncated,
    #[error("savestate belongs to a different ROM")]
    RomMismatch,
    #[error("savestate i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheatError {
    #[error("cheat code must have 8 (GameShark) or 9 (Game Genie) digits, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex digit '{0}' in cheat code")]
    InvalidDigit(char),
    #[error("too many cheats of this type")]
    TooMany,
}
