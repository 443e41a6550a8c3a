//! Generation-based file naming.
//!
//! Every name the engine writes is derived here. Generations and segment
//! counters are written in radix 36 (`0-9a-z`).

use crate::error::{CoreError, CoreResult};
use crate::types::Generation;

/// Base name of commit files.
pub const SEGMENTS: &str = "segments";
/// Advisory pointer to the latest generation.
pub const SEGMENTS_GEN: &str = "segments.gen";
/// Base name of commit files still being written.
pub const PENDING_SEGMENTS: &str = "pending_segments";

/// Compound segment data.
pub const COMPOUND_EXTENSION: &str = "cfs";
/// Field infos of a split segment.
pub const FIELD_INFOS_EXTENSION: &str = "fnm";
/// Documents of a split segment.
pub const FIELDS_EXTENSION: &str = "fdt";
/// Base norms of a split segment.
pub const NORMS_EXTENSION: &str = "nrm";
/// Deleted-document bitset.
pub const DELETES_EXTENSION: &str = "del";
/// Prefix of separate-norm extensions; the field number follows.
pub const SEPARATE_NORMS_PREFIX: char = 's';

const RADIX: u64 = 36;

/// Formats a number in radix 36.
#[must_use]
pub fn to_radix36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let d = (value % RADIX) as u32;
        digits.push(char::from_digit(d, RADIX as u32).unwrap_or('0'));
        value /= RADIX;
    }
    digits.iter().rev().collect()
}

/// Parses a radix-36 number written by [`to_radix36`].
#[must_use]
pub fn parse_radix36(text: &str) -> Option<u64> {
    if text.is_empty()
        || !text
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
    {
        return None;
    }
    u64::from_str_radix(text, RADIX as u32).ok()
}

/// Builds `base[_gen][.ext]`.
///
/// Generation 0 maps to the bare `base[.ext]` alias.
#[must_use]
pub fn file_name_from_generation(base: &str, extension: &str, generation: Generation) -> String {
    let mut name = base.to_string();
    if generation.as_u64() > 0 {
        name.push('_');
        name.push_str(&to_radix36(generation.as_u64()));
    }
    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension);
    }
    name
}

/// Inverse of [`file_name_from_generation`] for names without extension.
///
/// # Errors
///
/// Returns [`CoreError::Format`] if `name` is not `base` or
/// `base_<radix36>`. The suffix must be written the way
/// [`file_name_from_generation`] writes it: non-zero, no leading zeros.
pub fn generation_from_file_name(base: &str, name: &str) -> CoreResult<Generation> {
    if name == base {
        return Ok(Generation::new(0));
    }
    name.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('_'))
        .filter(|digits| !digits.starts_with('0'))
        .and_then(parse_radix36)
        .map(Generation::new)
        .ok_or_else(|| CoreError::format(name))
}

/// Returns the commit file name of a generation.
#[must_use]
pub fn segments_file_name(generation: Generation) -> String {
    file_name_from_generation(SEGMENTS, "", generation)
}

/// Returns the temporary name a commit is written under.
#[must_use]
pub fn pending_segments_file_name(generation: Generation) -> String {
    file_name_from_generation(PENDING_SEGMENTS, "", generation)
}

/// Returns the generation of a commit file name.
///
/// # Errors
///
/// Returns [`CoreError::Format`] for anything but `segments` or
/// `segments_<radix36>`.
pub fn generation_from_segments_file_name(name: &str) -> CoreResult<Generation> {
    generation_from_file_name(SEGMENTS, name)
}

/// Returns true for `segments` and `segments_<radix36>`.
#[must_use]
pub fn is_segments_file(name: &str) -> bool {
    name != SEGMENTS_GEN && generation_from_segments_file_name(name).is_ok()
}

/// Returns the name of the segment with the given counter value.
#[must_use]
pub fn segment_name(counter: u64) -> String {
    format!("_{}", to_radix36(counter))
}

/// Returns `<segment>.<ext>`.
#[must_use]
pub fn segment_file_name(segment: &str, extension: &str) -> String {
    format!("{segment}.{extension}")
}

/// Returns the separate-norm extension of a field number.
#[must_use]
pub fn separate_norms_extension(field_number: u32) -> String {
    format!("{SEPARATE_NORMS_PREFIX}{field_number}")
}

/// Returns true if the engine owns a file with this name.
///
/// Used to decide which directory entries the file deleter may remove.
/// `segments.gen` and lock files are never index files.
#[must_use]
pub fn is_index_file(name: &str) -> bool {
    if name == SEGMENTS_GEN {
        return false;
    }
    if is_segments_file(name) {
        return true;
    }
    if let Some(rest) = name.strip_prefix(PENDING_SEGMENTS) {
        return rest.is_empty() || rest.starts_with('_');
    }
    let Some(stem) = name.strip_prefix('_') else {
        return false;
    };
    let Some((_, extension)) = stem.rsplit_once('.') else {
        return false;
    };
    matches!(
        extension,
        COMPOUND_EXTENSION | FIELD_INFOS_EXTENSION | FIELDS_EXTENSION | NORMS_EXTENSION | DELETES_EXTENSION
    ) || extension
        .strip_prefix(SEPARATE_NORMS_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}
