//! Reference image naming convention: `<individual_id>___<suffix>.<ext>`.
//!
//! The owner prefix lets the index be reconstructed from the reference
//! directory alone when catalog metadata is unavailable.

use std::path::Path;

use uuid::Uuid;

/// Separator between owner id and suffix.
pub const OWNER_SEPARATOR: &str = "___";

/// Extensions accepted as reference images (compared case-insensitively).
pub const REFERENCE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Fresh reference file name for `individual_id` with a random 8-hex suffix.
pub fn reference_file_name(individual_id: &str, extension: &str) -> String {
    let suffix = hex::encode(&Uuid::new_v4().as_bytes()[..4]);
    format!("{individual_id}{OWNER_SEPARATOR}{suffix}.{extension}")
}

/// Owner id encoded in a reference file name, if it follows the convention.
pub fn owner_from_file_name(file_name: &str) -> Option<&str> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    let (owner, suffix) = stem.split_once(OWNER_SEPARATOR)?;
    if owner.is_empty() || suffix.is_empty() {
        return None;
    }
    Some(owner)
}

/// File-name pattern prefix shared by every reference of `individual_id`.
pub fn owner_prefix(individual_id: &str) -> String {
    format!("{individual_id}{OWNER_SEPARATOR}")
}

/// True for `.jpg`, `.jpeg` and `.png` files, ignoring case.
pub fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            REFERENCE_EXTENSIONS
                .iter()
                .any(|allowed| e.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}
