use serde::{Deserialize, Deserializer};

/// Checks whether `src` is a well-formed container reference.
///
/// Container references are either engine ids (hex) or container names. Both must start
/// with an ASCII alphanumeric character followed by alphanumerics, `_`, `.` or `-`, which
/// is the character set the Docker engine accepts for container names.
///
/// # Arguments
///
/// * `src` - A byte slice to check.
///
/// # Returns
///
/// `true` if the reference is well-formed, otherwise `false`. Empty input is not well-formed.
pub(super) fn is_valid_reference(src: &[u8]) -> bool {
    match src.split_first() {
        Some((first, rest)) => {
            first.is_ascii_alphanumeric()
                && rest
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        }
        None => false,
    }
}

/// Deserializes a value that the engine may send as JSON `null`, substituting `T::default()`.
///
/// The Docker engine encodes empty Go maps and slices as `null` (e.g., `"Env": null`), which
/// would otherwise fail to deserialize into a `Vec` or a map.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
