//! Fixed-capacity and NUL-terminated names read in place

/// Bytes of a NUL-padded fixed-capacity field up to the first NUL
///
/// A field with no NUL is used in full; the read never extends past `field`.
pub fn fixed_field(field: &[u8]) -> &[u8] {
    match field.iter().position(|&b| b == 0) {
        Some(end) => &field[..end],
        None => field,
    }
}

/// NUL-terminated string starting at `offset`, searched within `max_len` bytes
///
/// `max_len` counts the terminator. Returns `None` if `offset` is outside
/// `data` or no NUL occurs before `min(offset + max_len, data.len())`.
/// The returned slice excludes the terminator and borrows from `data`.
pub fn nul_terminated(data: &[u8], offset: usize, max_len: usize) -> Option<&[u8]> {
    let window_end = offset.saturating_add(max_len).min(data.len());
    let window = data.get(offset..window_end)?;
    let end = window.iter().position(|&b| b == 0)?;
    Some(&window[..end])
}

/// Encode `name` into a zeroed fixed-capacity field
///
/// The caller checks that `name` fits; excess bytes are dropped.
pub(crate) fn encode_fixed<const N: usize>(name: &str) -> [u8; N] {
    let mut field = [0u8; N];
    let len = name.len().min(N);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_field_stops_at_nul() {
        let mut field = [0u8; 16];
        field[..4].copy_from_slice(b"kick");
        assert_eq!(fixed_field(&field), b"kick");
    }

    #[test]
    fn test_fixed_field_without_nul_uses_whole_field() {
        let field = [b'a'; 8];
        assert_eq!(fixed_field(&field), b"aaaaaaaa");
    }

    #[test]
    fn test_nul_terminated_in_bounds() {
        let data = b"xxsnare\0hat\0";
        assert_eq!(nul_terminated(data, 2, 256), Some(&b"snare"[..]));
        assert_eq!(nul_terminated(data, 8, 256), Some(&b"hat"[..]));
    }

    #[test]
    fn test_nul_terminated_missing_terminator() {
        let data = b"unterminated";
        assert_eq!(nul_terminated(data, 0, 256), None);
    }

    #[test]
    fn test_nul_terminated_respects_max_len() {
        let data = b"abcdef\0";
        assert_eq!(nul_terminated(data, 0, 6), None);
        assert_eq!(nul_terminated(data, 0, 7), Some(&b"abcdef"[..]));
    }

    #[test]
    fn test_nul_terminated_offset_out_of_range() {
        let data = b"a\0";
        assert_eq!(nul_terminated(data, 2, 256), None);
        assert_eq!(nul_terminated(data, usize::MAX, 256), None);
    }

    #[test]
    fn test_encode_fixed_pads_with_zero() {
        let field: [u8; 8] = encode_fixed("hat");
        assert_eq!(&field, b"hat\0\0\0\0\0");
    }
}
