/// Modem escape byte.
pub const ESCAPE: u8 = 0x18;

/// Decode the byte at `dat[i]`, returning it and the number of input bytes it
/// used.
fn decode_at(dat: &[u8], i: usize) -> (u8, usize) {
    let b = dat[i];
    if b == ESCAPE {
        match dat.get(i + 1) {
            Some(0x6b) => return (0x2b, 2),
            Some(0x58) => return (ESCAPE, 2),
            _ => {}
        }
    }
    (b, 1)
}

/// Undo modem escaping in a single left-to-right pass: `18 6B` becomes `2B` and
/// `18 58` becomes `18`.
///
/// Returns the de-escaped bytes and the number of escape sequences replaced,
/// which is also how many bytes shorter the output is than the input.
///
/// # Example
/// ```
/// use mdd::sio::unescape;
///
/// let (dat, n) = unescape(&[0x01, 0x18, 0x6b, 0x18, 0x58, 0x18]);
/// assert_eq!(dat, vec![0x01, 0x2b, 0x18, 0x18]);
/// assert_eq!(n, 2);
/// ```
#[must_use]
pub fn unescape(dat: &[u8]) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(dat.len());
    let mut i = 0;
    while i < dat.len() {
        let (b, used) = decode_at(dat, i);
        out.push(b);
        i += used;
    }
    let replaced = dat.len() - out.len();
    (out, replaced)
}

/// De-escape from the start of `dat` until `want` bytes are produced.
///
/// Returns the bytes and how many input bytes they took, or `None` if `dat`
/// ends first. An escape sequence split by the end of `dat` is not decoded.
#[must_use]
pub fn unescape_len(dat: &[u8], want: usize) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::with_capacity(want);
    let mut i = 0;
    while out.len() < want {
        if i >= dat.len() {
            return None;
        }
        let (b, used) = decode_at(dat, i);
        out.push(b);
        i += used;
    }
    Some((out, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&[], &[], 0; "empty")]
    #[test_case(&[0x01, 0x02], &[0x01, 0x02], 0; "nothing escaped")]
    #[test_case(&[0x18, 0x6b], &[0x2b], 1; "plus")]
    #[test_case(&[0x18, 0x58], &[0x18], 1; "escape")]
    #[test_case(&[0x18, 0x18, 0x6b], &[0x18, 0x2b], 1; "escape before plus")]
    #[test_case(&[0x18, 0x58, 0x6b], &[0x18, 0x6b], 1; "decoded escape is not reused")]
    #[test_case(&[0x18, 0x18, 0x58], &[0x18, 0x18], 1; "lone escape then escaped escape")]
    #[test_case(&[0xaa, 0x18], &[0xaa, 0x18], 0; "trailing escape")]
    fn unescapes(input: &[u8], expected: &[u8], n: usize) {
        let (got, replaced) = unescape(input);
        assert_eq!(got, expected);
        assert_eq!(replaced, n);
    }

    #[test]
    fn unescape_to_length() {
        let dat = [b'a', 0x18, 0x6b, b'b', 0x18, 0x58, 0x03];

        assert_eq!(
            unescape_len(&dat, 4),
            Some((vec![b'a', 0x2b, b'b', 0x18], 6))
        );
        assert_eq!(unescape_len(&dat, 0), Some((vec![], 0)));
        assert_eq!(unescape_len(&dat[..3], 4), None);
    }
}
