//! Primitive wire forms shared by every message: big-endian integers, the
//! `u32`-length-prefixed UTF-8 string, and the `u32`-count-prefixed list.

use anyhow::anyhow;
use bytes::{Buf, BufMut, BytesMut};

pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

pub fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let len = buf.try_get_u32()? as usize;
    if buf.remaining() < len {
        return Err(anyhow!("string length {} overruns the datagram", len));
    }
    let raw = buf.copy_to_bytes(len);
    let s = String::from_utf8(raw.to_vec())?;
    Ok(s)
}

pub fn put_list<T>(buf: &mut BytesMut, items: &[T], mut put_item: impl FnMut(&mut BytesMut, &T)) {
    buf.put_u32(items.len() as u32);
    for item in items {
        put_item(buf, item);
    }
}

pub fn try_get_list<B: Buf, T>(
    buf: &mut B,
    mut get_item: impl FnMut(&mut B) -> anyhow::Result<T>,
) -> anyhow::Result<Vec<T>> {
    let count = buf.try_get_u32()? as usize;
    let mut items = Vec::new();
    for _ in 0..count {
        items.push(get_item(buf)?);
    }
    Ok(items)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty("")]
    #[case::ascii("Meeting Room A")]
    #[case::multibyte("Hörsaal Ω")]
    fn test_string_roundtrip(#[case] s: &str) {
        let mut buf = BytesMut::new();
        put_string(&mut buf, s);
        let mut read = buf.freeze();
        assert_eq!(try_get_string(&mut read).unwrap(), s);
        assert!(!read.has_remaining());
    }

    #[test]
    fn test_string_length_overrun() {
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.put_slice(b"short");
        assert!(try_get_string(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_slice(&[0xff, 0xfe]);
        assert!(try_get_string(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_list_roundtrip() {
        let days: Vec<u8> = vec![0, 2, 6];
        let mut buf = BytesMut::new();
        put_list(&mut buf, &days, |b, d| b.put_u8(*d));
        let mut read = buf.freeze();
        let deser = try_get_list(&mut read, |b| Ok(b.try_get_u8()?)).unwrap();
        assert_eq!(deser, days);
        assert!(!read.has_remaining());
    }

    #[test]
    fn test_list_truncated() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_u8(1);
        let result = try_get_list(&mut buf.freeze(), |b| Ok(b.try_get_u8()?));
        assert!(result.is_err());
    }
}
