//! Bencode encoder: turns a `BencodeValue` tree back into its wire bytes.
use super::{BencodeDict, BencodeError, BencodeResult, BencodeValue};
use std::io::Write;
use tracing::instrument;

/// Encodes a byte slice as a bencode string: `<len>:<bytes>`.
#[instrument(skip(writer, s), level = "trace")]
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

/// Encodes an integer as `i<digits>e`.
#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{}e", i)?;
    Ok(())
}

/// Encodes a list as `l<values>e`.
#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> BencodeResult<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

/// Encodes a dictionary as `d<key><value>...e`, in the order the keys were
/// inserted — never re-sorted, so a decoded-then-re-encoded `info`
/// dictionary is byte-identical to the original.
#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(writer: &mut W, dict: &BencodeDict) -> BencodeResult<()> {
    writer.write_all(b"d")?;
    for (key, value) in dict.iter() {
        encode_string(writer, key)?;
        encode_value(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}

/// Encodes `value` into its bencode representation, writing to `writer`.
#[instrument(skip(writer), level = "debug")]
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    encode_value(writer, value)
}

/// Convenience wrapper returning the encoded bytes directly.
pub fn encode_to_vec(value: &BencodeValue) -> BencodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode(&mut buf, value)?;
    if buf.is_empty() {
        return Err(BencodeError::BadDictionary);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder::decode;

    #[test]
    fn encodes_nested_structure() {
        let mut b = BencodeDict::new();
        b.insert(b"ba".to_vec(), BencodeValue::String(b"foo".to_vec()));
        b.insert(b"bb".to_vec(), BencodeValue::String(b"bar".to_vec()));

        let mut top = BencodeDict::new();
        top.insert(b"a".to_vec(), BencodeValue::Integer(123));
        top.insert(b"b".to_vec(), BencodeValue::Dict(b));
        top.insert(
            b"c".to_vec(),
            BencodeValue::List(vec![
                BencodeValue::List(vec![
                    BencodeValue::String(b"a".to_vec()),
                    BencodeValue::String(b"b".to_vec()),
                ]),
                BencodeValue::String(b"z".to_vec()),
            ]),
        );

        let encoded = encode_to_vec(&BencodeValue::Dict(top)).unwrap();
        assert_eq!(
            encoded,
            b"d1:ai123e1:bd2:ba3:foo2:bb3:bare1:cll1:a1:be1:zee".to_vec()
        );
    }

    #[test]
    fn round_trips_decode_then_encode() {
        let original: &[u8] = b"d3:cow3:moo4:spam4:eggse";
        let decoded = decode(original).unwrap();
        let encoded = encode_to_vec(&decoded).unwrap();
        assert_eq!(encoded, original);
    }
}
