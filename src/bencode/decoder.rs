//! Bencode decoder: turns a byte buffer into a `BencodeValue` tree.
use super::{BencodeDict, BencodeError, BencodeResult, BencodeValue};
use tracing::instrument;

/// Decodes exactly one Bencode value from the start of `input`.
///
/// Trailing bytes after the value are ignored — callers that need to know
/// how much was consumed should use [`decode_prefix`].
#[instrument(skip(input), level = "trace")]
pub fn decode(input: &[u8]) -> BencodeResult<BencodeValue> {
    let (value, _) = decode_prefix(input)?;
    Ok(value)
}

/// Decodes one Bencode value from the start of `input` and returns it along
/// with the number of bytes consumed.
pub fn decode_prefix(input: &[u8]) -> BencodeResult<(BencodeValue, usize)> {
    if input.is_empty() {
        return Err(BencodeError::UnexpectedEof);
    }
    decode_value(input, 0)
}

fn decode_value(input: &[u8], pos: usize) -> BencodeResult<(BencodeValue, usize)> {
    match byte_at(input, pos)? {
        b'0'..=b'9' => {
            let (s, next) = decode_string(input, pos)?;
            Ok((BencodeValue::String(s), next))
        }
        b'i' => {
            let (i, next) = decode_integer(input, pos)?;
            Ok((BencodeValue::Integer(i), next))
        }
        b'l' => decode_list(input, pos),
        b'd' => decode_dict(input, pos),
        other => Err(BencodeError::MalformedInput(format!(
            "unexpected leading byte {:#04x}",
            other
        ))),
    }
}

fn byte_at(input: &[u8], pos: usize) -> BencodeResult<u8> {
    input.get(pos).copied().ok_or(BencodeError::UnexpectedEof)
}

/// Decodes a `<length>:<bytes>` byte string starting at `pos`.
#[instrument(skip(input), level = "trace")]
fn decode_string(input: &[u8], pos: usize) -> BencodeResult<(Vec<u8>, usize)> {
    let colon = find(input, pos, b':')?;
    let length_str = std::str::from_utf8(&input[pos..colon])
        .map_err(|_| BencodeError::InvalidStringLength)?;
    if length_str.is_empty() || !length_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BencodeError::InvalidStringLength);
    }
    let length: usize = length_str
        .parse()
        .map_err(|_| BencodeError::InvalidStringLength)?;
    let start = colon + 1;
    let end = start
        .checked_add(length)
        .ok_or(BencodeError::InvalidStringLength)?;
    if end > input.len() {
        return Err(BencodeError::UnexpectedEof);
    }
    Ok((input[start..end].to_vec(), end))
}

/// Decodes an `i<digits>e` integer starting at `pos`.
#[instrument(skip(input), level = "trace")]
fn decode_integer(input: &[u8], pos: usize) -> BencodeResult<(i64, usize)> {
    if byte_at(input, pos)? != b'i' {
        return Err(BencodeError::MalformedInput("integer must start with 'i'".into()));
    }
    let e = find(input, pos + 1, b'e')?;
    let num_str = std::str::from_utf8(&input[pos + 1..e]).map_err(|_| BencodeError::InvalidInteger)?;

    if num_str.is_empty() {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str == "-0" {
        return Err(BencodeError::InvalidInteger);
    }
    let digits = num_str.strip_prefix('-').unwrap_or(num_str);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BencodeError::InvalidInteger);
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(BencodeError::InvalidInteger);
    }

    let value = num_str.parse::<i64>().map_err(|_| BencodeError::InvalidInteger)?;
    Ok((value, e + 1))
}

/// Decodes an `l<values>e` list starting at `pos`.
#[instrument(skip(input), level = "trace")]
fn decode_list(input: &[u8], pos: usize) -> BencodeResult<(BencodeValue, usize)> {
    if byte_at(input, pos)? != b'l' {
        return Err(BencodeError::MalformedInput("list must start with 'l'".into()));
    }
    let mut items = Vec::new();
    let mut cursor = pos + 1;
    loop {
        if byte_at(input, cursor)? == b'e' {
            cursor += 1;
            break;
        }
        let (item, next) = decode_value(input, cursor)?;
        items.push(item);
        cursor = next;
    }
    Ok((BencodeValue::List(items), cursor))
}

/// Decodes a `d<key><value>...e` dictionary starting at `pos`, preserving
/// key order.
#[instrument(skip(input), level = "trace")]
fn decode_dict(input: &[u8], pos: usize) -> BencodeResult<(BencodeValue, usize)> {
    if byte_at(input, pos)? != b'd' {
        return Err(BencodeError::MalformedInput("dict must start with 'd'".into()));
    }
    let mut dict = BencodeDict::new();
    let mut cursor = pos + 1;
    loop {
        if byte_at(input, cursor)? == b'e' {
            cursor += 1;
            break;
        }
        let (key, next) = decode_string(input, cursor)?;
        let (value, next) = decode_value(input, next)?;
        dict.insert(key, value);
        cursor = next;
    }
    Ok((BencodeValue::Dict(dict), cursor))
}

fn find(input: &[u8], from: usize, delimiter: u8) -> BencodeResult<usize> {
    input[from.min(input.len())..]
        .iter()
        .position(|&b| b == delimiter)
        .map(|i| i + from)
        .ok_or(BencodeError::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_integer() {
        assert_eq!(decode(b"i123e").unwrap(), BencodeValue::Integer(123));
        assert_eq!(decode(b"i-5e").unwrap(), BencodeValue::Integer(-5));
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
    }

    #[test]
    fn rejects_leading_zero_and_negative_zero() {
        assert!(decode(b"i03e").is_err());
        assert!(decode(b"i-0e").is_err());
    }

    #[test]
    fn decodes_string() {
        assert_eq!(
            decode(b"4:name").unwrap(),
            BencodeValue::String(b"name".to_vec())
        );
    }

    #[test]
    fn decodes_list() {
        let decoded = decode(b"l4:spam4:eggsi123ee").unwrap();
        assert_eq!(
            decoded,
            BencodeValue::List(vec![
                BencodeValue::String(b"spam".to_vec()),
                BencodeValue::String(b"eggs".to_vec()),
                BencodeValue::Integer(123),
            ])
        );
    }

    #[test]
    fn decodes_dict_preserving_key_order() {
        let decoded = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
        let dict = decoded.as_dict().unwrap();
        let keys: Vec<&[u8]> = dict.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"cow".as_slice(), b"spam".as_slice()]);
    }

    #[test]
    fn empty_input_is_malformed() {
        assert!(matches!(decode(b""), Err(BencodeError::UnexpectedEof)));
    }
}
