//! Key layout for contract-info records: `CONTRACT_INFO_PREFIX || address`.

/// One-byte prefix under which every contract-info record is stored.
pub const CONTRACT_INFO_PREFIX: u8 = 0x02;

/// Build the store key for a contract address.
#[must_use]
pub fn contract_key(address: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(address.len() + 1);
    key.push(CONTRACT_INFO_PREFIX);
    key.extend_from_slice(address);
    key
}

/// Address part of a contract-info key, or `None` for keys under another
/// prefix.
#[must_use]
pub fn address_from_key(key: &[u8]) -> Option<&[u8]> {
    match key.split_first() {
        Some((&CONTRACT_INFO_PREFIX, address)) => Some(address),
        _ => None,
    }
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// `None` when no such key exists (empty prefix or all `0xFF`), meaning the
/// range is unbounded above.
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last != 0xFF {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_key_roundtrip() {
        let key = contract_key(&[0xAA, 0xBB]);
        assert_eq!(key, [0x02, 0xAA, 0xBB]);
        assert_eq!(address_from_key(&key), Some(&[0xAA, 0xBB][..]));
    }

    #[test]
    fn foreign_prefix_has_no_address() {
        assert_eq!(address_from_key(&[0x03, 0x01]), None);
        assert_eq!(address_from_key(&[]), None);
    }

    #[test]
    fn successor_increments_last_byte() {
        assert_eq!(prefix_successor(&[0x02]), Some(vec![0x03]));
        assert_eq!(prefix_successor(&[0x02, 0xFF]), Some(vec![0x03]));
        assert_eq!(prefix_successor(&[0x01, 0x7F]), Some(vec![0x01, 0x80]));
    }

    #[test]
    fn successor_unbounded_cases() {
        assert_eq!(prefix_successor(&[]), None);
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }
}
