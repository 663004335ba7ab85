//! Little-endian bit packing for sub-byte codes.
//!
//! Value `i` occupies bits `[i*bits, (i+1)*bits)` of the output, least
//! significant bit first. Width 8 is a plain byte copy.

/// Number of bytes needed for `count` values of `bits` width.
#[inline]
pub fn packed_len(count: usize, bits: u8) -> usize {
    (count * bits as usize).div_ceil(8)
}

/// Appends `values` packed at `bits` per value. Higher bits of each value are ignored.
pub fn pack_into(values: &[u8], bits: u8, out: &mut Vec<u8>) {
    debug_assert!((1..=8).contains(&bits));
    if bits == 8 {
        out.extend_from_slice(values);
        return;
    }
    let start = out.len();
    out.resize(start + packed_len(values.len(), bits), 0);
    let width = bits as usize;
    for (i, &v) in values.iter().enumerate() {
        let base = i * width;
        for j in 0..width {
            if (v >> j) & 1 == 1 {
                let pos = base + j;
                out[start + pos / 8] |= 1 << (pos % 8);
            }
        }
    }
}

/// Reads the `index`-th value of width `bits` from a packed buffer.
#[inline]
pub fn unpack(bytes: &[u8], index: usize, bits: u8) -> u8 {
    if bits == 8 {
        return bytes[index];
    }
    let width = bits as usize;
    let base = index * width;
    let mut v = 0u8;
    for j in 0..width {
        let pos = base + j;
        if (bytes[pos / 8] >> (pos % 8)) & 1 == 1 {
            v |= 1 << j;
        }
    }
    v
}

/// Number of differing bits between two equally sized buffers.
#[inline]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}
