//! Tiny box-writing helper shared by the fMP4 writer.

/// Append a length-prefixed ISO-BMFF box: reserves 4 bytes for `size`,
/// writes `fourcc`, runs `body`, then backfills `size` with the total box
/// length (including the 8-byte header).
pub fn write_box<F: FnOnce(&mut Vec<u8>)>(buf: &mut Vec<u8>, fourcc: &[u8; 4], body: F) {
    let start = buf.len();
    buf.extend_from_slice(&[0, 0, 0, 0]);
    buf.extend_from_slice(fourcc);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

pub fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Full box header: version + 24-bit flags.
pub fn put_full_box_header(buf: &mut Vec<u8>, version: u8, flags: u32) {
    put_u8(buf, version);
    buf.extend_from_slice(&flags.to_be_bytes()[1..]);
}
