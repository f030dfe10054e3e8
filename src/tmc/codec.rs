//! TMC UART datagram codec.
//!
//! The MCU bit-bangs TMC datagrams over a GPIO pin, so the host pre-computes
//! the line bits: every byte becomes a 10-bit unit (start bit 0, eight data
//! bits LSB-first, stop bit 1) and the units are packed little-endian into
//! the byte string handed to `tmcuart_send`.
//!
//! # Datagrams
//!
//! - Read request: sync, slave address, register, CRC8 (4 bytes, 5 framed)
//! - Write request / read reply: sync, address, register, value big-endian,
//!   CRC8 (8 bytes, 10 framed)
//!
//! Replies from the driver use sync `0x05` and master address `0xff`.

use heapless::Vec;

use crate::error::CodecError;

/// Sync nibble sent by the host.
pub const HOST_SYNC: u8 = 0xf5;

/// Sync byte of driver replies.
pub const REPLY_SYNC: u8 = 0x05;

/// Address field of driver replies.
pub const REPLY_ADDRESS: u8 = 0xff;

/// Register bit marking a write access.
pub const WRITE_BIT: u8 = 0x80;

/// Longest message that fits a single frame.
pub const MAX_MESSAGE_LEN: usize = 8;

/// Length of a framed 8-byte datagram.
pub const FRAME_LEN: usize = 10;

/// Bit-stuffed datagram as sent on the wire.
pub type Frame = Vec<u8, FRAME_LEN>;

/// CRC8-ATM over a datagram, as the TMC22xx family computes it.
///
/// The register shifts MSB-first while data bits are consumed LSB-first.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut current = byte;
        for _ in 0..8 {
            if ((crc >> 7) ^ (current & 0x01)) != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
            current >>= 1;
        }
    }
    crc
}

/// Frame a message with start and stop bits.
///
/// # Errors
///
/// Returns `CodecError::MessageTooLong` for messages over 8 bytes.
pub fn add_serial_bits(msg: &[u8]) -> Result<Frame, CodecError> {
    if msg.len() > MAX_MESSAGE_LEN {
        return Err(CodecError::MessageTooLong(msg.len()));
    }
    Ok(pack(msg))
}

/// Recover `len` message bytes from a frame, checking every start and stop bit.
///
/// # Errors
///
/// Returns `CodecError::FrameLength` when the frame size does not match
/// `len`, or `CodecError::Framing` naming the first byte with a bad bit.
pub fn strip_serial_bits(frame: &[u8], len: usize) -> Result<Vec<u8, MAX_MESSAGE_LEN>, CodecError> {
    if len > MAX_MESSAGE_LEN {
        return Err(CodecError::MessageTooLong(len));
    }
    let expected = framed_len(len);
    if frame.len() != expected {
        return Err(CodecError::FrameLength {
            actual: frame.len(),
            expected,
        });
    }

    let bits = frame
        .iter()
        .enumerate()
        .fold(0u128, |acc, (i, &b)| acc | (b as u128) << (8 * i));

    let mut msg = Vec::new();
    for i in 0..len {
        let unit = (bits >> (10 * i)) & 0x3ff;
        if unit & 0x001 != 0 || unit & 0x200 == 0 {
            return Err(CodecError::Framing(i));
        }
        // Capacity is MAX_MESSAGE_LEN and len was checked above
        let _ = msg.push((unit >> 1) as u8);
    }
    Ok(msg)
}

/// Frame a register read request.
pub fn encode_read(sync: u8, address: u8, register: u8) -> Frame {
    let mut msg = [sync, address, register, 0];
    msg[3] = crc8(&msg[..3]);
    pack(&msg)
}

/// Frame a register datagram carrying `value`.
///
/// The register byte is used as given, which is also the layout of a driver's
/// read reply.
pub fn encode_write(sync: u8, address: u8, register: u8, value: u32) -> Frame {
    let v = value.to_be_bytes();
    let mut msg = [sync, address, register, v[0], v[1], v[2], v[3], 0];
    msg[7] = crc8(&msg[..7]);
    pack(&msg)
}

/// Frame a host write of `value` to `register`.
pub fn encode_write_request(sync: u8, address: u8, register: u8, value: u32) -> Frame {
    encode_write(sync, address, register | WRITE_BIT, value)
}

/// Extract the value from a framed read reply.
///
/// Returns `None` unless the frame is exactly what the driver would send for
/// `register`, including start/stop bits and CRC.
pub fn decode_read(register: u8, data: &[u8]) -> Option<u32> {
    if data.len() != FRAME_LEN {
        return None;
    }

    let bits = data
        .iter()
        .enumerate()
        .fold(0u128, |acc, (i, &b)| acc | (b as u128) << (8 * i));

    let byte_at = |offset: u32| ((bits >> offset) & 0xff) as u32;
    let value = byte_at(31) << 24 | byte_at(41) << 16 | byte_at(51) << 8 | byte_at(61);

    if encode_write(REPLY_SYNC, REPLY_ADDRESS, register, value).as_slice() != data {
        return None;
    }
    Some(value)
}

/// Lowercase hex form used for byte-string command arguments.
pub fn hex(bytes: &[u8]) -> heapless::String<{ 2 * FRAME_LEN }> {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = heapless::String::new();
    for &b in bytes.iter().take(FRAME_LEN) {
        let _ = out.push(DIGITS[(b >> 4) as usize] as char);
        let _ = out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

fn framed_len(len: usize) -> usize {
    (10 * len + 7) / 8
}

/// Bit-stuff at most [`MAX_MESSAGE_LEN`] bytes.
fn pack(msg: &[u8]) -> Frame {
    let mut bits = 0u128;
    for (i, &b) in msg.iter().take(MAX_MESSAGE_LEN).enumerate() {
        let unit = ((b as u128) << 1) | 0x200;
        bits |= unit << (10 * i);
    }

    let mut frame = Frame::new();
    for i in 0..framed_len(msg.len().min(MAX_MESSAGE_LEN)) {
        // Ten bytes cover eight framed units
        let _ = frame.push((bits >> (8 * i)) as u8);
    }
    frame
}
