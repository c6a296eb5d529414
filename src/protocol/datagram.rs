//! Binary encoding for the datagram transport: `[type:1][id:2 BE]` followed by
//! NUL-terminated ASCII fields in a fixed per-variant order. REPLY carries a
//! result byte and a big-endian ref id before its reason field; CONFIRM and
//! BYE are header-only.

use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::message::{Message, MessageType};

/// length of the fixed `[type][id_hi][id_lo]` header
pub const HEADER_LEN: usize = 3;

pub fn ser(msg: &Message, buf: &mut BytesMut) {
    buf.put_u8(msg.message_type().into());
    buf.put_u16(msg.id());

    match msg {
        Message::Auth { username, display_name, secret, .. } => {
            put_str(buf, username);
            put_str(buf, display_name);
            put_str(buf, secret);
        }
        Message::Join { channel_id, display_name, .. } => {
            put_str(buf, channel_id);
            put_str(buf, display_name);
        }
        Message::Msg { display_name, content, .. } | Message::Err { display_name, content, .. } => {
            put_str(buf, display_name);
            put_str(buf, content);
        }
        Message::Reply { success, ref_id, reason, .. } => {
            buf.put_u8(*success as u8);
            buf.put_u16(*ref_id);
            put_str(buf, reason);
        }
        Message::Bye { .. } | Message::Confirm { .. } => {}
    }
}

pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Message> {
    let type_byte = buf.try_get_u8()?;
    let tpe = MessageType::try_from(type_byte)
        .map_err(|_| anyhow!("unknown message type 0x{:02x}", type_byte))?;
    let id = buf.try_get_u16()?;

    let msg = match tpe {
        MessageType::Confirm => Message::Confirm { ref_id: id },
        MessageType::Reply => {
            let success = match buf.try_get_u8()? {
                0 => false,
                1 => true,
                b => bail!("invalid REPLY result byte 0x{:02x}", b),
            };
            let ref_id = buf.try_get_u16()?;
            let reason = take_str(buf)?;
            Message::Reply { id, success, ref_id, reason }
        }
        MessageType::Auth => Message::Auth {
            id,
            username: take_str(buf)?,
            display_name: take_str(buf)?,
            secret: take_str(buf)?,
        },
        MessageType::Join => Message::Join {
            id,
            channel_id: take_str(buf)?,
            display_name: take_str(buf)?,
        },
        MessageType::Msg => Message::Msg {
            id,
            display_name: take_str(buf)?,
            content: take_str(buf)?,
        },
        MessageType::Err => Message::Err {
            id,
            display_name: take_str(buf)?,
            content: take_str(buf)?,
        },
        MessageType::Bye => Message::Bye { id },
    };

    if buf.has_remaining() {
        bail!("{} trailing bytes after the final field", buf.remaining());
    }
    Ok(msg)
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn take_str(buf: &mut impl Buf) -> anyhow::Result<String> {
    let mut raw = Vec::new();
    loop {
        if !buf.has_remaining() {
            bail!("string field without NUL terminator");
        }
        match buf.get_u8() {
            0 => break,
            b => raw.push(b),
        }
    }
    Ok(String::from_utf8(raw)?)
}
