use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Wire-level type tag. The values are shared by both encodings: they are the
///  first byte of every datagram frame, and they select the verb of the
///  textual frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Confirm = 0x00,
    Reply = 0x01,
    Auth = 0x02,
    Join = 0x03,
    Msg = 0x04,
    Err = 0xFE,
    Bye = 0xFF,
}

/// One protocol message. `id` is assigned by the originating side, starting at
///  0 and wrapping mod 65536; CONFIRM carries no id of its own, only the id of
///  the peer message it acknowledges.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Message {
    Auth { id: u16, username: String, display_name: String, secret: String },
    Join { id: u16, channel_id: String, display_name: String },
    Msg { id: u16, display_name: String, content: String },
    Err { id: u16, display_name: String, content: String },
    Reply { id: u16, success: bool, ref_id: u16, reason: String },
    Bye { id: u16 },
    Confirm { ref_id: u16 },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Auth { .. } => MessageType::Auth,
            Message::Join { .. } => MessageType::Join,
            Message::Msg { .. } => MessageType::Msg,
            Message::Err { .. } => MessageType::Err,
            Message::Reply { .. } => MessageType::Reply,
            Message::Bye { .. } => MessageType::Bye,
            Message::Confirm { .. } => MessageType::Confirm,
        }
    }

    /// The id transmitted in the frame header. For CONFIRM this is the
    ///  referenced id - a CONFIRM frame has no id of its own.
    pub fn id(&self) -> u16 {
        match self {
            Message::Auth { id, .. } => *id,
            Message::Join { id, .. } => *id,
            Message::Msg { id, .. } => *id,
            Message::Err { id, .. } => *id,
            Message::Reply { id, .. } => *id,
            Message::Bye { id } => *id,
            Message::Confirm { ref_id } => *ref_id,
        }
    }
}

pub const MAX_USERNAME_LEN: usize = 20;
pub const MAX_SECRET_LEN: usize = 128;
pub const MAX_DISPLAY_NAME_LEN: usize = 20;
pub const MAX_CHANNEL_ID_LEN: usize = 20;
pub const MAX_CONTENT_LEN: usize = 1400;

fn is_ident(s: &str, max_len: usize) -> bool {
    !s.is_empty()
        && s.len() <= max_len
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

pub fn is_valid_username(s: &str) -> bool {
    is_ident(s, MAX_USERNAME_LEN)
}

pub fn is_valid_secret(s: &str) -> bool {
    is_ident(s, MAX_SECRET_LEN)
}

pub fn is_valid_channel_id(s: &str) -> bool {
    is_ident(s, MAX_CHANNEL_ID_LEN)
}

/// printable ASCII without space, so a display name can never swallow the
///  keyword grammar of the textual encoding
pub fn is_valid_display_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_DISPLAY_NAME_LEN
        && s.bytes().all(|b| (0x21..=0x7E).contains(&b))
}

/// printable ASCII including space - free of both wire delimiters (NUL, CRLF)
pub fn is_valid_content(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_CONTENT_LEN
        && s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}
