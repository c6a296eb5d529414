//! Textual encoding for the stream transport: CRLF-terminated ASCII lines
//! using the keyword grammar `AUTH u AS d USING s`, `JOIN c AS d`,
//! `MSG FROM d IS content`, `ERR FROM d IS content`, `REPLY OK|NOK IS reason`
//! and `BYE`. CONFIRM exists only on the datagram wire.

use anyhow::{anyhow, bail};

use crate::protocol::message::Message;

pub fn ser(msg: &Message) -> anyhow::Result<String> {
    let line = match msg {
        Message::Auth { username, display_name, secret, .. } => {
            format!("AUTH {} AS {} USING {}\r\n", username, display_name, secret)
        }
        Message::Join { channel_id, display_name, .. } => {
            format!("JOIN {} AS {}\r\n", channel_id, display_name)
        }
        Message::Msg { display_name, content, .. } => {
            format!("MSG FROM {} IS {}\r\n", display_name, content)
        }
        Message::Err { display_name, content, .. } => {
            format!("ERR FROM {} IS {}\r\n", display_name, content)
        }
        Message::Reply { success, reason, .. } => {
            format!("REPLY {} IS {}\r\n", if *success { "OK" } else { "NOK" }, reason)
        }
        Message::Bye { .. } => "BYE\r\n".to_owned(),
        Message::Confirm { .. } => bail!("CONFIRM has no textual representation"),
    };
    Ok(line)
}

/// Parses one line with the CRLF already stripped. The textual encoding
///  carries no message ids, so `id` / `ref_id` are filled with 0.
pub fn deser(line: &str) -> anyhow::Result<Message> {
    if line == "BYE" {
        return Ok(Message::Bye { id: 0 });
    }
    if let Some(rest) = line.strip_prefix("AUTH ") {
        let (username, rest) = split_at_keyword(rest, " AS ")?;
        let (display_name, secret) = split_at_keyword(rest, " USING ")?;
        return Ok(Message::Auth {
            id: 0,
            username: username.to_owned(),
            display_name: display_name.to_owned(),
            secret: secret.to_owned(),
        });
    }
    if let Some(rest) = line.strip_prefix("JOIN ") {
        let (channel_id, display_name) = split_at_keyword(rest, " AS ")?;
        return Ok(Message::Join {
            id: 0,
            channel_id: channel_id.to_owned(),
            display_name: display_name.to_owned(),
        });
    }
    if let Some(rest) = line.strip_prefix("MSG FROM ") {
        let (display_name, content) = split_at_keyword(rest, " IS ")?;
        return Ok(Message::Msg {
            id: 0,
            display_name: display_name.to_owned(),
            content: content.to_owned(),
        });
    }
    if let Some(rest) = line.strip_prefix("ERR FROM ") {
        let (display_name, content) = split_at_keyword(rest, " IS ")?;
        return Ok(Message::Err {
            id: 0,
            display_name: display_name.to_owned(),
            content: content.to_owned(),
        });
    }
    if let Some(rest) = line.strip_prefix("REPLY ") {
        let (result, reason) = split_at_keyword(rest, " IS ")?;
        let success = match result {
            "OK" => true,
            "NOK" => false,
            other => bail!("invalid REPLY result {:?}", other),
        };
        return Ok(Message::Reply { id: 0, success, ref_id: 0, reason: reason.to_owned() });
    }
    bail!("unrecognized verb in line {:?}", line)
}

fn split_at_keyword<'a>(s: &'a str, keyword: &str) -> anyhow::Result<(&'a str, &'a str)> {
    s.split_once(keyword)
        .ok_or_else(|| anyhow!("missing {} keyword", keyword.trim()))
}
