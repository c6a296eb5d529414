use anyhow::bail;

use crate::protocol::message;

/// One parsed input line. Lines starting with one of the recognized
///  command verbs are local commands, everything else is chat content.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UserCommand {
    Auth { username: String, secret: String, display_name: String },
    Join { channel_id: String },
    Rename { display_name: String },
    Help,
    Chat { content: String },
}

impl UserCommand {
    /// Parses and validates one input line. An `Err` is a local usage error:
    ///  it is reported to the user, changes no state and sends nothing.
    pub fn parse(line: &str) -> anyhow::Result<UserCommand> {
        if line.is_empty() {
            bail!("Enter non-empty input.");
        }

        if line.starts_with('/') {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts[0] {
                "/auth" => {
                    let (username, secret, display_name) = match parts.as_slice() {
                        [_, username, secret, display_name] => (*username, *secret, *display_name),
                        _ => bail!("Invalid /auth command format. Use: /auth {{Username}} {{Secret}} {{DisplayName}}."),
                    };
                    if !message::is_valid_username(username) {
                        bail!("Invalid Username format. Use only A-z0-9- up to {} characters.", message::MAX_USERNAME_LEN);
                    }
                    if !message::is_valid_secret(secret) {
                        bail!("Invalid Secret format. Use only A-z0-9- up to {} characters.", message::MAX_SECRET_LEN);
                    }
                    if !message::is_valid_display_name(display_name) {
                        bail!("Use maximum {} printable characters for the Display Name.", message::MAX_DISPLAY_NAME_LEN);
                    }
                    return Ok(UserCommand::Auth {
                        username: username.to_owned(),
                        secret: secret.to_owned(),
                        display_name: display_name.to_owned(),
                    });
                }
                "/join" => {
                    let channel_id = match parts.as_slice() {
                        [_, channel_id] => *channel_id,
                        _ => bail!("Invalid /join command format. Use: /join {{ChannelID}}."),
                    };
                    if !message::is_valid_channel_id(channel_id) {
                        bail!("Invalid ChannelID format. Use only A-z0-9- up to {} characters.", message::MAX_CHANNEL_ID_LEN);
                    }
                    return Ok(UserCommand::Join { channel_id: channel_id.to_owned() });
                }
                "/rename" => {
                    let display_name = match parts.as_slice() {
                        [_, display_name] => *display_name,
                        _ => bail!("Invalid /rename command format. Use: /rename {{DisplayName}}."),
                    };
                    if !message::is_valid_display_name(display_name) {
                        bail!("Use maximum {} printable characters for the Display Name.", message::MAX_DISPLAY_NAME_LEN);
                    }
                    return Ok(UserCommand::Rename { display_name: display_name.to_owned() });
                }
                "/help" => return Ok(UserCommand::Help),
                // not a recognized verb: the line is chat content like any other
                _ => {}
            }
        }

        if !message::is_valid_content(line) {
            bail!("Message content must be printable ASCII of at most {} characters.", message::MAX_CONTENT_LEN);
        }
        Ok(UserCommand::Chat { content: line.to_owned() })
    }
}
