//! Input events for the remote app
//!
//! The controller forwards opaque bytes; this module produces them in the
//! JSON format the app server reads from the data channel.

pub mod types;

pub use types::{InputEvent, InputKind, KeyPayload, MousePayload};

use crate::error::{AppError, Result};

/// Parse a text command into an input event
///
/// ```text
/// keydown <code>        keyup <code>
/// mousedown <x> <y> [right]
/// mouseup <x> <y> [right]
/// move <x> <y>
/// ```
///
/// Pointer coordinates are relative to `screen` (width, height). Blank
/// lines yield `None`.
pub fn parse_command(line: &str, screen: (f64, f64)) -> Result<Option<InputEvent>> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let number = |index: usize| -> Result<f64> {
        let raw = args
            .get(index)
            .ok_or_else(|| AppError::Decode(format!("'{}' needs more arguments", command)))?;
        raw.parse::<f64>()
            .map_err(|_| AppError::Decode(format!("'{}' is not a number", raw)))
    };
    let pointer = || -> Result<MousePayload> {
        let payload = MousePayload::new(number(0)?, number(1)?, screen.0, screen.1);
        Ok(match args.get(2) {
            Some(&"right") => payload.right_button(),
            _ => payload,
        })
    };
    let key_code = || -> Result<u32> {
        let raw = args
            .first()
            .ok_or_else(|| AppError::Decode(format!("'{}' needs a key code", command)))?;
        raw.parse::<u32>()
            .map_err(|_| AppError::Decode(format!("Invalid key code '{}'", raw)))
    };

    let event = match command.to_ascii_lowercase().as_str() {
        "keydown" => InputEvent::key_down(key_code()?),
        "keyup" => InputEvent::key_up(key_code()?),
        "mousedown" => InputEvent::MouseDown(pointer()?),
        "mouseup" => InputEvent::MouseUp(pointer()?),
        "move" | "mousemove" => InputEvent::MouseMove(pointer()?),
        other => return Err(AppError::Decode(format!("Unknown command '{}'", other))),
    };
    Ok(Some(event))
}
