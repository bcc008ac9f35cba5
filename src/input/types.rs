//! Input event types sent over the data channel

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Event tag as the app server expects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputKind {
    KeyDown,
    KeyUp,
    MouseDown,
    MouseUp,
    MouseMove,
}

/// Keyboard payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPayload {
    /// Browser `keyCode`
    pub key_code: u32,
}

/// Pointer payload, in pixels of the rendered video
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MousePayload {
    /// 1 for the left button, 0 otherwise
    pub is_left: u8,
    pub x: f64,
    pub y: f64,
    /// Size of the rendered video, lets the server scale coordinates
    pub width: f64,
    pub height: f64,
}

impl MousePayload {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            is_left: 1,
            x,
            y,
            width,
            height,
        }
    }

    pub fn right_button(mut self) -> Self {
        self.is_left = 0;
        self
    }
}

/// Input event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    KeyDown(KeyPayload),
    KeyUp(KeyPayload),
    MouseDown(MousePayload),
    MouseUp(MousePayload),
    MouseMove(MousePayload),
}

/// Outer message; `data` holds the payload as a JSON string
#[derive(Debug, Serialize)]
struct WireInput {
    #[serde(rename = "type")]
    kind: InputKind,
    data: String,
}

impl InputEvent {
    pub fn key_down(key_code: u32) -> Self {
        Self::KeyDown(KeyPayload { key_code })
    }

    pub fn key_up(key_code: u32) -> Self {
        Self::KeyUp(KeyPayload { key_code })
    }

    pub fn kind(&self) -> InputKind {
        match self {
            Self::KeyDown(_) => InputKind::KeyDown,
            Self::KeyUp(_) => InputKind::KeyUp,
            Self::MouseDown(_) => InputKind::MouseDown,
            Self::MouseUp(_) => InputKind::MouseUp,
            Self::MouseMove(_) => InputKind::MouseMove,
        }
    }

    /// Serialize to the data channel JSON format
    pub fn to_json(&self) -> Result<String> {
        let data = match self {
            Self::KeyDown(key) | Self::KeyUp(key) => serde_json::to_string(key)?,
            Self::MouseDown(mouse) | Self::MouseUp(mouse) | Self::MouseMove(mouse) => {
                serde_json::to_string(mouse)?
            }
        };
        Ok(serde_json::to_string(&WireInput {
            kind: self.kind(),
            data,
        })?)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(self.to_json()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_wire_format() {
        let json = InputEvent::key_down(65).to_json().unwrap();
        assert_eq!(json, r#"{"type":"KEYDOWN","data":"{\"keyCode\":65}"}"#);

        let json = InputEvent::key_up(13).to_json().unwrap();
        assert_eq!(json, r#"{"type":"KEYUP","data":"{\"keyCode\":13}"}"#);
    }

    #[test]
    fn test_mouse_payload_is_nested_string() {
        let event = InputEvent::MouseDown(MousePayload::new(10.0, 20.5, 1280.0, 720.0).right_button());
        let outer: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(outer["type"], "MOUSEDOWN");
        let inner: serde_json::Value = serde_json::from_str(outer["data"].as_str().unwrap()).unwrap();
        assert_eq!(inner["isLeft"], 0);
        assert_eq!(inner["y"], 20.5);
        assert_eq!(inner["width"], 1280.0);
    }
}
