use gilrs::{Button, Event, EventType, Gilrs};

use super::{DeviceId, DeviceInfo, InputBackend, InputEvent};
use crate::{Result, TimerError};

/// Gamepad backend built on gilrs.
pub struct GilrsInput {
    gilrs: Gilrs,
}

impl GilrsInput {
    pub fn new() -> Result<Self> {
        match Gilrs::new() {
            Ok(gilrs) => Ok(Self { gilrs }),
            Err(gilrs::Error::NotImplemented(_)) => Err(TimerError::InputUnavailable(
                "gamepads are not supported on this platform".into(),
            )),
            Err(err) => Err(TimerError::InputUnavailable(err.to_string())),
        }
    }
}

impl InputBackend for GilrsInput {
    fn devices(&self) -> Vec<DeviceInfo> {
        self.gilrs
            .gamepads()
            .map(|(id, gamepad)| DeviceInfo {
                id: usize::from(id),
                name: gamepad.name().to_string(),
            })
            .collect()
    }

    fn open(&mut self, id: DeviceId) -> Option<DeviceInfo> {
        self.gilrs
            .gamepads()
            .find(|(gamepad_id, _)| usize::from(*gamepad_id) == id)
            .map(|(_, gamepad)| DeviceInfo {
                id,
                name: gamepad.name().to_string(),
            })
    }

    fn poll(&mut self) -> Vec<InputEvent> {
        let mut events = Vec::new();
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            let device = usize::from(id);
            match event {
                EventType::Connected => events.push(InputEvent::DeviceAdded(device)),
                EventType::Disconnected => events.push(InputEvent::DeviceRemoved(device)),
                EventType::ButtonPressed(button, code) => match button_index(button) {
                    Some(button) => events.push(InputEvent::ButtonDown { device, button }),
                    None => tracing::debug!(?code, "ignoring unmapped button"),
                },
                _ => {}
            }
        }
        events
    }
}

/// Stable index for a gamepad button, in XInput order (RB is 5).
pub fn button_index(button: Button) -> Option<u32> {
    let index = match button {
        Button::South => 0,
        Button::East => 1,
        Button::West => 2,
        Button::North => 3,
        Button::LeftTrigger => 4,
        Button::RightTrigger => 5,
        Button::Select => 6,
        Button::Start => 7,
        Button::LeftThumb => 8,
        Button::RightThumb => 9,
        Button::Mode => 10,
        Button::DPadUp => 11,
        Button::DPadDown => 12,
        Button::DPadLeft => 13,
        Button::DPadRight => 14,
        Button::LeftTrigger2 => 15,
        Button::RightTrigger2 => 16,
        Button::C => 17,
        Button::Z => 18,
        Button::Unknown => return None,
    };
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn right_bumper_is_index_five() {
        assert_eq!(button_index(Button::RightTrigger), Some(5));
        assert_eq!(button_index(Button::South), Some(0));
        assert_eq!(button_index(Button::Unknown), None);
    }

    #[test]
    fn indices_are_unique() {
        let buttons = [
            Button::South,
            Button::East,
            Button::West,
            Button::North,
            Button::LeftTrigger,
            Button::RightTrigger,
            Button::Select,
            Button::Start,
            Button::LeftThumb,
            Button::RightThumb,
            Button::Mode,
            Button::DPadUp,
            Button::DPadDown,
            Button::DPadLeft,
            Button::DPadRight,
            Button::LeftTrigger2,
            Button::RightTrigger2,
            Button::C,
            Button::Z,
        ];
        let mut indices: Vec<u32> = buttons.iter().filter_map(|b| button_index(*b)).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), buttons.len());
    }
}
