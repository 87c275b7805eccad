//! Input handling.
//!
//! A headless client has no window to sample, so input is kept as plain
//! state: the set of held movement keys and the camera yaw. Each send turns
//! that state into an `InputMsg`.

use ballance_shared::{
    input::MoveKeys,
    net::{InputMsg, SessionId},
};

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub keys: MoveKeys,
    /// Rotation of the camera around +Y, radians. Zero looks down +X.
    pub camera_yaw: f32,
}

impl InputState {
    pub fn press(&mut self, key: MoveKeys) {
        self.keys.insert(key);
    }

    pub fn release(&mut self, key: MoveKeys) {
        self.keys.remove(key);
    }

    /// Camera forward projected on the XZ plane.
    pub fn forward_xz(self) -> [f32; 2] {
        let (sin, cos) = self.camera_yaw.sin_cos();
        [cos, -sin]
    }
}

/// Turns the current input state into an `InputMsg`.
pub fn build_input(session_id: SessionId, input: InputState) -> InputMsg {
    InputMsg {
        session_id,
        keys: input.keys.to_tokens(),
        forward_xz: input.forward_xz(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn zero_yaw_faces_positive_x() {
        assert_eq!(InputState::default().forward_xz(), [1.0, 0.0]);
    }

    #[test]
    fn quarter_turn_faces_negative_z() {
        let input = InputState {
            camera_yaw: FRAC_PI_2,
            ..Default::default()
        };
        let [x, z] = input.forward_xz();
        assert!(x.abs() < 1e-6);
        assert!((z + 1.0).abs() < 1e-6);
    }

    #[test]
    fn message_carries_held_keys() {
        let mut input = InputState::default();
        input.press(MoveKeys::FORWARD);
        input.press(MoveKeys::LEFT);
        input.release(MoveKeys::FORWARD);
        let msg = build_input(SessionId(4), input);
        assert_eq!(msg.session_id, SessionId(4));
        assert_eq!(msg.keys, vec!["a".to_string()]);
    }
}
