/// Logical buttons the host can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    A,
    B,
    Start,
    Select,
    Up,
    Down,
    Left,
    Right,
    TiltUp,
    TiltDown,
    TiltLeft,
    TiltRight,
    Turbo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dpad {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

/// Current button state plus the pending joypad interrupt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Keys {
    pub a: bool,
    pub b: bool,
    pub start: bool,
    pub select: bool,
    pub dpad: Dpad,
    pub tilt: Dpad,
    pub turbo: bool,
    /// Set by a press, consumed by the interrupt check as IF bit 4.
    pub interrupt: bool,
}

impl Keys {
    /// Record a press or release. Returns true if the key is a joypad
    /// button, which requests the joypad interrupt on press.
    pub fn set(&mut self, key: Key, pressed: bool) -> bool {
        let slot = match key {
            Key::A => &mut self.a,
            Key::B => &mut self.b,
            Key::Start => &mut self.start,
            Key::Select => &mut self.select,
            Key::Up => &mut self.dpad.up,
            Key::Down => &mut self.dpad.down,
            Key::Left => &mut self.dpad.left,
            Key::Right => &mut self.dpad.right,
            Key::TiltUp => &mut self.tilt.up,
            Key::TiltDown => &mut self.tilt.down,
            Key::TiltLeft => &mut self.tilt.left,
            Key::TiltRight => &mut self.tilt.right,
            Key::Turbo => {
                self.turbo = pressed;
                return false;
            }
        };
        *slot = pressed;
        let joypad = !matches!(
            key,
            Key::TiltUp | Key::TiltDown | Key::TiltLeft | Key::TiltRight
        );
        if joypad && pressed {
            self.interrupt = true;
        }
        joypad
    }

    /// JOYP value for the given select bits. Pressed buttons read as 0.
    pub fn joyp(&self, joyp: u8) -> u8 {
        let mut ret = joyp | 0x0F;
        if joyp & 0x20 == 0 {
            ret &= !((self.start as u8) << 3
                | (self.select as u8) << 2
                | (self.b as u8) << 1
                | self.a as u8);
        }
        if joyp & 0x10 == 0 {
            ret &= !((self.dpad.down as u8) << 3
                | (self.dpad.up as u8) << 2
                | (self.dpad.left as u8) << 1
                | self.dpad.right as u8);
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_requests_interrupt() {
        let mut keys = Keys::default();
        assert!(keys.set(Key::Start, true));
        assert!(keys.interrupt);
        keys.interrupt = false;
        keys.set(Key::Start, false);
        assert!(!keys.interrupt);
    }

    #[test]
    fn tilt_is_not_a_joypad_key() {
        let mut keys = Keys::default();
        assert!(!keys.set(Key::TiltLeft, true));
        assert!(keys.tilt.left);
        assert!(!keys.interrupt);
    }

    #[test]
    fn joyp_selects_button_group() {
        let mut keys = Keys::default();
        keys.set(Key::A, true);
        keys.set(Key::Down, true);
        // P15 low: buttons.
        assert_eq!(keys.joyp(0x10) & 0x0F, 0x0E);
        // P14 low: directions.
        assert_eq!(keys.joyp(0x20) & 0x0F, 0x07);
        assert_eq!(keys.joyp(0x30) & 0x0F, 0x0F);
    }
}
