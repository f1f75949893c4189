use crate::common::address::{Long, Target, MAX_RANDOM_ADDRESS};
use crate::common::cmd_defs as cmd;
use crate::common::cmd_defs::{MASK, YES};
use crate::common::status::flag;

extern crate rand;
use rand::Rng;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitialisationState {
    Enabled,
    Disabled,
    Withdrawn,
}

/// Simulated control gear.
///
/// Only the commands used by the gateway driver are implemented.
/// Configuration commands are only accepted when sent twice.
#[derive(Debug, Clone)]
pub struct SimGear {
    pub actual_level: u8,
    pub short_address: u8,
    pub search_address: Long,
    pub random_address: Long,
    /// Address generated by RANDOMISE. A random one if not set.
    pub fixed_random: Option<Long>,
    pub initialisation_state: InitialisationState,
    pub reset_state: bool,
    pub dtr0: u8,
}

impl Default for SimGear {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGear {
    pub fn new() -> SimGear {
        SimGear {
            actual_level: 0xfe,
            short_address: MASK,
            search_address: MAX_RANDOM_ADDRESS,
            random_address: MAX_RANDOM_ADDRESS,
            fixed_random: None,
            initialisation_state: InitialisationState::Disabled,
            reset_state: false,
            dtr0: 0,
        }
    }

    /// Gear that picks `random` when randomised
    pub fn with_random(random: Long) -> SimGear {
        SimGear {
            fixed_random: Some(random),
            ..SimGear::new()
        }
    }

    /// Short address, if any
    pub fn short(&self) -> Option<u8> {
        if self.short_address == MASK {
            None
        } else {
            Some(self.short_address)
        }
    }

    pub fn status(&self) -> u8 {
        let mut status = 0;
        if self.actual_level > 0 {
            status |= flag::LAMP_ON;
        }
        if self.reset_state {
            status |= flag::RESET_STATE;
        }
        if self.short_address == MASK {
            status |= flag::NO_ADDRESS;
        }
        status
    }

    fn addressed(&self, bus: u8) -> bool {
        match Target::from_bus_address(bus) {
            Ok(Target::Broadcast) => true,
            Ok(Target::Short(s)) => s.value() == self.short_address,
            Err(_) => false,
        }
    }

    fn selected(&self) -> bool {
        self.initialisation_state != InitialisationState::Disabled
            && self.random_address == self.search_address
    }

    fn initialise(&mut self, data: u8) {
        let matches = match data {
            cmd::INITIALISE_ALL => true,
            cmd::INITIALISE_NO_ADDR => self.short_address == MASK,
            d if d & 0x81 == 0x01 => (d >> 1) == self.short_address,
            _ => false,
        };
        if matches {
            self.initialisation_state = InitialisationState::Enabled;
        }
    }

    fn set_search_byte(&mut self, shift: u32, data: u8) {
        self.search_address =
            (self.search_address & !(0xff << shift)) | ((data as Long) << shift);
    }

    fn special_command(&mut self, opcode: u8, data: u8, twice: bool) -> Option<u8> {
        if self.initialisation_state == InitialisationState::Disabled
            && !matches!(opcode, cmd::INITIALISE | cmd::DTR0)
        {
            return None;
        }
        match opcode {
            cmd::TERMINATE => self.initialisation_state = InitialisationState::Disabled,
            cmd::DTR0 => self.dtr0 = data,
            cmd::INITIALISE if twice => self.initialise(data),
            cmd::RANDOMISE if twice => {
                self.random_address = self
                    .fixed_random
                    .unwrap_or_else(|| rand::thread_rng().gen_range(0..=MAX_RANDOM_ADDRESS));
            }
            cmd::COMPARE => {
                if self.initialisation_state == InitialisationState::Enabled
                    && self.random_address <= self.search_address
                {
                    return Some(YES);
                }
            }
            cmd::WITHDRAW => {
                if self.initialisation_state == InitialisationState::Enabled
                    && self.random_address == self.search_address
                {
                    self.initialisation_state = InitialisationState::Withdrawn;
                }
            }
            cmd::SEARCHADDRH => self.set_search_byte(16, data),
            cmd::SEARCHADDRM => self.set_search_byte(8, data),
            cmd::SEARCHADDRL => self.set_search_byte(0, data),
            cmd::PROGRAM_SHORT_ADDRESS => {
                if self.selected() {
                    self.short_address = if data == MASK { MASK } else { (data >> 1) & 0x3f };
                }
            }
            cmd::VERIFY_SHORT_ADDRESS => {
                if self.short_address == (data >> 1) & 0x3f {
                    return Some(YES);
                }
            }
            cmd::QUERY_SHORT_ADDRESS => {
                if self.selected() {
                    return Some(if self.short_address == MASK {
                        MASK
                    } else {
                        (self.short_address << 1) | 1
                    });
                }
            }
            _ => {}
        }
        None
    }

    fn device_command(&mut self, opcode: u8, twice: bool) -> Option<u8> {
        match opcode {
            0x00 => self.actual_level = 0,
            0x05 => self.actual_level = cmd::MAX_LEVEL,
            cmd::RESET if twice => {
                self.actual_level = cmd::MAX_LEVEL;
                self.random_address = MAX_RANDOM_ADDRESS;
                self.search_address = MAX_RANDOM_ADDRESS;
                self.reset_state = true;
            }
            cmd::SET_SHORT_ADDRESS if twice => {
                self.short_address = if self.dtr0 == MASK {
                    MASK
                } else {
                    (self.dtr0 >> 1) & 0x3f
                };
            }
            cmd::QUERY_STATUS => return Some(self.status()),
            cmd::QUERY_RESET_STATE => {
                if self.reset_state {
                    return Some(YES);
                }
            }
            cmd::QUERY_ACTUAL_LEVEL => return Some(self.actual_level),
            _ => {}
        }
        None
    }

    /// Handle a forward frame. Returns the answer, if any.
    pub fn frame(&mut self, frame: [u8; 2], twice: bool) -> Option<u8> {
        let [addr, data] = frame;
        if (0xa1..=0xbf).contains(&addr) && addr & 1 == 1 {
            return self.special_command(addr, data, twice);
        }
        if !self.addressed(addr) {
            return None;
        }
        if Target::is_command_byte(addr) {
            self.device_command(data, twice)
        } else {
            if data != MASK {
                self.actual_level = data;
                self.reset_state = false;
            }
            None
        }
    }
}
