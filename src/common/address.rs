use core::str::FromStr;

/// Number of short addresses on one bus
pub const SHORT_ADDRESS_COUNT: u8 = 64;
/// Pseudo-address meaning all devices on the bus
pub const BROADCAST: u8 = 0x7f;

pub const MIN_RANDOM_ADDRESS: Long = 0x000000;
pub const MAX_RANDOM_ADDRESS: Long = 0xffffff;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AddressError {
    NotShort,
    InvalidAddress,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        match self {
            AddressError::NotShort => write!(fmt, "Not a short address"),
            AddressError::InvalidAddress => write!(fmt, "InvalidAddress"),
        }
    }
}

impl std::error::Error for AddressError {}

/// Short address 0..64, assigned during commissioning.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Short(u8);

impl Short {
    pub fn new(a: u8) -> Short {
        assert!(a < SHORT_ADDRESS_COUNT);
        Short(a)
    }

    pub fn try_new<A>(a: A) -> Result<Short, AddressError>
    where
        A: TryInto<u8>,
    {
        let Ok(a) = a.try_into() else {
            return Err(AddressError::InvalidAddress);
        };
        if a < SHORT_ADDRESS_COUNT {
            Ok(Short(a))
        } else {
            Err(AddressError::InvalidAddress)
        }
    }

    /// The next address, if there is one
    pub fn next(&self) -> Option<Short> {
        Short::try_new(self.0 + 1).ok()
    }

    /// Address 0..64
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Byte used when the device stores this address, e.g. PROGRAM SHORT
    /// ADDRESS or DTR
    pub fn program_byte(&self) -> u8 {
        (self.0 << 1) | 1
    }
}

impl std::fmt::Display for Short {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        write!(fmt, "{:02X}", self.0)
    }
}

impl FromStr for Short {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u8::from_str(s).map_or(Err(AddressError::InvalidAddress), Short::try_new)
    }
}

/// 24-bit random address, only used during discovery
pub type Long = u32;

/// Splits a random address into the high, middle and low search bytes
pub fn search_bytes(long: Long) -> [u8; 3] {
    [(long >> 16) as u8, (long >> 8) as u8, long as u8]
}

/// Destination of a command: one device or all of them.
///
/// On the bus the target byte is `2*address` for direct level commands and
/// `2*address+1` for every other command, queries included. The broadcast
/// pseudo-address 0x7f gives 0xfe and 0xff.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Target {
    Short(Short),
    Broadcast,
}

impl Target {
    pub fn from_bus_address(bus: u8) -> Result<Target, AddressError> {
        match bus >> 1 {
            a @ 0..=63 => Ok(Target::Short(Short::new(a))),
            BROADCAST => Ok(Target::Broadcast),
            _ => Err(AddressError::InvalidAddress),
        }
    }

    /// 7-bit address, 0x7f for broadcast
    pub fn raw(&self) -> u8 {
        match self {
            Target::Short(s) => s.value(),
            Target::Broadcast => BROADCAST,
        }
    }

    /// Target byte for direct arc power (level) commands
    pub fn arc_byte(&self) -> u8 {
        self.raw() << 1
    }

    /// Target byte for commands and queries
    pub fn command_byte(&self) -> u8 {
        (self.raw() << 1) | 1
    }

    /// True if the target byte selects a command rather than a level
    pub fn is_command_byte(bus: u8) -> bool {
        bus & 1 == 1
    }
}

impl From<Short> for Target {
    fn from(a: Short) -> Self {
        Target::Short(a)
    }
}

impl std::convert::TryFrom<Target> for Short {
    type Error = AddressError;
    fn try_from(addr: Target) -> Result<Short, Self::Error> {
        if let Target::Short(s) = addr {
            Ok(s)
        } else {
            Err(AddressError::NotShort)
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        match self {
            Target::Short(s) => s.fmt(fmt),
            Target::Broadcast => write!(fmt, "broadcast"),
        }
    }
}
