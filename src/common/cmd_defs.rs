// Second byte of addressed commands
pub const RESET: u8 = 0x20;
pub const SET_SHORT_ADDRESS: u8 = 0x80;

pub const QUERY_STATUS: u8 = 0x90;
pub const QUERY_RESET_STATE: u8 = 0x95;
pub const QUERY_ACTUAL_LEVEL: u8 = 0xa0;

// First byte of special commands
pub const TERMINATE: u8 = 0xa1;
pub const DTR0: u8 = 0xa3;
pub const INITIALISE: u8 = 0xa5;
pub const RANDOMISE: u8 = 0xa7;
pub const COMPARE: u8 = 0xa9;
pub const WITHDRAW: u8 = 0xab;
pub const SEARCHADDRH: u8 = 0xb1;
pub const SEARCHADDRM: u8 = 0xb3;
pub const SEARCHADDRL: u8 = 0xb5;
pub const PROGRAM_SHORT_ADDRESS: u8 = 0xb7;
pub const VERIFY_SHORT_ADDRESS: u8 = 0xb9;
pub const QUERY_SHORT_ADDRESS: u8 = 0xbb;

pub const INITIALISE_ALL: u8 = 0x00;
pub const INITIALISE_NO_ADDR: u8 = 0xff;

/// Answer meaning yes
pub const YES: u8 = 0xff;
/// Value of unset bytes, e.g. short address
pub const MASK: u8 = 0xff;

/// Level for fully on
pub const MAX_LEVEL: u8 = 254;
