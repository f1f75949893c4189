use std::time::Duration;

/// Minimum time the gateway needs to transmit a frame
pub const TX_DELAY: Duration = Duration::from_millis(125);
/// Devices answer QUERY RESET STATE within this time
pub const RX_DELAY: Duration = Duration::from_millis(200);
/// Attempts for QUERY ACTUAL LEVEL
pub const LEVEL_QUERY_ATTEMPTS: u32 = 5;
/// Length of a level reply, e.g. `JFE\n`
pub const LEVEL_READ_WINDOW: usize = 4;
/// Longest wait for a fixed length read
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// How long to wait after writing a request, by kind of exchange
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExchangeClass {
    /// Commands without reply
    Write,
    /// Queries answered with a coded reply, e.g. QUERY STATUS or COMPARE
    CodedQuery,
    /// Queries with a guaranteed reply time, e.g. QUERY RESET STATE
    TimedQuery,
    /// RESET. Devices need time to reinitialise before the next command.
    Reset,
    /// Requests answered by the gateway itself
    Gateway,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingPolicy {
    pub short_unit: Duration,
    pub long_unit: Duration,
    /// Retry budget for level queries. Other queries are read once.
    pub level_attempts: u32,
    pub level_read_window: usize,
    pub read_timeout: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        TimingPolicy {
            short_unit: TX_DELAY,
            long_unit: RX_DELAY,
            level_attempts: LEVEL_QUERY_ATTEMPTS,
            level_read_window: LEVEL_READ_WINDOW,
            read_timeout: READ_TIMEOUT,
        }
    }
}

impl TimingPolicy {
    pub fn pre_read_delay(&self, class: ExchangeClass) -> Duration {
        match class {
            ExchangeClass::Write | ExchangeClass::CodedQuery => self.short_unit,
            ExchangeClass::TimedQuery => self.long_unit,
            ExchangeClass::Reset => self.short_unit * 4,
            ExchangeClass::Gateway => self.short_unit / 2,
        }
    }

    /// At least one attempt is always made
    pub fn level_attempts(&self) -> u32 {
        self.level_attempts.max(1)
    }
}

#[test]
fn default_delays() {
    let t = TimingPolicy::default();
    assert_eq!(t.pre_read_delay(ExchangeClass::Write), Duration::from_millis(125));
    assert_eq!(t.pre_read_delay(ExchangeClass::CodedQuery), Duration::from_millis(125));
    assert_eq!(t.pre_read_delay(ExchangeClass::TimedQuery), Duration::from_millis(200));
    assert_eq!(t.pre_read_delay(ExchangeClass::Reset), Duration::from_millis(500));
    assert_eq!(t.level_attempts(), 5);
    let t = TimingPolicy {
        level_attempts: 0,
        ..TimingPolicy::default()
    };
    assert_eq!(t.level_attempts(), 1);
}
