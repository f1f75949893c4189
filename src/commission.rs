//! Give unaddressed devices short addresses.
//!
//! All devices are reset and randomised, then a binary search over the
//! 24-bit random address space finds the device with the lowest random
//! address. That device is programmed with the next free short address and
//! withdrawn from further searches. The search restarts until no device
//! answers or the short addresses run out.

use crate::common::address::{
    Long, Short, Target, MAX_RANDOM_ADDRESS, MIN_RANDOM_ADDRESS, SHORT_ADDRESS_COUNT,
};
use crate::common::cmd_defs::MAX_LEVEL;
use crate::error::TransportError;
use crate::gateway::GatewayDriver;
use log::{debug, info, warn};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommissionState {
    Idle,
    AllOff,
    Reset,
    Initialize,
    Randomize,
    Searching,
    Assigning,
    Done,
}

#[derive(Debug, Clone)]
pub struct CommissionOptions {
    /// Flash each device after it's been given an address
    pub blink: bool,
    /// How long the device is kept off and on when flashing
    pub blink_hold: Duration,
    /// Stop after this many devices. Never more than 64.
    pub max_devices: u8,
}

impl Default for CommissionOptions {
    fn default() -> Self {
        CommissionOptions {
            blink: true,
            blink_hold: Duration::from_secs(1),
            max_devices: SHORT_ADDRESS_COUNT,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub short: Short,
    pub long: Long,
}

/// Why commissioning stopped
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    /// A search round found no device
    NoDevicesLeft,
    /// Every short address has been handed out
    AddressSpaceExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissioningReport {
    /// In order of assignment, short addresses 0, 1, 2...
    pub assigned: Vec<Assignment>,
    pub termination: Termination,
}

/// Discovery state of one commissioning run.
///
/// During a search round `low < high` and every device not yet found has a
/// random address above `low`, or at 0 while `low` is still 0. Devices found
/// earlier have been withdrawn.
#[derive(Debug)]
pub struct CommissioningSession {
    low: Long,
    high: Long,
    /// A device answered the extra COMPARE at address 0
    floor_found: bool,
    next_short: u8,
    state: CommissionState,
}

impl Default for CommissioningSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CommissioningSession {
    pub fn new() -> CommissioningSession {
        CommissioningSession {
            low: MIN_RANDOM_ADDRESS,
            high: MAX_RANDOM_ADDRESS,
            floor_found: false,
            next_short: 0,
            state: CommissionState::Idle,
        }
    }

    pub fn state(&self) -> CommissionState {
        self.state
    }

    fn enter(&mut self, state: CommissionState) {
        debug!("Commissioning {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub fn bounds(&self) -> (Long, Long) {
        (self.low, self.high)
    }

    pub fn restart_search(&mut self) {
        self.low = MIN_RANDOM_ADDRESS;
        self.high = MAX_RANDOM_ADDRESS;
        self.floor_found = false;
    }

    /// Midpoint of the current bounds
    pub fn guess(&self) -> Long {
        (self.low + self.high) / 2
    }

    /// Narrow the bounds after a COMPARE at the current guess
    pub fn narrow(&mut self, found_at_or_below: bool) {
        let guess = self.guess();
        if found_at_or_below {
            self.high = guess;
        } else {
            self.low = guess;
        }
    }

    pub fn converged(&self) -> bool {
        self.high - self.low <= 1
    }

    /// True if the search converged at the bottom of the range. The
    /// guesses never reach address 0, so it has to be compared separately.
    pub fn at_floor(&self) -> bool {
        self.converged() && self.low == MIN_RANDOM_ADDRESS
    }

    /// Result of COMPARE with the search address at 0
    pub fn resolve_floor(&mut self, found: bool) {
        self.floor_found = found;
    }

    /// Random address the converged search resolved to. None if no device
    /// answered during the round.
    pub fn found(&self) -> Option<Long> {
        if self.floor_found {
            Some(MIN_RANDOM_ADDRESS)
        } else if self.converged() && self.high != MAX_RANDOM_ADDRESS {
            Some(self.low + 1)
        } else {
            None
        }
    }

    /// Short address to hand out next, unless `limit` addresses have
    /// been assigned
    pub fn next_short_address(&self, limit: u8) -> Option<Short> {
        if self.next_short >= limit.min(SHORT_ADDRESS_COUNT) {
            None
        } else {
            Short::try_new(self.next_short).ok()
        }
    }

    fn advance(&mut self) {
        self.next_short += 1;
    }
}

/// Run one binary search over the whole random address range.
///
/// Returns the random address of the unaddressed device with the lowest
/// random address.
pub async fn search_round(
    driver: &mut GatewayDriver,
    session: &mut CommissioningSession,
) -> Result<Option<Long>, TransportError> {
    session.restart_search();
    while !session.converged() {
        let guess = session.guess();
        driver.set_search_address(guess).await?;
        let found = driver.compare().await?;
        session.narrow(found);
        debug!(
            "Compare {:06x}: {}, current random address {:06x}",
            guess,
            if found { "yes" } else { "no" },
            session.guess() + 1
        );
    }
    if session.at_floor() {
        driver.set_search_address(MIN_RANDOM_ADDRESS).await?;
        let found = driver.compare().await?;
        session.resolve_floor(found);
    }
    Ok(session.found())
}

/// Program the device with random address `long` and withdraw it
async fn assign_address(
    driver: &mut GatewayDriver,
    short: Short,
    long: Long,
    options: &CommissionOptions,
) -> Result<(), TransportError> {
    // The search address must be reloaded, the last COMPARE may have
    // been above or below the device
    driver.set_search_address(long).await?;
    driver.program_short_address(short).await?;
    driver.withdraw().await?;
    info!("Short address {} assigned to {:06x}", short, long);

    if options.blink {
        driver.set_level(short, 0).await?;
        driver.wait(options.blink_hold).await;
        driver.set_level(short, MAX_LEVEL).await?;
        driver.wait(options.blink_hold).await;
        driver.set_level(short, 0).await?;
    }
    Ok(())
}

async fn run<F>(
    driver: &mut GatewayDriver,
    session: &mut CommissioningSession,
    options: &CommissionOptions,
    on_assigned: &mut F,
) -> Result<CommissioningReport, TransportError>
where
    F: FnMut(&Assignment) + Send,
{
    // Keep the lights from flashing during the search
    session.enter(CommissionState::AllOff);
    driver.set_level(Target::Broadcast, 0).await?;
    session.enter(CommissionState::Reset);
    driver.reset(Target::Broadcast).await?;
    session.enter(CommissionState::Initialize);
    driver.initialize().await?;
    session.enter(CommissionState::Randomize);
    driver.randomize().await?;

    info!("Searching for random addresses");
    let mut assigned = Vec::new();
    let termination = loop {
        let Some(short) = session.next_short_address(options.max_devices) else {
            break Termination::AddressSpaceExhausted;
        };
        session.enter(CommissionState::Searching);
        let Some(long) = search_round(driver, session).await? else {
            break Termination::NoDevicesLeft;
        };
        session.enter(CommissionState::Assigning);
        assign_address(driver, short, long, options).await?;
        session.advance();
        let assignment = Assignment { short, long };
        on_assigned(&assignment);
        assigned.push(assignment);
    };
    Ok(CommissioningReport {
        assigned,
        termination,
    })
}

/// Assign short addresses to every device on the bus.
///
/// Any existing short addresses are lost. `on_assigned` is called after each
/// device has been programmed. The run always ends with TERMINATE, also
/// when it's aborted by a transport error.
pub async fn commission<F>(
    driver: &mut GatewayDriver,
    options: &CommissionOptions,
    mut on_assigned: F,
) -> Result<CommissioningReport, TransportError>
where
    F: FnMut(&Assignment) + Send,
{
    let mut session = CommissioningSession::new();
    let res = run(driver, &mut session, options, &mut on_assigned).await;
    let started = session.state() != CommissionState::Idle;
    session.enter(CommissionState::Done);
    match res {
        Ok(report) => {
            driver.terminate().await?;
            info!(
                "Commissioning completed, {} devices addressed ({:?})",
                report.assigned.len(),
                report.termination
            );
            Ok(report)
        }
        Err(e) => {
            warn!("Commissioning aborted: {}", e);
            if started {
                let _ = driver.terminate().await;
            }
            Err(e)
        }
    }
}

pub type CommissionItem = Result<Assignment, TransportError>;

async fn commission_task(
    tx: Sender<CommissionItem>,
    driver: Arc<Mutex<GatewayDriver>>,
    options: CommissionOptions,
) {
    let mut d = driver.lock().await;
    let cb_tx = tx.clone();
    let res = commission(&mut d, &options, move |a| {
        if cb_tx.try_send(Ok(*a)).is_err() {
            warn!("Assignment of {} not delivered", a.short);
        }
    })
    .await;
    if let Err(e) = res {
        let _ = tx.send(Err(e)).await;
    }
}

/// Commission on a shared driver.
///
/// The driver is locked for the whole run so no other exchanges can be
/// interleaved. Returns a stream of assignments, ending with an error if
/// the run was aborted.
pub fn commission_shared(
    driver: Arc<Mutex<GatewayDriver>>,
    options: CommissionOptions,
) -> Pin<Box<dyn Stream<Item = CommissionItem> + Send>> {
    let (tx, rx) = tokio::sync::mpsc::channel(SHORT_ADDRESS_COUNT as usize + 1);
    tokio::spawn(commission_task(tx, driver, options));
    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::cmd_defs as cmd;
    use crate::gateway::frame::{CommandFrame, Opcode};
    use crate::gateway::simulator::{SimBus, SimGateway};
    use crate::gateway::timing::TimingPolicy;
    use futures::executor::block_on;
    use std::sync::Mutex as StdMutex;

    fn sim_driver(addrs: &[Long]) -> (GatewayDriver, Arc<StdMutex<SimBus>>) {
        let gw = SimGateway::with_random_addresses(addrs);
        let bus = gw.bus();
        (GatewayDriver::new(Box::new(gw), TimingPolicy::default()), bus)
    }

    fn quiet() -> CommissionOptions {
        CommissionOptions {
            blink: false,
            ..CommissionOptions::default()
        }
    }

    /// Binary search against a single device answering YES when
    /// `guess >= random`
    fn converge(random: Long) -> (Option<Long>, u32) {
        let mut session = CommissioningSession::new();
        let mut rounds = 0;
        while !session.converged() {
            let guess = session.guess();
            session.narrow(guess >= random);
            rounds += 1;
        }
        if session.at_floor() {
            session.resolve_floor(MIN_RANDOM_ADDRESS >= random);
            rounds += 1;
        }
        (session.found(), rounds)
    }

    #[test]
    fn search_converges() {
        for random in [
            0x000000, 0x000001, 0x000002, 0x123456, 0x7fffff, 0x800000, 0xabcdef, 0xfffffd,
            0xfffffe,
        ] {
            let (found, rounds) = converge(random);
            assert_eq!(found, Some(random), "random address {:06x}", random);
            assert!(rounds <= 25, "{} rounds for {:06x}", rounds, random);
        }
    }

    #[test]
    fn empty_round_finds_nothing() {
        let mut session = CommissioningSession::new();
        while !session.converged() {
            session.narrow(false);
        }
        assert_eq!(session.found(), None);
        assert_eq!(session.guess(), MAX_RANDOM_ADDRESS - 1);
    }

    #[test]
    fn short_address_limit() {
        let mut session = CommissioningSession::new();
        assert_eq!(session.next_short_address(64), Some(Short::new(0)));
        for _ in 0..63 {
            session.advance();
        }
        assert_eq!(session.next_short_address(64), Some(Short::new(63)));
        assert_eq!(session.next_short_address(10), None);
        session.advance();
        assert_eq!(session.next_short_address(200), None);
    }

    #[test]
    fn search_round_on_bus() {
        let (mut d, _bus) = sim_driver(&[0x00a000, 0x000fff]);
        block_on(d.initialize()).unwrap();
        block_on(d.randomize()).unwrap();
        let mut session = CommissioningSession::new();
        let found = block_on(search_round(&mut d, &mut session)).unwrap();
        assert_eq!(found, Some(0x000fff));
    }

    #[test]
    fn commission_all() {
        let addrs = [0xfffffe, 0x123456, 0x000001, 0x123457, 0x7fffff];
        let (mut d, bus) = sim_driver(&addrs);
        let mut seen = Vec::new();
        let report = block_on(commission(&mut d, &quiet(), |a| seen.push(a.short))).unwrap();

        assert_eq!(report.termination, Termination::NoDevicesLeft);
        let shorts: Vec<u8> = report.assigned.iter().map(|a| a.short.value()).collect();
        assert_eq!(shorts, vec![0, 1, 2, 3, 4]);
        assert_eq!(seen, report.assigned.iter().map(|a| a.short).collect::<Vec<_>>());
        let longs: Vec<Long> = report.assigned.iter().map(|a| a.long).collect();
        assert_eq!(longs, vec![0x000001, 0x123456, 0x123457, 0x7fffff, 0xfffffe]);

        let bus = bus.lock().unwrap();
        for a in &report.assigned {
            let gear = bus
                .gear
                .iter()
                .find(|g| g.random_address == a.long)
                .unwrap();
            assert_eq!(gear.short(), Some(a.short.value()));
        }
        assert_eq!(
            bus.frames.last(),
            Some(&CommandFrame::send(cmd::TERMINATE, 0x00))
        );
        assert_eq!(bus.frames[0], CommandFrame::send(0xfe, 0x00));
        assert_eq!(bus.frames[1], CommandFrame::send_twice(0xff, cmd::RESET));
    }

    #[test]
    fn commission_zero_random_address() {
        let (mut d, bus) = sim_driver(&[0x000000, 0x000500]);
        let report = block_on(commission(&mut d, &quiet(), |_| {})).unwrap();
        assert_eq!(report.termination, Termination::NoDevicesLeft);
        assert_eq!(
            report.assigned,
            vec![
                Assignment {
                    short: Short::new(0),
                    long: 0x000000
                },
                Assignment {
                    short: Short::new(1),
                    long: 0x000500
                },
            ]
        );
        let bus = bus.lock().unwrap();
        assert_eq!(bus.gear[0].short(), Some(0));
        assert_eq!(bus.gear[1].short(), Some(1));
    }

    #[test]
    fn commission_empty_bus() {
        let (mut d, bus) = sim_driver(&[]);
        let report = block_on(commission(&mut d, &quiet(), |_| {})).unwrap();
        assert!(report.assigned.is_empty());
        assert_eq!(report.termination, Termination::NoDevicesLeft);
        let bus = bus.lock().unwrap();
        // AllOff, reset, initialise, randomise, one round of 24 compares
        // with 3 search address writes each, terminate
        assert_eq!(bus.frames.len(), 4 + 24 * 4 + 1);
    }

    #[test]
    fn commission_stops_at_limit() {
        let (mut d, bus) = sim_driver(&[0x10, 0x20, 0x30]);
        let options = CommissionOptions {
            max_devices: 2,
            ..quiet()
        };
        let report = block_on(commission(&mut d, &options, |_| {})).unwrap();
        assert_eq!(report.termination, Termination::AddressSpaceExhausted);
        assert_eq!(report.assigned.len(), 2);
        let bus = bus.lock().unwrap();
        assert_eq!(bus.gear.iter().filter(|g| g.short().is_some()).count(), 2);
    }

    #[test]
    fn commission_full_bus() {
        let addrs: Vec<Long> = (1..=65).map(|i| i * 0x1000).collect();
        let (mut d, bus) = sim_driver(&addrs);
        let report = block_on(commission(&mut d, &quiet(), |_| {})).unwrap();
        assert_eq!(report.termination, Termination::AddressSpaceExhausted);
        assert_eq!(report.assigned.len(), 64);
        assert_eq!(report.assigned[63].short, Short::new(63));
        let bus = bus.lock().unwrap();
        let unaddressed: Vec<Long> = bus
            .gear
            .iter()
            .filter(|g| g.short().is_none())
            .map(|g| g.random_address)
            .collect();
        assert_eq!(unaddressed, vec![65 * 0x1000]);
    }

    #[test]
    fn blink_after_assignment() {
        let (mut d, bus) = sim_driver(&[0x42]);
        let report = block_on(commission(&mut d, &CommissionOptions::default(), |_| {})).unwrap();
        assert_eq!(report.assigned.len(), 1);
        let bus = bus.lock().unwrap();
        let levels: Vec<u8> = bus
            .frames
            .iter()
            .filter(|f| f.opcode == Opcode::Send && f.address == 0x00)
            .map(|f| f.data)
            .collect();
        assert_eq!(levels, vec![0, MAX_LEVEL, 0]);
        assert!(bus.elapsed >= Duration::from_secs(2));
        assert_eq!(bus.gear[0].actual_level, 0);
    }

    #[test]
    fn terminate_after_transport_error() {
        use crate::gateway::channel::{DynFuture, GatewayChannel};

        struct FailAfter {
            inner: SimGateway,
            writes_left: usize,
        }
        impl GatewayChannel for FailAfter {
            fn write<'a>(
                &'a mut self,
                data: &'a [u8],
            ) -> DynFuture<'a, Result<(), TransportError>> {
                if self.writes_left == 0 {
                    // Only TERMINATE gets through
                    if data != b"hA100\n" {
                        return Box::pin(std::future::ready(Err(TransportError::Closed)));
                    }
                } else {
                    self.writes_left -= 1;
                }
                self.inner.write(data)
            }
            fn bytes_available(&mut self) -> Result<usize, TransportError> {
                self.inner.bytes_available()
            }
            fn read(
                &mut self,
                len: usize,
                timeout: Duration,
            ) -> DynFuture<'_, Result<Vec<u8>, TransportError>> {
                self.inner.read(len, timeout)
            }
            fn wait(&mut self, delay: Duration) -> DynFuture<'_, ()> {
                self.inner.wait(delay)
            }
        }
        let inner = SimGateway::with_random_addresses(&[0x1234]);
        let bus = inner.bus();
        let mut d = GatewayDriver::new(
            Box::new(FailAfter {
                inner,
                writes_left: 10,
            }),
            TimingPolicy::default(),
        );
        let res = block_on(commission(&mut d, &quiet(), |_| {}));
        assert!(matches!(res, Err(TransportError::Closed)));
        let bus = bus.lock().unwrap();
        assert_eq!(bus.frames.len(), 11);
        assert_eq!(
            bus.frames.last(),
            Some(&CommandFrame::send(cmd::TERMINATE, 0x00))
        );
    }

    #[tokio::test]
    async fn shared_driver_stream() {
        use tokio_stream::StreamExt;
        let (d, _bus) = sim_driver(&[0x300, 0x100, 0x200]);
        let driver = Arc::new(Mutex::new(d));
        let items: Vec<CommissionItem> = commission_shared(driver.clone(), quiet()).collect().await;
        let longs: Vec<Long> = items.into_iter().map(|i| i.unwrap().long).collect();
        assert_eq!(longs, vec![0x100, 0x200, 0x300]);
        // Released after the run. RESET left the lamps at full level.
        let mut d = driver.lock().await;
        assert_eq!(d.query_level(Short::new(1)).await.unwrap(), MAX_LEVEL);
    }
}
