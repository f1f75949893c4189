use super::channel::{ChannelResult, GatewayChannel};
use super::frame::{self, BusStatus, CommandFrame, GatewayVersion, Opcode, ResponseToken};
use super::timing::{ExchangeClass, TimingPolicy};
use crate::common::address::{search_bytes, Long, Short, Target};
use crate::common::cmd_defs as cmd;
use crate::common::status::GearStatus;
use log::{debug, warn};
use std::time::Duration;

/// Request/response exchanges with the gateway.
///
/// Owns the channel. Every operation writes to the bus and then waits out
/// the delay for its kind of exchange, so calls must not be interleaved
/// between unrelated users. Share it behind a mutex if needed.
pub struct GatewayDriver {
    channel: Box<dyn GatewayChannel>,
    timing: TimingPolicy,
}

impl GatewayDriver {
    pub fn new(channel: Box<dyn GatewayChannel>, timing: TimingPolicy) -> GatewayDriver {
        GatewayDriver { channel, timing }
    }

    pub fn timing(&self) -> &TimingPolicy {
        &self.timing
    }

    pub async fn wait(&mut self, delay: Duration) {
        self.channel.wait(delay).await
    }

    async fn send(&mut self, frame: CommandFrame, class: ExchangeClass) -> ChannelResult<()> {
        debug!("Send {}", frame);
        self.channel.write(&frame.encode()).await?;
        self.channel
            .wait(self.timing.pre_read_delay(class))
            .await;
        Ok(())
    }

    async fn read_available(&mut self) -> ChannelResult<Vec<u8>> {
        let n = self.channel.bytes_available()?;
        if n == 0 {
            return Ok(Vec::new());
        }
        self.channel.read(n, self.timing.read_timeout).await
    }

    /// Write a query and read everything buffered after its delay
    async fn query(&mut self, frame: CommandFrame, class: ExchangeClass) -> ChannelResult<Vec<u8>> {
        self.clear_input().await?;
        self.send(frame, class).await?;
        let reply = self.read_available().await?;
        debug!("Reply {:?}", String::from_utf8_lossy(&reply));
        Ok(reply)
    }

    pub async fn clear_input(&mut self) -> ChannelResult<()> {
        self.channel.clear_input().await
    }

    /// Level of a device.
    ///
    /// Retried while the reply isn't a well formed level. If no attempt
    /// succeeds 0 is returned, which can't be told apart from a device
    /// that is off.
    pub async fn query_level(&mut self, addr: Short) -> ChannelResult<u8> {
        let frame = CommandFrame::send(Target::from(addr).command_byte(), cmd::QUERY_ACTUAL_LEVEL);
        let attempts = self.timing.level_attempts();
        for attempt in 1..=attempts {
            self.clear_input().await?;
            self.send(frame, ExchangeClass::CodedQuery).await?;
            let reply = self
                .channel
                .read(self.timing.level_read_window, self.timing.read_timeout)
                .await?;
            match frame::decode(&reply) {
                ResponseToken::LevelReport(l) => return Ok(l),
                token => {
                    warn!(
                        "Failed to obtain level of {} ({:?}), attempt {} of {}",
                        addr, token, attempt, attempts
                    );
                }
            }
        }
        Ok(0)
    }

    /// Status of a device. Read once.
    ///
    /// Returns `DeviceStatusReport`, `Invalid` or `NoResponse`.
    pub async fn query_status(&mut self, addr: Short) -> ChannelResult<ResponseToken> {
        let frame = CommandFrame::send(Target::from(addr).command_byte(), cmd::QUERY_STATUS);
        let reply = self.query(frame, ExchangeClass::CodedQuery).await?;
        let token = frame::decode_status(&reply);
        match token {
            ResponseToken::DeviceStatusReport(s) => {
                debug!("Status of device {} is [{}]", addr, GearStatus::new(s))
            }
            _ => warn!("Invalid status response from {}", addr),
        }
        Ok(token)
    }

    /// Direct arc power command. No reply is read.
    pub async fn set_level(&mut self, target: impl Into<Target>, level: u8) -> ChannelResult<()> {
        let target = target.into();
        self.send(
            CommandFrame::send(target.arc_byte(), level),
            ExchangeClass::Write,
        )
        .await
    }

    /// Switch fully on or off
    pub async fn set_state(&mut self, target: impl Into<Target>, on: bool) -> ChannelResult<()> {
        self.set_level(target, if on { cmd::MAX_LEVEL } else { 0 })
            .await
    }

    /// RESET, followed by the delay devices need to reinitialise
    pub async fn reset(&mut self, target: impl Into<Target>) -> ChannelResult<()> {
        let target = target.into();
        self.send(
            CommandFrame::send_twice(target.command_byte(), cmd::RESET),
            ExchangeClass::Reset,
        )
        .await
    }

    /// True if the device answered YES to QUERY RESET STATE
    pub async fn query_reset(&mut self, target: impl Into<Target>) -> ChannelResult<bool> {
        let target = target.into();
        let frame = CommandFrame::send(target.command_byte(), cmd::QUERY_RESET_STATE);
        let reply = self.query(frame, ExchangeClass::TimedQuery).await?;
        Ok(frame::decode(&reply) == ResponseToken::Affirmative)
    }

    /// INITIALISE all devices, starting their 15 minute initialisation
    /// period
    pub async fn initialize(&mut self) -> ChannelResult<()> {
        self.send(
            CommandFrame::send_twice(cmd::INITIALISE, cmd::INITIALISE_ALL),
            ExchangeClass::Write,
        )
        .await
    }

    pub async fn randomize(&mut self) -> ChannelResult<()> {
        self.send(
            CommandFrame::send_twice(cmd::RANDOMISE, 0x00),
            ExchangeClass::Write,
        )
        .await
    }

    /// Load SEARCHADDRH, SEARCHADDRM and SEARCHADDRL
    pub async fn set_search_address(&mut self, addr: Long) -> ChannelResult<()> {
        let [h, m, l] = search_bytes(addr);
        self.send(CommandFrame::send(cmd::SEARCHADDRH, h), ExchangeClass::Write)
            .await?;
        self.send(CommandFrame::send(cmd::SEARCHADDRM, m), ExchangeClass::Write)
            .await?;
        self.send(CommandFrame::send(cmd::SEARCHADDRL, l), ExchangeClass::Write)
            .await
    }

    /// True if at least one device has a random address less than or equal
    /// to the search address
    pub async fn compare(&mut self) -> ChannelResult<bool> {
        let reply = self
            .query(
                CommandFrame::send(cmd::COMPARE, 0x00),
                ExchangeClass::CodedQuery,
            )
            .await?;
        Ok(frame::decode(&reply) == ResponseToken::Affirmative)
    }

    /// Give the selected device a short address
    pub async fn program_short_address(&mut self, short: Short) -> ChannelResult<()> {
        self.send(
            CommandFrame::send(cmd::PROGRAM_SHORT_ADDRESS, short.program_byte()),
            ExchangeClass::Write,
        )
        .await
    }

    /// Remove the selected device from further searches
    pub async fn withdraw(&mut self) -> ChannelResult<()> {
        self.send(CommandFrame::send(cmd::WITHDRAW, 0x00), ExchangeClass::Write)
            .await
    }

    /// End the initialisation period
    pub async fn terminate(&mut self) -> ChannelResult<()> {
        self.send(CommandFrame::send(cmd::TERMINATE, 0x00), ExchangeClass::Write)
            .await
    }

    /// Set the short address by storing DTR0.
    ///
    /// STORE DTR AS SHORT ADDRESS is broadcast, so this is only useful with a
    /// single device on the bus.
    pub async fn assign_single_address(&mut self, short: Short) -> ChannelResult<()> {
        self.send(
            CommandFrame::send(cmd::DTR0, short.program_byte()),
            ExchangeClass::Write,
        )
        .await?;
        self.send(
            CommandFrame::send_twice(Target::Broadcast.command_byte(), cmd::SET_SHORT_ADDRESS),
            ExchangeClass::Write,
        )
        .await
    }

    pub async fn version(&mut self) -> ChannelResult<Option<GatewayVersion>> {
        self.clear_input().await?;
        self.channel.write(&frame::encode_bare(Opcode::Version)).await?;
        self.channel
            .wait(self.timing.pre_read_delay(ExchangeClass::Gateway))
            .await;
        let reply = self.read_available().await?;
        Ok(frame::decode_version(&reply))
    }

    pub async fn bus_status(&mut self) -> ChannelResult<BusStatus> {
        self.clear_input().await?;
        self.channel
            .write(&frame::encode_bare(Opcode::BusStatus))
            .await?;
        self.channel
            .wait(self.timing.pre_read_delay(ExchangeClass::CodedQuery))
            .await;
        let reply = self.read_available().await?;
        Ok(frame::decode_bus_status(&reply))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::error::TransportError;
    use crate::gateway::channel::DynFuture;
    use crate::gateway::timing::LEVEL_READ_WINDOW;
    use futures::executor::block_on;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// What happened on a scripted channel
    #[derive(Default, Debug)]
    pub(crate) struct Log {
        pub writes: Vec<String>,
        pub reads: usize,
        /// Length asked for by each read
        pub read_lens: Vec<usize>,
        pub waits: Vec<Duration>,
    }

    /// Channel that answers each read with the next scripted reply
    pub(crate) struct ScriptedChannel {
        pub replies: VecDeque<Vec<u8>>,
        pub log: Arc<Mutex<Log>>,
        pub fail_writes: bool,
    }

    impl ScriptedChannel {
        pub fn new(replies: &[&[u8]]) -> (ScriptedChannel, Arc<Mutex<Log>>) {
            let log = Arc::new(Mutex::new(Log::default()));
            (
                ScriptedChannel {
                    replies: replies.iter().map(|r| r.to_vec()).collect(),
                    log: log.clone(),
                    fail_writes: false,
                },
                log,
            )
        }
    }

    impl GatewayChannel for ScriptedChannel {
        fn write<'a>(&'a mut self, data: &'a [u8]) -> DynFuture<'a, ChannelResult<()>> {
            let res = if self.fail_writes {
                Err(TransportError::Closed)
            } else {
                self.log
                    .lock()
                    .unwrap()
                    .writes
                    .push(String::from_utf8_lossy(data).into_owned());
                Ok(())
            };
            Box::pin(std::future::ready(res))
        }

        fn bytes_available(&mut self) -> ChannelResult<usize> {
            Ok(self.replies.front().map_or(0, |r| r.len()))
        }

        fn read(&mut self, len: usize, _timeout: Duration) -> DynFuture<'_, ChannelResult<Vec<u8>>> {
            let mut log = self.log.lock().unwrap();
            log.reads += 1;
            log.read_lens.push(len);
            drop(log);
            let reply = self.replies.pop_front().unwrap_or_default();
            Box::pin(std::future::ready(Ok(reply)))
        }

        fn wait(&mut self, delay: Duration) -> DynFuture<'_, ()> {
            self.log.lock().unwrap().waits.push(delay);
            Box::pin(std::future::ready(()))
        }

        // Scripted replies are consumed by reads only
        fn clear_input(&mut self) -> DynFuture<'_, ChannelResult<()>> {
            Box::pin(std::future::ready(Ok(())))
        }
    }

    fn driver(replies: &[&[u8]]) -> (GatewayDriver, Arc<Mutex<Log>>) {
        let (channel, log) = ScriptedChannel::new(replies);
        (
            GatewayDriver::new(Box::new(channel), TimingPolicy::default()),
            log,
        )
    }

    #[test]
    fn query_level_retries() {
        let (mut d, log) = driver(&[b"", b"", b"", b"J78\n"]);
        assert_eq!(block_on(d.query_level(Short::new(3))).unwrap(), 120);
        let log = log.lock().unwrap();
        assert_eq!(log.reads, 4);
        // Fixed window, not what happens to be buffered
        assert_eq!(log.read_lens, vec![LEVEL_READ_WINDOW; 4]);
        assert_eq!(log.writes, vec!["h07A0\n"; 4]);
    }

    #[test]
    fn query_level_gives_up() {
        let (channel, log) = ScriptedChannel::new(&[b"X\n", b"J\n"]);
        let timing = TimingPolicy {
            level_attempts: 2,
            ..TimingPolicy::default()
        };
        let mut d = GatewayDriver::new(Box::new(channel), timing);
        assert_eq!(block_on(d.query_level(Short::new(0))).unwrap(), 0);
        assert_eq!(log.lock().unwrap().reads, 2);
    }

    #[test]
    fn set_state_uses_levels() {
        let (mut d, log) = driver(&[b"J12\n"]);
        block_on(d.set_state(Short::new(1), true)).unwrap();
        block_on(d.set_state(Short::new(1), false)).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.writes, vec!["h02FE\n", "h0200\n"]);
        assert_eq!(log.reads, 0);
        assert_eq!(log.waits, vec![Duration::from_millis(125); 2]);
    }

    #[test]
    fn set_level_broadcast() {
        let (mut d, log) = driver(&[]);
        block_on(d.set_level(Target::Broadcast, 0)).unwrap();
        assert_eq!(log.lock().unwrap().writes, vec!["hFE00\n"]);
    }

    #[test]
    fn query_status_is_stable() {
        let (mut d, log) = driver(&[b"J04\n", b"J04\n"]);
        let first = block_on(d.query_status(Short::new(2))).unwrap();
        let second = block_on(d.query_status(Short::new(2))).unwrap();
        assert_eq!(first, ResponseToken::DeviceStatusReport(0x04));
        assert_eq!(first, second);
        assert_eq!(log.lock().unwrap().writes, vec!["h0590\n"; 2]);
    }

    #[test]
    fn query_status_no_reply() {
        let (mut d, log) = driver(&[]);
        assert_eq!(
            block_on(d.query_status(Short::new(2))).unwrap(),
            ResponseToken::NoResponse
        );
        // Nothing buffered, nothing read
        assert_eq!(log.lock().unwrap().reads, 0);
    }

    #[test]
    fn reset_and_query_reset() {
        let (mut d, log) = driver(&[b"JFF\n"]);
        block_on(d.reset(Target::Broadcast)).unwrap();
        assert!(block_on(d.query_reset(Short::new(4))).unwrap());
        assert!(!block_on(d.query_reset(Short::new(4))).unwrap());
        let log = log.lock().unwrap();
        assert_eq!(log.writes, vec!["tFF20\n", "h0995\n", "h0995\n"]);
        assert_eq!(
            log.waits,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(200),
                Duration::from_millis(200)
            ]
        );
    }

    #[test]
    fn broadcast_setup_frames() {
        let (mut d, log) = driver(&[]);
        block_on(d.initialize()).unwrap();
        block_on(d.randomize()).unwrap();
        block_on(d.set_search_address(0x12ab0f)).unwrap();
        block_on(d.program_short_address(Short::new(5))).unwrap();
        block_on(d.withdraw()).unwrap();
        block_on(d.terminate()).unwrap();
        block_on(d.assign_single_address(Short::new(2))).unwrap();
        assert_eq!(
            log.lock().unwrap().writes,
            vec![
                "tA500\n", "tA700\n", "hB112\n", "hB3AB\n", "hB50F\n", "hB70B\n", "hAB00\n",
                "hA100\n", "hA305\n", "tFF80\n"
            ]
        );
    }

    #[test]
    fn gateway_queries() {
        let (mut d, log) = driver(&[b"V010203\n", b"D21\n"]);
        let v = block_on(d.version()).unwrap().unwrap();
        assert_eq!(v.firmware, "02");
        assert_eq!(block_on(d.bus_status()).unwrap(), BusStatus::Ok);
        assert_eq!(log.lock().unwrap().writes, vec!["v\n", "d\n"]);
    }

    #[test]
    fn write_failure_is_reported() {
        let (mut channel, _log) = ScriptedChannel::new(&[]);
        channel.fail_writes = true;
        let mut d = GatewayDriver::new(Box::new(channel), TimingPolicy::default());
        assert!(matches!(
            block_on(d.set_level(Short::new(0), 10)),
            Err(TransportError::Closed)
        ));
    }
}
