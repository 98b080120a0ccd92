#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dma2d_pool::{
    ChannelRef, CscRxOption, CscTxOption, DataBurstLength, Direction, Dma2dFactory, Dma2dHal,
    EventData, InterruptSource, MacroBlockSize, Platform, ReservedChannels, RxEventCallbacks,
    ScrambleOrder, TransactionNode, Trigger, TriggerPeripheral, UserData,
};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

// ---------------------------------------------------------------------------
// Mock register layer
// ---------------------------------------------------------------------------

/// Register file of one channel.
#[derive(Debug, Default, Clone)]
pub struct ChannelRegs {
    /// Raw interrupt status.
    pub raw: u32,
    pub int_enable: u32,
    pub running: bool,
    pub starts: usize,
    pub stops: usize,
    pub restarts: usize,
    pub resets: usize,
    pub cmd_disabled: bool,
    pub desc_addr: usize,
    pub periph: Option<(TriggerPeripheral, u8)>,
    pub reorder: bool,
    pub dscr_port: bool,
    pub owner_check: bool,
    pub auto_write_back: bool,
    pub eof_till_popped: bool,
    pub desc_burst: bool,
    pub burst: Option<DataBurstLength>,
    pub page_wrap: bool,
    pub mb_size: Option<MacroBlockSize>,
    pub tx_csc: Option<CscTxOption>,
    pub rx_csc: Option<CscRxOption>,
    pub pre_scramble: Option<ScrambleOrder>,
    pub post_scramble: Option<ScrambleOrder>,
    pub eof_desc_addr: usize,
}

#[derive(Debug, Default)]
struct Regs {
    tx: [ChannelRegs; 3],
    rx: [ChannelRegs; 2],
}

/// Shared between the hal handed to the scheduler and the test body.
#[derive(Debug, Default)]
pub struct MockHw {
    regs: Mutex<Regs>,
}

impl MockHw {
    pub fn with<R>(&self, dir: Direction, ch: u8, f: impl FnOnce(&mut ChannelRegs) -> R) -> R {
        let mut regs = self.regs.lock().unwrap();
        let chan = match dir {
            Direction::Tx => &mut regs.tx[ch as usize],
            Direction::Rx => &mut regs.rx[ch as usize],
        };
        f(chan)
    }

    pub fn regs(&self, dir: Direction, ch: u8) -> ChannelRegs {
        self.with(dir, ch, |r| r.clone())
    }

    /// Latch interrupt events as the hardware would. A latched RX EOF leaves
    /// the channel idle.
    pub fn raise(&self, dir: Direction, ch: u8, events: u32) {
        self.with(dir, ch, |r| {
            r.raw |= events;
            if dir == Direction::Rx && events & !1 != 0 {
                r.running = false;
            }
        });
    }

    pub fn set_eof_desc_addr(&self, ch: u8, addr: usize) {
        self.with(Direction::Rx, ch, |r| r.eof_desc_addr = addr);
    }
}

pub struct MockHal {
    pub hw: Arc<MockHw>,
}

impl Dma2dHal for MockHal {
    fn enable_interrupt(&self, dir: Direction, channel: u8, mask: u32, enable: bool) {
        self.hw.with(dir, channel, |r| {
            if enable {
                r.int_enable |= mask;
            } else {
                r.int_enable &= !mask;
            }
        });
    }

    fn interrupt_status(&self, dir: Direction, channel: u8) -> u32 {
        self.hw.with(dir, channel, |r| r.raw & r.int_enable)
    }

    fn clear_interrupt_status(&self, dir: Direction, channel: u8, mask: u32) {
        self.hw.with(dir, channel, |r| r.raw &= !mask);
    }

    fn interrupt_status_reg(&self, dir: Direction, channel: u8) -> usize {
        let base = match dir {
            Direction::Tx => 0x5008_0000,
            Direction::Rx => 0x5008_0500,
        };
        base + channel as usize * 0x100
    }

    fn connect_to_periph(
        &self,
        dir: Direction,
        channel: u8,
        periph: TriggerPeripheral,
        periph_sel_id: u8,
    ) {
        self.hw.with(dir, channel, |r| r.periph = Some((periph, periph_sel_id)));
    }

    fn disconnect_from_periph(&self, dir: Direction, channel: u8) {
        self.hw.with(dir, channel, |r| r.periph = None);
    }

    fn start(&self, dir: Direction, channel: u8) {
        self.hw.with(dir, channel, |r| {
            r.running = true;
            r.starts += 1;
        });
    }

    fn stop(&self, dir: Direction, channel: u8) {
        self.hw.with(dir, channel, |r| {
            r.running = false;
            r.stops += 1;
        });
    }

    fn restart(&self, dir: Direction, channel: u8) {
        self.hw.with(dir, channel, |r| r.restarts += 1);
    }

    fn set_desc_addr(&self, dir: Direction, channel: u8, addr: usize) {
        self.hw.with(dir, channel, |r| r.desc_addr = addr);
    }

    fn disable_cmd(&self, dir: Direction, channel: u8, disable: bool) {
        self.hw.with(dir, channel, |r| r.cmd_disabled = disable);
    }

    fn is_reset_avail(&self, dir: Direction, channel: u8) -> bool {
        self.hw.with(dir, channel, |r| r.cmd_disabled)
    }

    fn reset_channel(&self, dir: Direction, channel: u8) {
        self.hw.with(dir, channel, |r| {
            r.resets += 1;
            r.running = false;
        });
    }

    fn is_fsm_idle(&self, dir: Direction, channel: u8) -> bool {
        self.hw.with(dir, channel, |r| !r.running)
    }

    fn enable_owner_check(&self, dir: Direction, channel: u8, enable: bool) {
        self.hw.with(dir, channel, |r| r.owner_check = enable);
    }

    fn enable_descriptor_burst(&self, dir: Direction, channel: u8, enable: bool) {
        self.hw.with(dir, channel, |r| r.desc_burst = enable);
    }

    fn set_data_burst_length(&self, dir: Direction, channel: u8, length: DataBurstLength) {
        self.hw.with(dir, channel, |r| r.burst = Some(length));
    }

    fn enable_page_bound_wrap(&self, dir: Direction, channel: u8, enable: bool) {
        self.hw.with(dir, channel, |r| r.page_wrap = enable);
    }

    fn set_macro_block_size(&self, dir: Direction, channel: u8, size: MacroBlockSize) {
        self.hw.with(dir, channel, |r| r.mb_size = Some(size));
    }

    fn enable_reorder(&self, dir: Direction, channel: u8, enable: bool) {
        self.hw.with(dir, channel, |r| r.reorder = enable);
    }

    fn set_csc_pre_scramble(&self, dir: Direction, channel: u8, order: ScrambleOrder) {
        self.hw.with(dir, channel, |r| r.pre_scramble = Some(order));
    }

    fn tx_enable_auto_write_back(&self, channel: u8, enable: bool) {
        self.hw.with(Direction::Tx, channel, |r| r.auto_write_back = enable);
    }

    fn tx_enable_eof_mode(&self, channel: u8, till_data_popped: bool) {
        self.hw.with(Direction::Tx, channel, |r| r.eof_till_popped = till_data_popped);
    }

    fn tx_enable_dscr_port(&self, channel: u8, enable: bool) {
        self.hw.with(Direction::Tx, channel, |r| r.dscr_port = enable);
    }

    fn tx_configure_color_space_conv(&self, channel: u8, option: CscTxOption) {
        self.hw.with(Direction::Tx, channel, |r| r.tx_csc = Some(option));
    }

    fn rx_configure_color_space_conv(&self, channel: u8, option: CscRxOption) {
        self.hw.with(Direction::Rx, channel, |r| r.rx_csc = Some(option));
    }

    fn rx_set_csc_post_scramble(&self, channel: u8, order: ScrambleOrder) {
        self.hw.with(Direction::Rx, channel, |r| r.post_scramble = Some(order));
    }

    fn rx_success_eof_desc_addr(&self, channel: u8) -> usize {
        self.hw.with(Direction::Rx, channel, |r| r.eof_desc_addr)
    }
}

// ---------------------------------------------------------------------------
// Mock factory
// ---------------------------------------------------------------------------

/// Counters for tracking factory calls.
#[derive(Debug, Default)]
pub struct MockCounters {
    pub bring_ups: AtomicUsize,
    pub tear_downs: AtomicUsize,
    pub live_interrupts: AtomicUsize,
    pub last_priority: AtomicUsize,
    pub yields: AtomicUsize,
}

#[derive(Debug)]
pub struct MockInterrupt(pub InterruptSource);

#[derive(Debug, PartialEq)]
pub struct MockError;

pub struct MockFactory {
    pub hw: Arc<MockHw>,
    pub counters: Arc<MockCounters>,
    pub reserved: ReservedChannels,
    /// If set to true, the next `bring_up` call will fail.
    pub fail_bring_up: AtomicBool,
    /// Interrupt allocations left before one fails. `usize::MAX` never fails.
    pub intr_budget: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            hw: Arc::new(MockHw::default()),
            counters: Arc::new(MockCounters::default()),
            reserved: ReservedChannels::default(),
            fail_bring_up: AtomicBool::new(false),
            intr_budget: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn with_reserved(reserved: ReservedChannels) -> Self {
        Self { reserved, ..Self::new() }
    }
}

impl Dma2dFactory for MockFactory {
    type Hal = MockHal;
    type Interrupt = MockInterrupt;
    type Error = MockError;

    fn bring_up(&self, _group_id: usize) -> Result<MockHal, MockError> {
        self.counters.bring_ups.fetch_add(1, Ordering::SeqCst);
        if self.fail_bring_up.swap(false, Ordering::SeqCst) {
            return Err(MockError);
        }
        Ok(MockHal { hw: self.hw.clone() })
    }

    fn tear_down(&self, _group_id: usize, _hal: MockHal) {
        self.counters.tear_downs.fetch_add(1, Ordering::SeqCst);
    }

    fn alloc_interrupt(
        &self,
        source: InterruptSource,
        priority: u8,
    ) -> Result<MockInterrupt, MockError> {
        let budget = self.intr_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(MockError);
        }
        if budget != usize::MAX {
            self.intr_budget.store(budget - 1, Ordering::SeqCst);
        }
        self.counters.live_interrupts.fetch_add(1, Ordering::SeqCst);
        self.counters.last_priority.store(priority as usize, Ordering::SeqCst);
        Ok(MockInterrupt(source))
    }

    fn free_interrupt(&self, _intr: MockInterrupt) {
        self.counters.live_interrupts.fetch_sub(1, Ordering::SeqCst);
    }

    fn reserved_channels(&self, _group_id: usize) -> ReservedChannels {
        self.reserved
    }

    fn yield_from_isr(&self) {
        self.counters.yields.fetch_add(1, Ordering::SeqCst);
    }
}

pub type TestPlatform = Platform<NoopRawMutex, MockFactory>;

// ---------------------------------------------------------------------------
// Callback recording
// ---------------------------------------------------------------------------

/// Collects what the scheduler reported through callbacks. Passed around as
/// [`UserData`].
#[derive(Debug, Default)]
pub struct Recorder {
    pub picked: Mutex<Vec<Vec<(Direction, u8)>>>,
    pub eofs: AtomicUsize,
    pub eof_addrs: Mutex<Vec<usize>>,
    pub desc_done: AtomicUsize,
    /// Value returned by the event callbacks.
    pub want_yield: AtomicBool,
}

impl Recorder {
    pub fn leak() -> &'static Recorder {
        Box::leak(Box::default())
    }

    pub fn user_data(&'static self) -> UserData {
        UserData::new(self as *const Recorder as *mut ())
    }

    pub fn picked(&self) -> Vec<Vec<(Direction, u8)>> {
        self.picked.lock().unwrap().clone()
    }

    pub fn eofs(&self) -> usize {
        self.eofs.load(Ordering::SeqCst)
    }
}

fn recorder(user: UserData) -> &'static Recorder {
    // SAFETY: Tests only ever pass `Recorder::user_data` of a leaked recorder.
    unsafe { &*(user.as_ptr() as *const Recorder) }
}

/// `on_job_picked` that only records the granted channels.
pub fn record_picked(channels: &[ChannelRef<'_, MockHal>], user: UserData) -> bool {
    recorder(user)
        .picked
        .lock()
        .unwrap()
        .push(channels.iter().map(|c| (c.direction(), c.id())).collect());
    false
}

/// `on_job_picked` that records, connects every channel as M2M and listens
/// for RX EOF.
pub fn connect_and_record(channels: &[ChannelRef<'_, MockHal>], user: UserData) -> bool {
    record_picked(channels, user);
    for channel in channels {
        channel.connect(Trigger::m2m()).unwrap();
        if channel.direction() == Direction::Rx {
            let cbs = RxEventCallbacks { on_recv_eof: Some(count_eof), on_desc_done: Some(count_desc_done) };
            channel.register_rx_event_callbacks(cbs, user).unwrap();
        }
    }
    false
}

pub fn count_eof(_channel: ChannelRef<'_, MockHal>, data: &EventData<MockHal>, user: UserData) -> bool {
    let rec = recorder(user);
    rec.eofs.fetch_add(1, Ordering::SeqCst);
    rec.eof_addrs.lock().unwrap().push(data.rx_eof_desc_addr);
    rec.want_yield.load(Ordering::SeqCst)
}

pub fn count_desc_done(
    _channel: ChannelRef<'_, MockHal>,
    _data: &EventData<MockHal>,
    user: UserData,
) -> bool {
    let rec = recorder(user);
    rec.desc_done.fetch_add(1, Ordering::SeqCst);
    rec.want_yield.load(Ordering::SeqCst)
}

pub fn node() -> &'static TransactionNode<MockHal> {
    Box::leak(Box::new(TransactionNode::new()))
}
