#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use bms_can::diag::{DiagEvent, DiagSeverity, Diagnostics};
use bms_can::filter::FilterBank;
use bms_can::hal::{BusErrorFlags, TransmitError};
use bms_can::system::{BootRequest, NvChannel, NvStorage, SystemControl};
use bms_can::{CanFrame, CanHardware, CanNode, Collaborators, Fifo, NodeIdentity};

pub const DEVICE_CRC: u32 = 0x1357_9BDF;
pub const NETWORK_ID: u16 = 0x0021;

pub fn identity() -> NodeIdentity {
    NodeIdentity {
        unique_device_crc: DEVICE_CRC,
        network_id: NETWORK_ID,
    }
}

#[derive(Default)]
pub struct MockCan {
    pub fifos: [VecDeque<CanFrame>; 2],
    pub released: [u32; 2],
    pub banks: Vec<(FilterBank, u8)>,
    pub sent: Vec<CanFrame>,
    pub busy: bool,
    pub transmit_complete: bool,
    pub error_flags: BusErrorFlags,
    pub error_interrupts_enabled: bool,
    pub ready: bool,
    pub started: bool,
    pub asleep: bool,
}

impl MockCan {
    pub fn deliver(&mut self, fifo: Fifo, frame: CanFrame) {
        self.fifos[fifo as usize].push_back(frame);
    }
}

impl CanHardware for MockCan {
    fn init(&mut self) {
        self.started = false;
    }

    fn configure_filter_bank(&mut self, bank: &FilterBank, first_bank: u8) {
        self.banks.push((*bank, first_bank));
    }

    fn start(&mut self) {
        self.started = true;
        self.error_interrupts_enabled = true;
    }

    fn pending(&self, fifo: Fifo) -> u8 {
        self.fifos[fifo as usize].len() as u8
    }

    fn read_frame(&mut self, fifo: Fifo) -> Option<CanFrame> {
        self.fifos[fifo as usize].front().copied()
    }

    fn release_fifo(&mut self, fifo: Fifo) {
        self.fifos[fifo as usize].pop_front();
        self.released[fifo as usize] += 1;
    }

    fn transmit(&mut self, frame: &CanFrame) -> Result<(), TransmitError> {
        if self.busy {
            return Err(TransmitError::Busy);
        }
        self.sent.push(*frame);
        Ok(())
    }

    fn take_transmit_complete(&mut self) -> bool {
        std::mem::take(&mut self.transmit_complete)
    }

    fn bus_error_flags(&self) -> BusErrorFlags {
        if self.error_interrupts_enabled {
            self.error_flags
        } else {
            BusErrorFlags::default()
        }
    }

    fn clear_bus_error_flags(&mut self, _flags: &BusErrorFlags) {
        self.error_flags = BusErrorFlags::default();
    }

    fn disable_error_interrupts(&mut self) {
        self.error_interrupts_enabled = false;
    }

    fn set_ready(&mut self) {
        self.ready = true;
    }

    fn sleep(&mut self) {
        self.asleep = true;
    }

    fn wake_up(&mut self) {
        self.asleep = false;
    }
}

#[derive(Default)]
pub struct MockDiagnostics {
    pub events: RefCell<Vec<(DiagEvent, DiagSeverity, u32, Option<CanNode>)>>,
}

impl Diagnostics for MockDiagnostics {
    fn notify(&self, event: DiagEvent, severity: DiagSeverity, code: u32, node: Option<CanNode>) {
        self.events.borrow_mut().push((event, severity, code, node));
    }
}

#[derive(Default)]
pub struct MockSystem {
    pub now: Cell<u32>,
    pub resets: Cell<u32>,
    pub boot_requests: RefCell<Vec<BootRequest>>,
}

impl SystemControl for MockSystem {
    fn timestamp(&self) -> u32 {
        self.now.set(self.now.get() + 100);
        self.now.get()
    }

    fn request_bootloader(&self, request: BootRequest) {
        self.boot_requests.borrow_mut().push(request);
    }

    fn reset(&self) {
        self.resets.set(self.resets.get() + 1);
    }
}

#[derive(Default)]
pub struct MockStorage {
    pub records: RefCell<Vec<(NvChannel, Vec<u8>)>>,
}

impl NvStorage for MockStorage {
    fn persist(&self, channel: NvChannel, record: &[u8]) {
        self.records.borrow_mut().push((channel, record.to_vec()));
    }
}

#[derive(Default)]
pub struct Env {
    pub diagnostics: MockDiagnostics,
    pub system: MockSystem,
    pub storage: MockStorage,
}

impl Env {
    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            diagnostics: &self.diagnostics,
            system: &self.system,
            storage: &self.storage,
        }
    }
}
