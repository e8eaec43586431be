//! Filter bank allocation
//!
//! Receive descriptors are sorted into seven buckets and packed greedily into
//! the controller's filter banks. A bank holds four 16 bit list entries, two
//! 32 bit list entries, two 16 bit mask entries or a single 32 bit mask entry.
//! Bank numbers are shared by both controllers, so one [`FilterAllocator`] is
//! threaded through the configuration of every node.

use core::fmt;

use embedded_can::Id;
use heapless::Vec;

use crate::frame::{raw_id, CanFrame};
use crate::hal::Fifo;

/// Filter banks of the shared bxCAN filter block.
pub const MAX_FILTER_BANKS: usize = 28;

/// What happens to a frame matched by a descriptor.
#[derive(Clone, Copy)]
pub enum RxHandler {
    /// Invoked synchronously in interrupt context.
    Callback(fn(&CanFrame)),
    /// Node protocol interpreter. On a bypass hit it runs in interrupt context
    /// even when the node is buffered.
    Protocol,
    /// Buffered ring if the node has one, otherwise the node protocol.
    Default,
}

impl fmt::Debug for RxHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RxHandler::Callback(_) => f.write_str("Callback"),
            RxHandler::Protocol => f.write_str("Protocol"),
            RxHandler::Default => f.write_str("Default"),
        }
    }
}

/// One logical receive identifier of a node.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveDescriptor {
    pub id: Id,
    /// `0` selects list mode. Otherwise the mask in filter register layout:
    /// 16 bit for standard identifiers, 32 bit for extended ones.
    pub mask: u32,
    /// RTR bit written into the filter entry.
    pub rtr: bool,
    pub fifo: Fifo,
    pub handler: RxHandler,
}

impl ReceiveDescriptor {
    pub const fn new(id: Id, fifo: Fifo) -> Self {
        ReceiveDescriptor {
            id,
            mask: 0,
            rtr: false,
            fifo,
            handler: RxHandler::Default,
        }
    }

    pub const fn with_mask(mut self, mask: u32) -> Self {
        self.mask = mask;
        self
    }

    pub const fn with_callback(mut self, callback: fn(&CanFrame)) -> Self {
        self.handler = RxHandler::Callback(callback);
        self
    }

    /// Hands matched frames to the node protocol.
    pub const fn with_protocol(mut self) -> Self {
        self.handler = RxHandler::Protocol;
        self
    }

    pub const fn remote(mut self) -> Self {
        self.rtr = true;
        self
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    /// `id << 5 | rtr << 4`
    fn entry16(&self) -> u16 {
        ((raw_id(self.id) << 5) | (self.rtr as u32) << 4) as u16
    }

    /// `id << 3 | IDE << 2 | rtr << 1`, split into high and low half
    fn entry32(&self) -> (u16, u16) {
        let ide = self.is_extended() as u32;
        let word = (raw_id(self.id) << 3) | ide << 2 | (self.rtr as u32) << 1;
        ((word >> 16) as u16, word as u16)
    }
}

/// Allocation bucket. Variant order is the order banks are assigned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterCase {
    List16Fifo0 = 0,
    List16Fifo1 = 1,
    List32Fifo0 = 2,
    List32Fifo1 = 3,
    Mask16Fifo0 = 4,
    Mask16Fifo1 = 5,
    Mask32 = 6,
}

impl FilterCase {
    pub const ALL: [FilterCase; 7] = [
        FilterCase::List16Fifo0,
        FilterCase::List16Fifo1,
        FilterCase::List32Fifo0,
        FilterCase::List32Fifo1,
        FilterCase::Mask16Fifo0,
        FilterCase::Mask16Fifo1,
        FilterCase::Mask32,
    ];

    pub fn of(descriptor: &ReceiveDescriptor) -> Self {
        let fifo1 = descriptor.fifo == Fifo::Fifo1;
        match (descriptor.mask != 0, descriptor.is_extended(), fifo1) {
            (false, false, false) => FilterCase::List16Fifo0,
            (false, false, true) => FilterCase::List16Fifo1,
            (false, true, false) => FilterCase::List32Fifo0,
            (false, true, true) => FilterCase::List32Fifo1,
            (true, false, false) => FilterCase::Mask16Fifo0,
            (true, false, true) => FilterCase::Mask16Fifo1,
            (true, true, _) => FilterCase::Mask32,
        }
    }

    pub const fn entries_per_bank(self) -> usize {
        match self {
            FilterCase::List16Fifo0 | FilterCase::List16Fifo1 => 4,
            FilterCase::Mask32 => 1,
            _ => 2,
        }
    }

    pub const fn mode(self) -> FilterMode {
        match self {
            FilterCase::List16Fifo0
            | FilterCase::List16Fifo1
            | FilterCase::List32Fifo0
            | FilterCase::List32Fifo1 => FilterMode::List,
            _ => FilterMode::Mask,
        }
    }

    pub const fn scale(self) -> FilterScale {
        match self {
            FilterCase::List16Fifo0
            | FilterCase::List16Fifo1
            | FilterCase::Mask16Fifo0
            | FilterCase::Mask16Fifo1 => FilterScale::Bits16,
            _ => FilterScale::Bits32,
        }
    }

    /// `None` for [`FilterCase::Mask32`], which routes to the descriptor's FIFO.
    const fn fifo(self) -> Option<Fifo> {
        match self {
            FilterCase::List16Fifo0 | FilterCase::List32Fifo0 | FilterCase::Mask16Fifo0 => {
                Some(Fifo::Fifo0)
            }
            FilterCase::Mask32 => None,
            _ => Some(Fifo::Fifo1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterMode {
    List,
    Mask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterScale {
    Bits16,
    Bits32,
}

/// Register image of one filter bank, halves in HAL order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterBank {
    pub number: u8,
    pub mode: FilterMode,
    pub scale: FilterScale,
    pub fifo: Fifo,
    pub id_high: u16,
    pub id_low: u16,
    pub mask_id_high: u16,
    pub mask_id_low: u16,
}

/// Occupancy of the seven buckets for one descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BucketCounts(pub [usize; 7]);

impl BucketCounts {
    pub fn of(descriptors: &[ReceiveDescriptor]) -> Self {
        let mut counts = [0; 7];
        for descriptor in descriptors {
            counts[FilterCase::of(descriptor) as usize] += 1;
        }
        BucketCounts(counts)
    }

    pub fn get(&self, case: FilterCase) -> usize {
        self.0[case as usize]
    }

    pub fn required_banks(&self) -> usize {
        FilterCase::ALL
            .iter()
            .map(|&case| self.get(case).div_ceil(case.entries_per_bank()))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterError {
    /// The descriptor table needs more banks than are left. Nothing was assigned.
    InsufficientBanks { required: usize, available: usize },
}

/// Banks assigned to one node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterPlan {
    /// Number of the first bank of this node.
    pub first_bank: u8,
    pub banks: Vec<FilterBank, MAX_FILTER_BANKS>,
}

/// Bank counter shared across node configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterAllocator {
    bank_count: usize,
    next_bank: usize,
}

impl Default for FilterAllocator {
    fn default() -> Self {
        Self::new(MAX_FILTER_BANKS)
    }
}

impl FilterAllocator {
    /// `bank_count` is capped at [`MAX_FILTER_BANKS`].
    pub fn new(bank_count: usize) -> Self {
        FilterAllocator {
            bank_count: bank_count.min(MAX_FILTER_BANKS),
            next_bank: 0,
        }
    }

    /// Next bank number to be handed out.
    pub fn next_bank(&self) -> usize {
        self.next_bank
    }

    pub fn available(&self) -> usize {
        self.bank_count - self.next_bank
    }

    pub fn allocate(&mut self, descriptors: &[ReceiveDescriptor]) -> Result<FilterPlan, FilterError> {
        let counts = BucketCounts::of(descriptors);
        let required = counts.required_banks();
        if required > self.available() {
            return Err(FilterError::InsufficientBanks {
                required,
                available: self.available(),
            });
        }

        let mut plan = FilterPlan {
            first_bank: self.next_bank as u8,
            banks: Vec::new(),
        };
        for case in FilterCase::ALL {
            if counts.get(case) == 0 {
                continue;
            }
            let mut entries = descriptors.iter().filter(|d| FilterCase::of(d) == case).peekable();
            while entries.peek().is_some() {
                let mut chunk: Vec<&ReceiveDescriptor, 4> = Vec::new();
                while chunk.len() < case.entries_per_bank() {
                    match entries.next() {
                        // chunk never exceeds entries_per_bank() <= 4
                        Some(descriptor) => chunk.push(descriptor).ok(),
                        None => break,
                    };
                }
                let bank = self.pack(case, &chunk);
                // bounded by the capacity check above
                plan.banks.push(bank).ok();
            }
        }
        Ok(plan)
    }

    fn pack(&mut self, case: FilterCase, chunk: &[&ReceiveDescriptor]) -> FilterBank {
        let first = chunk[0];
        // Unused slots repeat the first entry so they cannot match anything else.
        let nth = |n: usize| *chunk.get(n).unwrap_or(&first);
        let mut bank = FilterBank {
            number: self.next_bank as u8,
            mode: case.mode(),
            scale: case.scale(),
            fifo: case.fifo().unwrap_or(first.fifo),
            id_high: 0,
            id_low: 0,
            mask_id_high: 0,
            mask_id_low: 0,
        };
        match (case.mode(), case.scale()) {
            (FilterMode::List, FilterScale::Bits16) => {
                bank.id_high = nth(0).entry16();
                bank.id_low = nth(1).entry16();
                bank.mask_id_high = nth(2).entry16();
                bank.mask_id_low = nth(3).entry16();
            }
            (FilterMode::List, FilterScale::Bits32) => {
                (bank.id_high, bank.id_low) = nth(0).entry32();
                (bank.mask_id_high, bank.mask_id_low) = nth(1).entry32();
            }
            (FilterMode::Mask, FilterScale::Bits16) => {
                bank.id_high = nth(0).entry16();
                bank.mask_id_high = nth(0).mask as u16;
                bank.id_low = nth(1).entry16();
                bank.mask_id_low = nth(1).mask as u16;
            }
            (FilterMode::Mask, FilterScale::Bits32) => {
                (bank.id_high, bank.id_low) = first.entry32();
                bank.mask_id_high = (first.mask >> 16) as u16;
                bank.mask_id_low = first.mask as u16;
            }
        }
        self.next_bank += 1;
        bank
    }
}
