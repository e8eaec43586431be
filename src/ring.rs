use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicUsize, Ordering};

const NEW: u32 = 1 << 0;
const WRITING: u32 = 1 << 1;
const GENERATION: u32 = 1 << 2;

struct Slot<T> {
    /// `NEW | WRITING | generation << 2`
    state: AtomicU32,
    buffer: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Slot {
            state: AtomicU32::new(0),
            buffer: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Receive ring shared by one interrupt handler and one task.
///
/// Never blocks the producer: when the consumer falls behind, the slot under
/// the write cursor is overwritten even if it was not read yet. Each slot
/// carries a generation counter so the consumer retries instead of returning
/// a frame that was overwritten while it was being copied.
pub struct RxRing<T, const N: usize> {
    slots: [Slot<T>; N],
    write: AtomicUsize,
    read: AtomicUsize,
    overwritten: AtomicU32,
    producer_taken: AtomicBool,
    consumer_taken: AtomicBool,
}

unsafe impl<T: Copy + Send, const N: usize> Sync for RxRing<T, N> {}

impl<T: Copy, const N: usize> RxRing<T, N> {
    const EMPTY: Slot<T> = Slot::new();

    pub const fn new() -> Self {
        assert!(N > 0);
        RxRing {
            slots: [Self::EMPTY; N],
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            overwritten: AtomicU32::new(0),
            producer_taken: AtomicBool::new(false),
            consumer_taken: AtomicBool::new(false),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Unread frames lost to overwrites since startup.
    pub fn overwritten(&self) -> u32 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Returns `true` if the slot under the read cursor holds no unread value
    pub fn is_empty(&self) -> bool {
        let read = self.read.load(Ordering::Acquire);
        self.slots[read].state.load(Ordering::Acquire) & NEW == 0
    }

    /// The producer endpoint. Handed out once.
    pub fn producer(&self) -> Option<RingProducer<'_, T, N>> {
        if self.producer_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(RingProducer { ring: self })
    }

    /// The consumer endpoint. Handed out once.
    pub fn consumer(&self) -> Option<RingConsumer<'_, T, N>> {
        if self.consumer_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(RingConsumer { ring: self })
    }

    /// Only called through the unique `RingProducer`.
    fn inner_push(&self, value: T) {
        let index = self.write.load(Ordering::Relaxed);
        let slot = &self.slots[index];

        let state = slot.state.fetch_or(WRITING, Ordering::Acquire);
        if state & NEW != 0 {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        fence(Ordering::Release);
        unsafe { ptr::write_volatile(slot.buffer.get(), MaybeUninit::new(value)) };

        let generation = (state & !(NEW | WRITING)).wrapping_add(GENERATION);
        slot.state.store(generation | NEW, Ordering::Release);
        self.write.store((index + 1) % N, Ordering::Release);
    }

    /// Only called through the unique `RingConsumer`.
    fn inner_pop(&self) -> Option<T> {
        let index = self.read.load(Ordering::Relaxed);
        let slot = &self.slots[index];
        loop {
            let before = slot.state.load(Ordering::Acquire);
            if before & WRITING != 0 {
                core::hint::spin_loop();
                continue;
            }
            if before & NEW == 0 {
                return None;
            }

            let value = unsafe { ptr::read_volatile(slot.buffer.get()).assume_init() };
            fence(Ordering::Acquire);

            // fails if the producer touched the slot meanwhile
            if slot
                .state
                .compare_exchange(before, before & !NEW, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            self.read.store((index + 1) % N, Ordering::Release);
            return Some(value);
        }
    }
}

impl<T: Copy, const N: usize> Default for RxRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing end of an [`RxRing`], owned by the receive interrupt
pub struct RingProducer<'a, T, const N: usize> {
    ring: &'a RxRing<T, N>,
}

unsafe impl<'a, T: Copy + Send, const N: usize> Send for RingProducer<'a, T, N> {}

impl<'a, T: Copy, const N: usize> RingProducer<'a, T, N> {
    /// Stores `value`, overwriting the oldest unread value when full
    #[inline]
    pub fn push(&mut self, value: T) {
        self.ring.inner_push(value)
    }
}

/// Reading end of an [`RxRing`], owned by a task
pub struct RingConsumer<'a, T, const N: usize> {
    ring: &'a RxRing<T, N>,
}

unsafe impl<'a, T: Copy + Send, const N: usize> Send for RingConsumer<'a, T, N> {}

impl<'a, T: Copy, const N: usize> RingConsumer<'a, T, N> {
    /// Returns the value under the read cursor, or `None` if it was already read
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.ring.inner_pop()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn overwritten(&self) -> u32 {
        self.ring.overwritten()
    }
}
