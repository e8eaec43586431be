use crate::config::CanConfig;
use crate::diag::{init_failure, DiagEvent, DiagSeverity, Diagnostics};
use crate::error::{ErrorCode, ErrorRecord};
use crate::filter::{FilterAllocator, FilterError, FilterPlan, RxHandler};
use crate::frame::CanFrame;
use crate::hal::{CanHardware, Fifo};
use crate::node::{CanNode, PerNode};
use crate::protocol::{NodeIdentity, NodeProtocol, ProtocolEvent, ProtocolLink};
use crate::ring::{RingConsumer, RingProducer, RxRing};
use crate::router::{Route, Router, MAX_BYPASS_IDS};
use crate::system::{NvStorage, SystemControl};
use crate::tx::{TxError, TxQueue};

/// Receive rings and transmit queues of both nodes.
///
/// Lives outside the driver, usually in a `static`, so task code can drain
/// the rings without going through the driver.
pub struct CanBuffers<const RX: usize, const TX: usize> {
    rx: PerNode<RxRing<CanFrame, RX>>,
    tx: PerNode<TxQueue<TX>>,
}

impl<const RX: usize, const TX: usize> CanBuffers<RX, TX> {
    pub const fn new() -> Self {
        CanBuffers {
            rx: PerNode::new(RxRing::new(), RxRing::new()),
            tx: PerNode::new(TxQueue::new(), TxQueue::new()),
        }
    }

    pub fn rx(&self, node: CanNode) -> &RxRing<CanFrame, RX> {
        &self.rx[node]
    }

    pub fn tx(&self, node: CanNode) -> &TxQueue<TX> {
        &self.tx[node]
    }

    /// Task side reader of a node's receive ring. Handed out once.
    pub fn rx_consumer(&self, node: CanNode) -> Option<RingConsumer<'_, CanFrame, RX>> {
        self.rx[node].consumer()
    }
}

impl<const RX: usize, const TX: usize> Default for CanBuffers<RX, TX> {
    fn default() -> Self {
        Self::new()
    }
}

/// Services the CAN core calls out to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub diagnostics: &'a dyn Diagnostics,
    pub system: &'a dyn SystemControl,
    pub storage: &'a dyn NvStorage,
}

/// What [`CanDriver::receive`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxOutcome {
    /// The FIFO held no frame.
    Empty,
    Bypassed,
    Buffered,
    /// Descriptor callback on the default path.
    Handled,
    Interpreted(ProtocolEvent),
}

/// Direct transmit path used by the protocol for replies.
struct DirectLink<'d, H> {
    hardware: &'d mut PerNode<H>,
    listen_only: &'d mut PerNode<bool>,
}

impl<H: CanHardware> ProtocolLink for DirectLink<'_, H> {
    fn send_reply(&mut self, frame: &CanFrame) {
        for node in [CanNode::Node1, CanNode::Node0] {
            if let Err(_error) = send_direct(&mut self.hardware[node], self.listen_only[node], frame) {
                #[cfg(feature = "defmt")]
                defmt::debug!("reply on {} dropped: {}", node, _error);
            }
        }
    }

    fn is_listen_only(&self, node: CanNode) -> bool {
        self.listen_only[node]
    }

    fn set_listen_only(&mut self, node: CanNode, listen_only: bool) {
        self.listen_only[node] = listen_only;
    }
}

fn send_direct<H: CanHardware>(hardware: &mut H, listen_only: bool, frame: &CanFrame) -> Result<(), TxError> {
    if listen_only {
        return Err(TxError::ListenOnly);
    }
    hardware.transmit(frame)?;
    Ok(())
}

/// CAN subsystem of a device with two controllers.
///
/// `on_*_interrupt` are called from the controllers' interrupt handlers, the
/// remaining methods from task context.
pub struct CanDriver<'a, H, const RX: usize, const TX: usize> {
    hardware: PerNode<H>,
    config: CanConfig<'a>,
    buffers: &'a CanBuffers<RX, TX>,
    producers: PerNode<Option<RingProducer<'a, CanFrame, RX>>>,
    routers: PerNode<Router<'a>>,
    filter_plans: PerNode<Option<FilterPlan>>,
    error_records: PerNode<ErrorRecord>,
    listen_only: PerNode<bool>,
    last_received: PerNode<Option<CanFrame>>,
    protocol: NodeProtocol,
    collaborators: Collaborators<'a>,
}

impl<'a, H: CanHardware, const RX: usize, const TX: usize> CanDriver<'a, H, RX, TX> {
    pub fn new(
        hardware: PerNode<H>,
        config: CanConfig<'a>,
        buffers: &'a CanBuffers<RX, TX>,
        identity: NodeIdentity,
        collaborators: Collaborators<'a>,
    ) -> Self {
        CanDriver {
            hardware,
            config,
            buffers,
            producers: PerNode::new(None, None),
            routers: PerNode::default(),
            filter_plans: PerNode::default(),
            error_records: PerNode::default(),
            listen_only: PerNode::default(),
            last_received: PerNode::default(),
            protocol: NodeProtocol::new(config.protocol, identity),
            collaborators,
        }
    }

    /// Configures both controllers, node 0 first, and enables their interrupts.
    ///
    /// Configuration problems are reported to the diagnostics collaborator and
    /// leave the node running with whatever could be applied.
    pub fn init(&mut self) {
        let mut allocator = FilterAllocator::new(self.config.filter_bank_count);
        for node in CanNode::ALL {
            let node_config = self.config.nodes[node];
            let hardware = &mut self.hardware[node];
            hardware.init();

            match allocator.allocate(node_config.descriptors) {
                Ok(plan) => {
                    for bank in &plan.banks {
                        hardware.configure_filter_bank(bank, plan.first_bank);
                    }
                    self.filter_plans[node] = Some(plan);
                }
                Err(_error @ FilterError::InsufficientBanks { .. }) => {
                    #[cfg(feature = "defmt")]
                    defmt::error!("{}: filter allocation failed: {}", node, _error);
                    self.collaborators.diagnostics.notify(
                        DiagEvent::CanInitFailure,
                        DiagSeverity::Error,
                        init_failure::INSUFFICIENT_FILTER_BANKS,
                        Some(node),
                    );
                }
            }

            if node_config.bypass_ids.len() > node_config.descriptors.len() {
                self.collaborators.diagnostics.notify(
                    DiagEvent::CanInitFailure,
                    DiagSeverity::Warning,
                    init_failure::BYPASS_TABLE_TOO_LONG,
                    Some(node),
                );
            }
            if node_config.bypass_ids.len() > MAX_BYPASS_IDS {
                #[cfg(feature = "defmt")]
                defmt::warn!(
                    "{}: {} bypass ids, only {} are served",
                    node,
                    node_config.bypass_ids.len(),
                    MAX_BYPASS_IDS
                );
                self.collaborators.diagnostics.notify(
                    DiagEvent::CanInitFailure,
                    DiagSeverity::Warning,
                    init_failure::BYPASS_TABLE_OVERFLOW,
                    Some(node),
                );
            }

            if node_config.use_rx_buffer && self.producers[node].is_none() {
                self.producers[node] = self.buffers.rx(node).producer();
                if self.producers[node].is_none() {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("{}: receive ring producer already taken", node);
                }
            }
            let buffered = self.producers[node].is_some();
            self.routers[node] = Router::new(node_config.descriptors, node_config.bypass_ids, buffered);

            hardware.start();
        }
    }

    /// Receive interrupt of `node`: services every frame pending in both FIFOs.
    pub fn on_rx_interrupt(&mut self, node: CanNode) {
        for fifo in Fifo::ALL {
            let pending = self.hardware[node].pending(fifo);
            for _ in 0..pending {
                self.receive(node, fifo);
            }
        }
    }

    /// Reads and routes the frame at the head of `fifo`, then releases the FIFO.
    pub fn receive(&mut self, node: CanNode, fifo: Fifo) -> RxOutcome {
        let outcome = match self.hardware[node].read_frame(fifo) {
            Some(frame) => self.route(node, frame),
            None => RxOutcome::Empty,
        };
        self.hardware[node].release_fifo(fifo);
        outcome
    }

    fn route(&mut self, node: CanNode, frame: CanFrame) -> RxOutcome {
        use embedded_can::Frame as _;

        match self.routers[node].route(frame.id()) {
            Route::Bypass(callback) => {
                callback(&frame);
                RxOutcome::Bypassed
            }
            Route::Protocol => RxOutcome::Interpreted(self.interpret(&frame)),
            Route::Buffer => match self.producers[node].as_mut() {
                Some(producer) => {
                    producer.push(frame);
                    RxOutcome::Buffered
                }
                None => self.dispatch_default(node, frame),
            },
            Route::Default => self.dispatch_default(node, frame),
        }
    }

    fn dispatch_default(&mut self, node: CanNode, frame: CanFrame) -> RxOutcome {
        use embedded_can::Frame as _;

        self.last_received[node] = Some(frame);
        match self.routers[node].handler(frame.id()) {
            RxHandler::Callback(callback) => {
                callback(&frame);
                RxOutcome::Handled
            }
            RxHandler::Protocol | RxHandler::Default => RxOutcome::Interpreted(self.interpret(&frame)),
        }
    }

    fn interpret(&mut self, frame: &CanFrame) -> ProtocolEvent {
        let mut link = DirectLink {
            hardware: &mut self.hardware,
            listen_only: &mut self.listen_only,
        };
        self.protocol.on_frame(
            frame,
            &mut link,
            self.collaborators.system,
            self.collaborators.storage,
        )
    }

    /// Drains a node's receive ring, handing every frame without a registered
    /// callback to the node protocol. Returns the number of frames taken.
    pub fn process_rx_buffer(
        &mut self,
        node: CanNode,
        consumer: &mut RingConsumer<'_, CanFrame, RX>,
    ) -> usize {
        use embedded_can::Frame as _;

        let mut count = 0;
        while let Some(frame) = consumer.pop() {
            count += 1;
            match self.routers[node].handler(frame.id()) {
                RxHandler::Callback(callback) => callback(&frame),
                RxHandler::Protocol | RxHandler::Default => {
                    self.interpret(&frame);
                }
            }
        }
        count
    }

    /// Queues `frame` for transmission on `node`.
    pub fn send(&self, node: CanNode, frame: CanFrame) -> Result<(), TxError> {
        if !self.config.nodes[node].use_tx_buffer {
            return Err(TxError::Disabled);
        }
        self.buffers.tx(node).enqueue(frame)
    }

    /// Hands the oldest queued frame of `node` to the hardware.
    ///
    /// `Ok(false)` if the queue was empty.
    pub fn drain(&mut self, node: CanNode) -> Result<bool, TxError> {
        if self.listen_only[node] {
            return Err(TxError::ListenOnly);
        }
        self.buffers.tx(node).drain_one(&mut self.hardware[node])
    }

    /// Transmit interrupt of `node`: refills the freed mailbox from the queue.
    pub fn on_tx_interrupt(&mut self, node: CanNode) {
        if !self.hardware[node].take_transmit_complete() {
            return;
        }
        if !self.config.nodes[node].use_tx_buffer {
            return;
        }
        if let Err(_error) = self.drain(node) {
            #[cfg(feature = "defmt")]
            defmt::debug!("{}: drain failed: {}", node, _error);
        }
    }

    /// Transmits `frame` immediately, without queueing or retry.
    pub fn send_now(&mut self, node: CanNode, frame: &CanFrame) -> Result<(), TxError> {
        send_direct(&mut self.hardware[node], self.listen_only[node], frame)
    }

    /// Error interrupt of `node`.
    ///
    /// Counts every observed condition, reports them and re-arms the controller.
    /// Error interrupts stay masked until the controller is restarted.
    pub fn on_error_interrupt(&mut self, node: CanNode) {
        let hardware = &mut self.hardware[node];
        let record = &mut self.error_records[node];

        let flags = hardware.bus_error_flags();
        let code = record.classify(&flags);
        hardware.clear_bus_error_flags(&flags);

        if !code.is_empty() {
            record.stamp(self.collaborators.system.timestamp());
            let severity = if code.contains(ErrorCode::BUS_OFF) {
                DiagSeverity::Error
            } else {
                DiagSeverity::Warning
            };
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: bus error {}", node, code);
            self.collaborators
                .diagnostics
                .notify(DiagEvent::CanBusError, severity, code.bits(), Some(node));
        }

        hardware.disable_error_interrupts();
        hardware.set_ready();
    }

    pub fn error_record(&self, node: CanNode) -> &ErrorRecord {
        &self.error_records[node]
    }

    pub fn reset_error_record(&mut self, node: CanNode) {
        self.error_records[node] = ErrorRecord::default();
    }

    pub fn set_sleep_mode(&mut self, node: CanNode) {
        self.hardware[node].sleep();
    }

    pub fn wake_up(&mut self, node: CanNode) {
        self.hardware[node].wake_up();
    }

    pub fn is_listen_only(&self, node: CanNode) -> bool {
        self.listen_only[node]
    }

    pub fn set_listen_only(&mut self, node: CanNode, listen_only: bool) {
        self.listen_only[node] = listen_only;
    }

    /// Last frame taken on the default path of `node`.
    pub fn last_received(&self, node: CanNode) -> Option<&CanFrame> {
        self.last_received[node].as_ref()
    }

    /// Banks assigned to `node`, `None` if allocation failed.
    pub fn filter_plan(&self, node: CanNode) -> Option<&FilterPlan> {
        self.filter_plans[node].as_ref()
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.protocol.identity()
    }

    pub fn hardware(&self, node: CanNode) -> &H {
        &self.hardware[node]
    }

    pub fn hardware_mut(&mut self, node: CanNode) -> &mut H {
        &mut self.hardware[node]
    }
}
