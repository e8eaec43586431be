use embedded_can::Id;
use heapless::Vec;

use crate::filter::{ReceiveDescriptor, RxHandler};
use crate::frame::CanFrame;

/// Bypass identifiers per node.
pub const MAX_BYPASS_IDS: usize = 16;

/// Delivery path of an incoming frame.
#[derive(Clone, Copy)]
pub enum Route {
    /// Bypass hit with a registered callback.
    Bypass(fn(&CanFrame)),
    /// Bypass hit on a descriptor served by the node protocol.
    Protocol,
    /// Into the node's receive ring.
    Buffer,
    /// Descriptor table search, then callback or node protocol.
    Default,
}

impl core::fmt::Debug for Route {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Route::Bypass(_) => f.write_str("Bypass"),
            Route::Protocol => f.write_str("Protocol"),
            Route::Buffer => f.write_str("Buffer"),
            Route::Default => f.write_str("Default"),
        }
    }
}

/// Routing table of one node, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct Router<'a> {
    descriptors: &'a [ReceiveDescriptor],
    /// Bypass identifier and the index of the descriptor with the same identifier.
    bypass: Vec<(Id, Option<usize>), MAX_BYPASS_IDS>,
    buffered: bool,
}

impl<'a> Router<'a> {
    /// Bypass identifiers beyond [`MAX_BYPASS_IDS`] are dropped.
    pub fn new(descriptors: &'a [ReceiveDescriptor], bypass_ids: &[Id], buffered: bool) -> Self {
        let bypass = bypass_ids
            .iter()
            .take(MAX_BYPASS_IDS)
            .map(|&id| (id, descriptors.iter().position(|d| d.id == id)))
            .collect();
        Router {
            descriptors,
            bypass,
            buffered,
        }
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    pub fn route(&self, id: Id) -> Route {
        let hit = self.bypass.iter().find(|(bypass_id, _)| *bypass_id == id);
        match hit {
            Some((_, Some(index))) => match self.descriptors[*index].handler {
                RxHandler::Callback(callback) => Route::Bypass(callback),
                RxHandler::Protocol => Route::Protocol,
                RxHandler::Default if self.buffered => Route::Buffer,
                RxHandler::Default => Route::Default,
            },
            _ if self.buffered => Route::Buffer,
            _ => Route::Default,
        }
    }

    /// Handler of the first descriptor with identifier `id`.
    pub fn handler(&self, id: Id) -> RxHandler {
        self.descriptors
            .iter()
            .find(|d| d.id == id)
            .map_or(RxHandler::Default, |d| d.handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Fifo;
    use embedded_can::StandardId;

    fn id(raw: u16) -> Id {
        StandardId::new(raw).unwrap().into()
    }

    fn callback(_frame: &CanFrame) {}

    const DESCRIPTORS: [ReceiveDescriptor; 2] = [
        ReceiveDescriptor::new(Id::Standard(unsafe { StandardId::new_unchecked(0x100) }), Fifo::Fifo0)
            .with_callback(callback),
        ReceiveDescriptor::new(Id::Standard(unsafe { StandardId::new_unchecked(0x200) }), Fifo::Fifo0),
    ];

    #[test]
    fn unbuffered() {
        let router = Router::new(&DESCRIPTORS, &[id(0x100)], false);
        assert!(matches!(router.route(id(0x100)), Route::Bypass(_)));
        assert!(matches!(router.route(id(0x200)), Route::Default));
        assert!(matches!(router.handler(id(0x100)), RxHandler::Callback(_)));
        assert!(matches!(router.handler(id(0x300)), RxHandler::Default));
    }

    #[test]
    fn buffered() {
        let router = Router::new(&DESCRIPTORS, &[id(0x100), id(0x200), id(0x300)], true);
        assert!(matches!(router.route(id(0x100)), Route::Bypass(_)));
        // bypass hit without callback
        assert!(matches!(router.route(id(0x200)), Route::Buffer));
        // bypass id without descriptor
        assert!(matches!(router.route(id(0x300)), Route::Buffer));
        assert!(matches!(router.route(id(0x400)), Route::Buffer));
    }

    #[test]
    fn protocol_descriptor_bypasses_the_ring() {
        let descriptors = [ReceiveDescriptor::new(id(0x7F0), Fifo::Fifo0).with_protocol()];
        let router = Router::new(&descriptors, &[id(0x7F0)], true);
        assert!(matches!(router.route(id(0x7F0)), Route::Protocol));

        // without a bypass entry it is buffered like any other frame
        let router = Router::new(&descriptors, &[], true);
        assert!(matches!(router.route(id(0x7F0)), Route::Buffer));
        assert!(matches!(router.handler(id(0x7F0)), RxHandler::Protocol));
    }

    #[test]
    fn bypass_without_callback_falls_back_to_default() {
        let router = Router::new(&DESCRIPTORS, &[id(0x200)], false);
        assert!(matches!(router.route(id(0x200)), Route::Default));
    }
}
