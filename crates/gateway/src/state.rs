//! Shared application state for the gateway

use parley_chats::FanoutCoordinator;

/// Everything a handler needs: the coordinator and the per-connection queue depth.
#[derive(Clone)]
pub struct GatewayState {
    coordinator: FanoutCoordinator,
    outbound_buffer: usize,
}

impl GatewayState {
    pub fn new(coordinator: FanoutCoordinator, outbound_buffer: usize) -> Self {
        Self {
            coordinator,
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    pub fn coordinator(&self) -> &FanoutCoordinator {
        &self.coordinator
    }

    /// Depth of each live connection's outbound queue.
    pub fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }
}
