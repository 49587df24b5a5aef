use std::sync::Arc;

use super::bus::MessageBus;

/// Per-execution handle through which the scan reaches engine services.
#[derive(Clone)]
pub struct ExecutionContext {
    message_bus: Arc<MessageBus>,
}

impl ExecutionContext {
    pub fn new(message_bus: Arc<MessageBus>) -> Self {
        Self { message_bus }
    }

    pub fn message_bus(&self) -> &Arc<MessageBus> {
        &self.message_bus
    }
}
