//! Routes a command's verb to the handler registered for it.

use crate::command::{CommandRecord, CommandStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A handler receives the record, runs the action and returns the record
/// with `status`/`result` (and possibly `dev_id`) filled in. Handlers reach
/// the device inventory only through its public operations.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// First words of the commands this handler serves.
    fn verbs(&self) -> &'static [&'static str];

    async fn handle(&self, record: CommandRecord) -> CommandRecord;
}

#[derive(Clone, Default)]
pub struct CommandDispatcher {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> &mut Self {
        for verb in handler.verbs() {
            self.handlers.insert(*verb, handler.clone());
        }
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn handles(&self, verb: &str) -> bool {
        self.handlers.contains_key(verb)
    }

    pub async fn dispatch(&self, record: CommandRecord) -> CommandRecord {
        let Some(handler) = self.handlers.get(record.verb()).cloned() else {
            debug!(command = %record.command, "unrecognized command");
            let mut record = record;
            record.status = CommandStatus::error("invalid command");
            return record;
        };

        let command = record.command.clone();
        let client = record.client.clone();
        let mut updated = handler.handle(record).await;
        // the key belongs to the queue, not to the handler
        updated.command = command;
        updated.client = client;

        match &updated.status {
            CommandStatus::Pending(reason) => debug!(command = %updated.command, %reason, "command pending"),
            status => info!(command = %updated.command, %status, "command finished"),
        }
        updated
    }
}
