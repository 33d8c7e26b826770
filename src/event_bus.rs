/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) published by the node's components and
//! passes each one to the handlers registered for its kind.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) insert_block_handlers: Vec<HandlerPtr<InsertBlockEvent>>,
    pub(crate) reject_block_handlers: Vec<HandlerPtr<RejectBlockEvent>>,
    pub(crate) replace_chain_handlers: Vec<HandlerPtr<ReplaceChainEvent>>,
    pub(crate) persist_chain_handlers: Vec<HandlerPtr<PersistChainEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) prepare_handlers: Vec<HandlerPtr<PrepareEvent>>,
    pub(crate) commit_handlers: Vec<HandlerPtr<CommitEvent>>,
    pub(crate) receive_pre_prepare_handlers: Vec<HandlerPtr<ReceivePrePrepareEvent>>,
    pub(crate) receive_prepare_handlers: Vec<HandlerPtr<ReceivePrepareEvent>>,
    pub(crate) receive_commit_handlers: Vec<HandlerPtr<ReceiveCommitEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
}

impl EventHandlers {
    /// Create the handler set, adding the default logging handlers first if `log_events` is set.
    pub(crate) fn new(
        log_events: bool,
        on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
        on_reject_block: Option<HandlerPtr<RejectBlockEvent>>,
        on_replace_chain: Option<HandlerPtr<ReplaceChainEvent>>,
        on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    ) -> EventHandlers {
        let mut handlers = EventHandlers::default();

        if log_events {
            handlers.insert_block_handlers.push(InsertBlockEvent::get_logger());
            handlers.reject_block_handlers.push(RejectBlockEvent::get_logger());
            handlers.replace_chain_handlers.push(ReplaceChainEvent::get_logger());
            handlers.persist_chain_handlers.push(PersistChainEvent::get_logger());
            handlers.propose_handlers.push(ProposeEvent::get_logger());
            handlers.prepare_handlers.push(PrepareEvent::get_logger());
            handlers.commit_handlers.push(CommitEvent::get_logger());
            handlers.receive_pre_prepare_handlers.push(ReceivePrePrepareEvent::get_logger());
            handlers.receive_prepare_handlers.push(ReceivePrepareEvent::get_logger());
            handlers.receive_commit_handlers.push(ReceiveCommitEvent::get_logger());
            handlers.commit_block_handlers.push(CommitBlockEvent::get_logger());
        }

        handlers.insert_block_handlers.extend(on_insert_block);
        handlers.reject_block_handlers.extend(on_reject_block);
        handlers.replace_chain_handlers.extend(on_replace_chain);
        handlers.commit_block_handlers.extend(on_commit_block);

        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_block_handlers.is_empty()
            && self.reject_block_handlers.is_empty()
            && self.replace_chain_handlers.is_empty()
            && self.persist_chain_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.prepare_handlers.is_empty()
            && self.commit_handlers.is_empty()
            && self.receive_pre_prepare_handlers.is_empty()
            && self.receive_prepare_handlers.is_empty()
            && self.receive_commit_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertBlock(insert_block_event) =>
                self.insert_block_handlers.iter().for_each(|handler| handler(&insert_block_event)),

            Event::RejectBlock(reject_block_event) =>
                self.reject_block_handlers.iter().for_each(|handler| handler(&reject_block_event)),

            Event::ReplaceChain(replace_chain_event) =>
                self.replace_chain_handlers.iter().for_each(|handler| handler(&replace_chain_event)),

            Event::PersistChain(persist_chain_event) =>
                self.persist_chain_handlers.iter().for_each(|handler| handler(&persist_chain_event)),

            Event::Propose(propose_event) =>
                self.propose_handlers.iter().for_each(|handler| handler(&propose_event)),

            Event::Prepare(prepare_event) =>
                self.prepare_handlers.iter().for_each(|handler| handler(&prepare_event)),

            Event::Commit(commit_event) =>
                self.commit_handlers.iter().for_each(|handler| handler(&commit_event)),

            Event::ReceivePrePrepare(receive_pre_prepare_event) =>
                self.receive_pre_prepare_handlers.iter().for_each(|handler| handler(&receive_pre_prepare_event)),

            Event::ReceivePrepare(receive_prepare_event) =>
                self.receive_prepare_handlers.iter().for_each(|handler| handler(&receive_prepare_event)),

            Event::ReceiveCommit(receive_commit_event) =>
                self.receive_commit_handlers.iter().for_each(|handler| handler(&receive_commit_event)),

            Event::CommitBlock(commit_block_event) =>
                self.commit_block_handlers.iter().for_each(|handler| handler(&commit_block_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Events published before shutdown still reach their handlers.
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
