//! Hot-plug event queue.
//!
//! Bus drivers notice insertions and removals from interrupt context, where autoconfiguration
//! cannot run. They queue an event instead; [super::Autoconf::run_hotplug] drains the queue
//! from the single configuration worker, one event at a time, in arrival order.

use super::{AttachArgs, DetachFlags, DeviceId, SlotOutcome};
use crate::Result;
use alloc::{collections::vec_deque::VecDeque, sync::Arc};
use spin::Mutex;

#[derive(Debug)]
pub enum HotplugEvent {
    /// A device appeared behind `parent`.
    Attach { parent: DeviceId, args: AttachArgs },
    /// A device went away.
    Detach { device: DeviceId, flags: DetachFlags },
}

/// What processing one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugOutcome {
    Probed(SlotOutcome),
    Detached(Result<()>),
    /// The device the event refers to is no longer attached.
    Stale,
}

/// Producer side of the queue; clone it into bus drivers.
#[derive(Clone, Default)]
pub struct HotplugQueue {
    events: Arc<Mutex<VecDeque<HotplugEvent>>>,
}

impl HotplugQueue {
    pub fn new() -> HotplugQueue {
        HotplugQueue::default()
    }

    pub fn queue_attach(&self, parent: DeviceId, args: AttachArgs) {
        self.events
            .lock()
            .push_back(HotplugEvent::Attach { parent, args });
    }

    pub fn queue_detach(&self, device: DeviceId, flags: DetachFlags) {
        self.events
            .lock()
            .push_back(HotplugEvent::Detach { device, flags });
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub(super) fn pop(&self) -> Option<HotplugEvent> {
        self.events.lock().pop_front()
    }
}
