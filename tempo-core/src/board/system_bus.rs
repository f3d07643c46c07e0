use crate::bus::Bus;
use crate::core::memory::{Memory, MemoryRequest, RequestStatus};
use crate::core::stall::Ticket;
use crate::resources::clint::{self, Clint};
use crate::resources::ram::Ram;
use crate::{Cycle, HartId};
use log::trace;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Enum that uniquely identifies every device attached to a [`SystemBus`] (as a slave).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(super) enum Resource {
    Ram,
    Clint,
}

/// A RAM access that has been performed but not yet reported back to its hart.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub(super) struct Completion {
    pub time: Cycle,
    /// Issue order, breaks ties between completions due at the same tick.
    pub sequence: u64,
    pub hart: HartId,
    pub ticket: Ticket,
    pub data: u32,
}

/// Abstraction of a system's main bus connecting all devices to the harts.
///
/// Accesses are forwarded to the slave that `address` maps to, if and only if the entire range
/// `address..(address+size)` is contained within that slave's window. Anything else is reported
/// as [`RequestStatus::Invalid`], which the hart turns into an access fault.
///
/// The CLINT answers in the tick the access is issued. RAM performs the access right away too,
/// but when `memory_latency` is non-zero the hart is only told `memory_latency` ticks later: the
/// request is blocked and a [`Completion`] is queued, to be handed out by [`Self::pop_due`].
#[derive(Debug)]
pub(super) struct SystemBus {
    pub ram_base: u32,
    pub ram: Ram,
    pub clint_base: u32,
    pub clint: Clint,
    pub memory_latency: u64,
    completions: BinaryHeap<Reverse<Completion>>,
    next_sequence: u64,
}

impl SystemBus {
    pub fn new(ram_base: u32, ram: Ram, clint_base: u32, clint: Clint, memory_latency: u64) -> Self {
        Self {
            ram_base,
            ram,
            clint_base,
            clint,
            memory_latency,
            completions: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    /// Drop every queued completion.
    pub fn reset(&mut self) {
        self.completions.clear();
        self.next_sequence = 0;
    }

    /// Number of RAM accesses still waiting to be reported.
    pub fn in_flight(&self) -> usize {
        self.completions.len()
    }

    /// Take the earliest completion due at or before `now`, if any.
    pub fn pop_due(&mut self, now: Cycle) -> Option<Completion> {
        match self.completions.peek() {
            Some(Reverse(completion)) if completion.time <= now => {
                self.completions.pop().map(|Reverse(completion)| completion)
            }
            _ => None,
        }
    }

    /// Validates the `(address, size)` pair, returning `Some((resource, mapped_address))` if the
    /// access is accepted, and `None` otherwise.
    fn check_access(&self, address: u32, size: u32) -> Option<(Resource, u32)> {
        let windows = [
            (Resource::Ram, self.ram_base, self.ram.len() as u64),
            (Resource::Clint, self.clint_base, clint::SIZE as u64),
        ];
        windows.into_iter().find_map(|(resource, base, len)| {
            let offset = address.checked_sub(base)?;
            (offset as u64 + size as u64 <= len).then_some((resource, offset))
        })
    }

    fn bus_of(&mut self, resource: Resource) -> &mut dyn Bus {
        match resource {
            Resource::Ram => &mut self.ram,
            Resource::Clint => &mut self.clint,
        }
    }
}

impl Memory for SystemBus {
    fn issue_request(&mut self, now: Cycle, request: &mut MemoryRequest) -> RequestStatus {
        if request.size == 0 || request.size > 4 {
            return RequestStatus::Invalid;
        }
        let Some((resource, mapped_address)) = self.check_access(request.address, request.size)
        else {
            return RequestStatus::Invalid;
        };

        let size = request.size as usize;
        let bus = self.bus_of(resource);
        if request.is_write {
            bus.write(now, mapped_address, &request.data.to_le_bytes()[..size]);
        } else {
            let mut bytes = [0u8; 4];
            bus.read(now, mapped_address, &mut bytes[..size]);
            request.data = u32::from_le_bytes(bytes);
        }

        if resource != Resource::Ram || self.memory_latency == 0 {
            return RequestStatus::Ok;
        }
        let completion = Completion {
            time: now + self.memory_latency,
            sequence: self.next_sequence,
            hart: request.hart,
            ticket: request.ticket,
            data: if request.is_write { 0 } else { request.data },
        };
        self.next_sequence += 1;
        trace!(
            "Hart {} access to {:#010x} completes at tick {}",
            request.hart,
            request.address,
            completion.time
        );
        self.completions.push(Reverse(completion));
        RequestStatus::Blocked
    }

    fn fetch(&mut self, address: u32) -> Option<u32> {
        let (Resource::Ram, mapped_address) = self.check_access(address, 4)? else {
            return None;
        };
        let mut bytes = [0u8; 4];
        self.ram.read(&mut bytes, mapped_address);
        Some(u32::from_le_bytes(bytes))
    }
}
