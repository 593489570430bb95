// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The network stack the engine delivers into.
//!
//! The engine owns its stack for its whole life. Ordinary delivery is
//! [`LroStack::if_input`]. A TCP implementation which can take packets
//! queued straight onto a connection exposes its control blocks
//! through [`LroStack::tcp_lookup`], and the engine then bypasses
//! generic input for that connection.

use super::ack_compress::AckBatch;
use crate::ddi::mbuf::Mbuf;
use alloc::collections::VecDeque;
use bitflags::bitflags;
use lro_api::FlowKey;

bitflags! {
/// Per-connection state the engine consults before queueing to a
/// control block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TcbFlags: u32 {
    /// Accepts packets queued directly on its input queue.
    const SUPPORTS_MBUFQ   = 1 << 0;
    /// Accepts compressed ACK batches.
    const MBUF_ACKCMP      = 1 << 1;
    /// Input is already scheduled to be processed; no wakeup needed.
    const MBUF_QUEUE_READY = 1 << 2;
    /// Do not wake up just because a SACK arrived.
    const DONT_SACK_QUEUE  = 1 << 3;
    /// A batch ran out of room; allocate large ones from now on.
    const MBUF_L_ACKS      = 1 << 4;
    /// The connection is being torn down.
    const DROPPED          = 1 << 5;
    const TIMEWAIT         = 1 << 6;
}
}

/// One item on a control block's input queue.
#[derive(Debug)]
pub enum TcbInput {
    /// A segment with its L2 header stripped.
    Pkt(Mbuf),
    Acks(AckBatch),
}

/// A TCP control block as seen by the engine.
pub trait LroTcb {
    fn flags(&self) -> TcbFlags;
    fn set_flags(&mut self, flags: TcbFlags);

    /// The CPU the connection's input is bound to, if any.
    fn irq_cpu(&self) -> Option<u32>;
    fn set_irq_cpu(&mut self, cpu: u32);

    fn input_queue(&mut self) -> &mut VecDeque<TcbInput>;

    /// Process everything on the input queue.
    fn do_queued_segments(&mut self);

    /// Asked when nothing else calls for a wakeup. A stack with
    /// latency-sensitive state may want one anyway.
    fn early_wake_check(&self) -> bool {
        false
    }
}

pub trait LroStack {
    type Tcb: LroTcb;

    /// Hand a packet to the network layer.
    fn if_input(&mut self, m: Mbuf);

    /// Find the control block receiving segments of the flow `key`,
    /// where `key` is as parsed from a received packet.
    fn tcp_lookup(&mut self, key: &FlowKey) -> Option<&mut Self::Tcb>;
}
