//        hard_ack        top
//        v               v
// -------#################_______--> sequence numbers
//         \_ outstanding _/
//
// #: sent, awaiting hard acknowledgment
// _: sequence numbers not yet used
//
// Slots live in a fixed ring indexed by `seq & RING_MASK`. A hard ack
// rotates the left edge forward and releases slots; soft acks and nacks
// annotate slots in place without releasing them.

use super::{AckSummary, RING_MASK, RING_SIZE};
use crate::seq;
use crate::seq::Seq;
use crate::wire::{ProtocolViolation, ACK_TYPE_ACK, ACK_TYPE_NACK};

use std::sync::Arc;

use log::trace;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxAnnotation {
    Unacked,
    Acked,
    Nacked,
    Retrans,
}

struct TxSlot {
    data: Arc<[u8]>,
    annotation: TxAnnotation,
    last: bool,
}

pub struct TxWindow {
    hard_ack: Seq,
    top: Seq,

    slots: [Option<TxSlot>; RING_SIZE as usize],

    // Lowest sequence reported nacked; a change marks a fresh loss episode
    lowest_nak: Seq,
}

impl TxWindow {
    pub fn new() -> Self {
        Self {
            hard_ack: 0,
            top: 0,
            slots: std::array::from_fn(|_| None),
            lowest_nak: 0,
        }
    }

    pub fn hard_ack(&self) -> Seq {
        self.hard_ack
    }

    pub fn top(&self) -> Seq {
        self.top
    }

    /// Number of packets sent but not hard-acked.
    pub fn outstanding(&self) -> u32 {
        self.top.wrapping_sub(self.hard_ack)
    }

    pub fn can_append(&self) -> bool {
        self.outstanding() < RING_SIZE - 1
    }

    /// Whether the newest transmitted packet carries the stream terminator.
    pub fn top_is_last(&self) -> bool {
        let ix = (self.top & RING_MASK) as usize;

        match &self.slots[ix] {
            Some(slot) => slot.last,
            None => false,
        }
    }

    pub fn annotation(&self, seq: Seq) -> Option<TxAnnotation> {
        if seq::after(seq, self.hard_ack) && seq::before_eq(seq, self.top) {
            let ix = (seq & RING_MASK) as usize;
            self.slots[ix].as_ref().map(|slot| slot.annotation)
        } else {
            None
        }
    }

    /// Places a packet at the next sequence number, returning it. Fails
    /// when the window would no longer fit the ring.
    pub fn append(&mut self, data: Arc<[u8]>, last: bool) -> Option<Seq> {
        if !self.can_append() {
            return None;
        }

        let seq = self.top.wrapping_add(1);
        let ix = (seq & RING_MASK) as usize;

        // A live slot here would mean the window invariant broke
        debug_assert!(self.slots[ix].is_none());

        self.slots[ix] = Some(TxSlot {
            data,
            annotation: TxAnnotation::Unacked,
            last,
        });
        self.top = seq;

        Some(seq)
    }

    /// Borrows a packet for retransmission and marks it pending.
    pub fn mark_retrans(&mut self, seq: Seq) -> Option<Arc<[u8]>> {
        if seq::after(seq, self.hard_ack) && seq::before_eq(seq, self.top) {
            let ix = (seq & RING_MASK) as usize;

            if let Some(slot) = &mut self.slots[ix] {
                slot.annotation = TxAnnotation::Retrans;
                return Some(Arc::clone(&slot.data));
            }
        }

        None
    }

    /// Advances the hard-ack edge to `to`, releasing every slot in
    /// `(hard_ack, to]`. Rotated packets not already soft-acked count as
    /// newly acknowledged; the caller has validated `to` against the
    /// window bounds.
    pub fn rotate(&mut self, to: Seq, summary: &mut AckSummary) {
        debug_assert!(seq::before_eq(to, self.top));

        while seq::before(self.hard_ack, to) {
            self.hard_ack = self.hard_ack.wrapping_add(1);
            let ix = (self.hard_ack & RING_MASK) as usize;

            if let Some(slot) = self.slots[ix].take() {
                if slot.last {
                    summary.rotated_last = true;
                }

                if slot.annotation != TxAnnotation::Acked {
                    summary.nr_rot_new_acks = summary.nr_rot_new_acks.saturating_add(1);
                }
            } else {
                debug_assert!(false, "rotating an empty transmit slot");
            }
        }

        trace!(
            "tx window rotated to {}{}",
            to,
            if summary.rotated_last { " (last)" } else { "" }
        );
    }

    /// Applies a soft-ack vector starting at sequence `first`. The caller
    /// has bounded the vector against the outstanding range; an invalid
    /// byte value is a protocol violation and leaves a partial update,
    /// which the caller resolves by aborting the call.
    pub fn apply_soft_acks(
        &mut self,
        first: Seq,
        acks: &[u8],
        summary: &mut AckSummary,
    ) -> Result<(), ProtocolViolation> {
        let mut seq = first;

        for &byte in acks {
            let ix = (seq & RING_MASK) as usize;

            let annotation = match &self.slots[ix] {
                Some(slot) => slot.annotation,
                None => {
                    debug_assert!(false, "soft ack for an empty transmit slot");
                    seq = seq.wrapping_add(1);
                    continue;
                }
            };

            match byte {
                ACK_TYPE_ACK => {
                    summary.nr_acks = summary.nr_acks.saturating_add(1);

                    if annotation != TxAnnotation::Acked {
                        summary.nr_new_acks = summary.nr_new_acks.saturating_add(1);

                        if let Some(slot) = &mut self.slots[ix] {
                            slot.annotation = TxAnnotation::Acked;
                        }
                    }
                }
                ACK_TYPE_NACK => {
                    if summary.nr_nacks == 0 && self.lowest_nak != seq {
                        self.lowest_nak = seq;
                        summary.new_low_nack = true;
                    }

                    summary.nr_nacks = summary.nr_nacks.saturating_add(1);

                    if annotation != TxAnnotation::Nacked {
                        summary.nr_new_nacks = summary.nr_new_nacks.saturating_add(1);

                        // A retransmit-pending slot keeps its annotation
                        if annotation != TxAnnotation::Retrans {
                            if let Some(slot) = &mut self.slots[ix] {
                                slot.annotation = TxAnnotation::Nacked;
                            }
                        }
                    }
                }
                _ => return Err(ProtocolViolation::BadAckType),
            }

            seq = seq.wrapping_add(1);
        }

        Ok(())
    }
}
