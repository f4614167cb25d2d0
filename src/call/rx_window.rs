//        hard_ack        top
//        v               v
// -------##_##_###________--> sequence numbers
//          \_ received _/
//
// #: held for in-order delivery
// _: not yet received (holes), or beyond the newest arrival
//
// Arrival order is arbitrary; the ring reconciles duplicates and holes and
// the drain side releases slots strictly in order.

use super::{RING_MASK, RING_SIZE};
use crate::seq;
use crate::seq::Seq;
use crate::wire::ProtocolViolation;

use log::trace;

struct RxSlot {
    data: Box<[u8]>,
    last: bool,
}

/// Outcome of offering one subpacket to the window.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Insert {
    Accepted {
        // The sequence landed below an already-received one
        filled_hole: bool,
        // The sequence skipped past the next expected one
        out_of_sequence: bool,
    },
    // At or below the hard-ack point
    DuplicateLow,
    // A held slot already covers this sequence
    DuplicateSlot,
    ExceedsWindow,
}

pub struct RxWindow {
    hard_ack: Seq,
    top: Seq,
    expect_next: Seq,
    winsize: u32,

    slots: [Option<RxSlot>; RING_SIZE as usize],

    // The stream terminator has been received (at sequence `top`)
    have_last: bool,
}

impl RxWindow {
    pub fn new(winsize: u32) -> Self {
        Self {
            hard_ack: 0,
            top: 0,
            expect_next: 1,
            winsize: winsize.clamp(1, RING_SIZE - 1),
            slots: std::array::from_fn(|_| None),
            have_last: false,
        }
    }

    pub fn hard_ack(&self) -> Seq {
        self.hard_ack
    }

    pub fn top(&self) -> Seq {
        self.top
    }

    pub fn expect_next(&self) -> Seq {
        self.expect_next
    }

    pub fn winsize(&self) -> u32 {
        self.winsize
    }

    pub fn have_last(&self) -> bool {
        self.have_last
    }

    /// Whether `seq` lies beyond what the advertised window permits.
    pub fn beyond_window(&self, seq: Seq) -> bool {
        seq::after(seq, self.hard_ack.wrapping_add(self.winsize))
    }

    /// Offers one received subpacket to the window.
    ///
    /// Terminator consistency is checked before anything else: once the
    /// last packet is known, marking a different sequence as last, or
    /// receiving any sequence beyond it, is a protocol violation even if
    /// the subpacket would otherwise be a duplicate.
    pub fn insert(&mut self, seq: Seq, data: &[u8], last: bool) -> Result<Insert, ProtocolViolation> {
        if last {
            if self.have_last && seq != self.top {
                return Err(ProtocolViolation::LastSequenceChanged);
            }
        } else if self.have_last && seq::after_eq(seq, self.top) {
            return Err(ProtocolViolation::DataAfterLast);
        }

        if self.beyond_window(seq) {
            return Ok(Insert::ExceedsWindow);
        }

        if seq::before_eq(seq, self.hard_ack) {
            return Ok(Insert::DuplicateLow);
        }

        let ix = (seq & RING_MASK) as usize;

        if self.slots[ix].is_some() {
            return Ok(Insert::DuplicateSlot);
        }

        self.slots[ix] = Some(RxSlot {
            data: data.into(),
            last,
        });

        let mut filled_hole = false;

        if seq::after(seq, self.top) {
            self.top = seq;
        } else {
            // Landed below the newest arrival: a hole just closed
            filled_hole = true;
        }

        if last {
            self.have_last = true;
            trace!("rx terminator at seq {}", seq);
        }

        let mut out_of_sequence = false;

        if seq::after_eq(seq, self.expect_next) {
            out_of_sequence = seq::after(seq, self.expect_next);
            self.expect_next = seq.wrapping_add(1);
        }

        Ok(Insert::Accepted {
            filled_hole,
            out_of_sequence,
        })
    }

    /// Releases the next in-order packet, advancing the hard-ack edge.
    /// Returns the payload and whether it carried the terminator.
    pub fn take_next(&mut self) -> Option<(Seq, Box<[u8]>, bool)> {
        let next = self.hard_ack.wrapping_add(1);
        let ix = (next & RING_MASK) as usize;

        let slot = self.slots[ix].take()?;

        self.hard_ack = next;

        Some((next, slot.data, slot.last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(filled_hole: bool, out_of_sequence: bool) -> Insert {
        Insert::Accepted {
            filled_hole,
            out_of_sequence,
        }
    }

    #[test]
    fn in_order_receive_and_drain() {
        let mut rx = RxWindow::new(63);

        for i in 1..=5u32 {
            assert_eq!(rx.insert(i, &[i as u8], i == 5), Ok(accepted(false, false)));
        }

        assert_eq!(rx.top(), 5);
        assert_eq!(rx.expect_next(), 6);
        assert!(rx.have_last());

        for i in 1..=5u32 {
            let (seq, data, last) = rx.take_next().unwrap();
            assert_eq!(seq, i);
            assert_eq!(&data[..], &[i as u8]);
            assert_eq!(last, i == 5);
        }

        assert_eq!(rx.hard_ack(), 5);
        assert!(rx.take_next().is_none());
    }

    #[test]
    fn out_of_order_flags_and_hole_fill() {
        let mut rx = RxWindow::new(63);

        assert_eq!(rx.insert(1, b"a", false), Ok(accepted(false, false)));
        assert_eq!(rx.insert(3, b"c", false), Ok(accepted(false, true)));

        // Hole below the top: delivery cannot pass seq 1 yet
        let (seq, _, _) = rx.take_next().unwrap();
        assert_eq!(seq, 1);
        assert!(rx.take_next().is_none());

        // Filling the hole flags it
        assert_eq!(rx.insert(2, b"b", false), Ok(accepted(true, false)));

        let (seq, _, _) = rx.take_next().unwrap();
        assert_eq!(seq, 2);
        let (seq, _, _) = rx.take_next().unwrap();
        assert_eq!(seq, 3);
    }

    #[test]
    fn duplicates() {
        let mut rx = RxWindow::new(63);

        assert_eq!(rx.insert(1, b"a", false), Ok(accepted(false, false)));
        assert_eq!(rx.insert(2, b"b", false), Ok(accepted(false, false)));

        // Slot still held
        assert_eq!(rx.insert(2, b"b", false), Ok(Insert::DuplicateSlot));

        // Consumed and below hard-ack
        rx.take_next().unwrap();
        assert_eq!(rx.insert(1, b"a", false), Ok(Insert::DuplicateLow));
    }

    #[test]
    fn window_bound() {
        let mut rx = RxWindow::new(8);

        assert_eq!(rx.insert(8, b"x", false), Ok(accepted(false, true)));
        assert_eq!(rx.insert(9, b"x", false), Ok(Insert::ExceedsWindow));

        // The over-window sequence left no trace
        assert_eq!(rx.top(), 8);
        assert_eq!(rx.expect_next(), 9);
    }

    #[test]
    fn terminator_consistency() {
        let mut rx = RxWindow::new(63);

        assert_eq!(rx.insert(3, b"c", true), Ok(accepted(false, true)));
        assert!(rx.have_last());

        // Same sequence marked last again: tolerated as a duplicate
        assert_eq!(rx.insert(3, b"c", true), Ok(Insert::DuplicateSlot));

        // A different sequence claiming to be last
        assert_eq!(
            rx.insert(2, b"b", true),
            Err(ProtocolViolation::LastSequenceChanged)
        );

        // Data at or beyond the known last
        assert_eq!(
            rx.insert(4, b"d", false),
            Err(ProtocolViolation::DataAfterLast)
        );
        assert_eq!(
            rx.insert(3, b"c", false),
            Err(ProtocolViolation::DataAfterLast)
        );

        // Below the terminator is still accepted
        assert_eq!(rx.insert(1, b"a", false), Ok(accepted(true, false)));
    }

    #[test]
    fn random_arrival_order_delivers_in_order() {
        use rand::seq::SliceRandom;

        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let mut seqs: Vec<u32> = (1..=32).collect();
            seqs.shuffle(&mut rng);

            let mut rx = RxWindow::new(63);

            for &seq in &seqs {
                let outcome = rx.insert(seq, &[seq as u8], seq == 32).unwrap();
                assert!(matches!(outcome, Insert::Accepted { .. }));
            }

            for expect in 1..=32u32 {
                let (seq, data, last) = rx.take_next().unwrap();
                assert_eq!(seq, expect);
                assert_eq!(&data[..], &[expect as u8]);
                assert_eq!(last, expect == 32);
            }
        }
    }
}
