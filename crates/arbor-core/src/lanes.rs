//! Lanes: a bitset of update priorities. Lower bits are more urgent.

use bitflags::bitflags;

use crate::platform::PriorityLevel;

bitflags! {
    /// One or more priority lanes.
    ///
    /// A single lane is just a `Lanes` value with exactly one bit set; the
    /// empty set doubles as "no lane".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lanes: u32 {
        const SYNC = 0b00001;
        const INPUT_CONTINUOUS = 0b00010;
        const DEFAULT = 0b00100;
        const TRANSITION = 0b01000;
        const IDLE = 0b10000;
    }
}

/// A set containing a single lane.
pub type Lane = Lanes;

pub const NO_LANES: Lanes = Lanes::empty();

impl Lanes {
    /// The most urgent lane in the set (lowest set bit), or the empty set.
    pub fn highest_priority(self) -> Lane {
        let bits = self.bits();
        Lanes::from_bits_retain(bits & bits.wrapping_neg())
    }

    /// True when every lane of `subset` is part of `self`. The empty set is a
    /// subset of everything, so updates that carry no lane always apply.
    pub fn includes(self, subset: Lanes) -> bool {
        self.bits() & subset.bits() == subset.bits()
    }

    pub fn is_sync(self) -> bool {
        self == Lanes::SYNC
    }
}

/// Maps the most urgent lane of `lanes` to the scheduler priority used to run it.
pub fn lanes_to_priority(lanes: Lanes) -> PriorityLevel {
    let lane = lanes.highest_priority();
    if lane == Lanes::SYNC {
        PriorityLevel::Immediate
    } else if lane == Lanes::INPUT_CONTINUOUS {
        PriorityLevel::UserBlocking
    } else if lane == Lanes::DEFAULT {
        PriorityLevel::Normal
    } else if lane == Lanes::TRANSITION {
        PriorityLevel::Low
    } else {
        PriorityLevel::Idle
    }
}

pub fn priority_to_lane(priority: PriorityLevel) -> Lane {
    match priority {
        PriorityLevel::Immediate => Lanes::SYNC,
        PriorityLevel::UserBlocking => Lanes::INPUT_CONTINUOUS,
        PriorityLevel::Normal => Lanes::DEFAULT,
        PriorityLevel::Low => Lanes::TRANSITION,
        PriorityLevel::Idle => Lanes::IDLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_picks_lowest_bit() {
        let lanes = Lanes::TRANSITION | Lanes::DEFAULT | Lanes::IDLE;
        assert_eq!(lanes.highest_priority(), Lanes::DEFAULT);
        assert_eq!(NO_LANES.highest_priority(), NO_LANES);
        assert_eq!(Lanes::all().highest_priority(), Lanes::SYNC);
    }

    #[test]
    fn empty_lane_is_included_everywhere() {
        assert!(Lanes::SYNC.includes(NO_LANES));
        assert!(NO_LANES.includes(NO_LANES));
        assert!(!Lanes::SYNC.includes(Lanes::DEFAULT));
        assert!((Lanes::SYNC | Lanes::DEFAULT).includes(Lanes::DEFAULT));
    }

    #[test]
    fn priority_mapping_round_trips_every_lane() {
        for lane in [
            Lanes::SYNC,
            Lanes::INPUT_CONTINUOUS,
            Lanes::DEFAULT,
            Lanes::TRANSITION,
            Lanes::IDLE,
        ] {
            assert_eq!(priority_to_lane(lanes_to_priority(lane)), lane);
        }
        assert_eq!(
            lanes_to_priority(Lanes::IDLE | Lanes::INPUT_CONTINUOUS),
            PriorityLevel::UserBlocking
        );
    }
}
